//! End-to-end scenarios over the public crate API, all deterministic with
//! fixture inputs — no external scanner, no live network.

use chrono::{Duration, Utc};
use netcatalog::classify;
use netcatalog::discovery::apply::apply_hints;
use netcatalog::discovery::hints::{Hint, RelationshipHint, SNMP_MAC_TABLE};
use netcatalog::identify;
use netcatalog::probe::ProbeResult;
use netcatalog::probe::http::{Extracted, HttpHeaders, HttpProbe};
use netcatalog::probe::patterns;
use netcatalog::scan::nmap::parse_scan_xml;
use netcatalog::store::{HostObservation, HostStatus, ScanStatus, Store};

/// A single HTTP host: fixture scanner output plus a canned HTTP response
/// flow through parsing, identification and persistence.
#[tokio::test]
async fn single_http_host_identified_and_stored() {
    let xml = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
  <host>
    <status state="up"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="80"><state state="open"/><service name="http"/></port>
    </ports>
  </host>
</nmaprun>"#;
    let hosts = parse_scan_xml(xml).unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].ports.len(), 1);

    // The probe found nginx serving a Grafana login page.
    let body = "<html><title>Grafana</title></html>";
    let probe = ProbeResult {
        http: Some(HttpProbe {
            protocol: "http",
            status_code: 200,
            headers: HttpHeaders {
                server: Some("nginx/1.25.3".to_string()),
                ..Default::default()
            },
            body: body.to_string(),
            extracted: Extracted {
                title: Some("Grafana".to_string()),
                patterns: patterns::match_all(&body.to_lowercase()),
                ..Default::default()
            },
        }),
        banner: None,
        app_endpoint: None,
    };
    let identification = identify::identify(80, &probe, None);
    assert_eq!(identification.identified_as, "Grafana");
    assert_eq!(identification.match_source, "title");

    let store = Store::in_memory().await.unwrap();
    let now = Utc::now();
    let host = store
        .upsert_host(
            &HostObservation {
                ip: hosts[0].ip.clone(),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();
    store
        .upsert_service(
            &host.id,
            &netcatalog::store::ServiceObservation {
                port: 80,
                identified_as: Some(identification.identified_as.clone()),
                http_title: probe.http.as_ref().unwrap().extracted.title.clone(),
                http_server: probe.http.as_ref().unwrap().headers.server.clone(),
                extra_info: Some(serde_json::json!({
                    "matchSource": identification.match_source,
                })),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();

    let services = store.services_for_host(&host.id).await.unwrap();
    assert_eq!(services[0].identified_as.as_deref(), Some("Grafana"));
    assert_eq!(
        services[0].extra_info.as_ref().unwrap()["matchSource"],
        "title"
    );
}

/// Grace prevents flap: absent from one scan keeps `up`, absent three
/// hours later goes `down`.
#[tokio::test]
async fn grace_prevents_status_flap() {
    let store = Store::in_memory().await.unwrap();
    let seen_at = Utc::now() - Duration::minutes(30);
    let host = store
        .upsert_host(
            &HostObservation {
                ip: "10.0.0.5".to_string(),
                ..Default::default()
            },
            seen_at,
        )
        .await
        .unwrap();

    // Scan now, host absent: last seen 30 min ago, inside the window.
    let now = Utc::now();
    store
        .mark_host_down_graceful(&host.id, now - Duration::hours(2), now)
        .await
        .unwrap();
    assert_eq!(
        store.host_by_id(&host.id).await.unwrap().unwrap().status,
        HostStatus::Up
    );

    // Re-run three hours later, still absent.
    let later = now + Duration::hours(3);
    store
        .mark_host_down_graceful(&host.id, later - Duration::hours(2), later)
        .await
        .unwrap();
    assert_eq!(
        store.host_by_id(&host.id).await.unwrap().unwrap().status,
        HostStatus::Down
    );
}

/// Closest-switch tie-break with an LLDP challenger, end to end through
/// resolution and transactional application.
#[tokio::test]
async fn closest_switch_resolution_applies_to_store() {
    let store = Store::in_memory().await.unwrap();
    let now = Utc::now();
    let seed = |ip: &str| {
        let store = store.clone();
        let ip = ip.to_string();
        async move {
            store
                .upsert_host(
                    &HostObservation {
                        ip,
                        ..Default::default()
                    },
                    now,
                )
                .await
                .unwrap()
        }
    };
    let switch1 = seed("10.0.0.1").await;
    let switch2 = seed("10.0.0.2").await;
    let child = seed("10.0.0.50").await;
    let _ = switch2;

    let mac_hint = |parent: &str, count: u32| {
        Hint::Relationship(RelationshipHint {
            child_ip: "10.0.0.50".to_string(),
            parent_ip: parent.to_string(),
            method: SNMP_MAC_TABLE,
            confidence: 90,
            port_mac_count: Some(count),
            detail: None,
        })
    };

    // switch1 learnt the MAC on a 2-MAC port, switch2 on a 37-MAC trunk;
    // LLDP seconds switch2 at equal confidence and must not win.
    let hints = vec![
        mac_hint("10.0.0.1", 2),
        mac_hint("10.0.0.2", 37),
        Hint::relationship("10.0.0.50", "10.0.0.2", "snmp_lldp", 95),
    ];
    apply_hints(&store, &hints, None).await.unwrap();

    let child_row = store.host_by_id(&child.id).await.unwrap().unwrap();
    assert_eq!(child_row.parent_host_id, Some(switch1.id));
}

/// Manual override survives discovery and pins the classifier.
#[tokio::test]
async fn manual_device_type_is_sticky() {
    let store = Store::in_memory().await.unwrap();
    let now = Utc::now();
    let parent = store
        .upsert_host(
            &HostObservation {
                ip: "10.0.0.1".to_string(),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();
    let host = store
        .upsert_host(
            &HostObservation {
                ip: "10.0.0.9".to_string(),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();

    store
        .replace_auto_parents(&[(host.id, parent.id)])
        .await
        .unwrap();
    store.set_device_type(&host.id, Some("server")).await.unwrap();

    // A later discovery run with no evidence for this host must not clear
    // the manually typed host's parent.
    apply_hints(&store, &[], None).await.unwrap();
    let row = store.host_by_id(&host.id).await.unwrap().unwrap();
    assert_eq!(row.parent_host_id, Some(parent.id));

    let classification = classify::classify(&row, &[]);
    assert_eq!(classification.device_type, "server");
    assert_eq!(classification.confidence, 100);
    assert_eq!(classification.reason, "Manuell gesetzt");
}

/// A file-backed store persists across connections, as it must across
/// process restarts.
#[tokio::test]
async fn file_backed_store_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/catalog.db", dir.path().display());

    {
        let store = Store::connect(&url, 2).await.unwrap();
        store
            .upsert_host(
                &HostObservation {
                    ip: "192.168.66.20".to_string(),
                    hostname: Some("printer.lan".to_string()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        store.close().await;
    }

    let reopened = Store::connect(&url, 2).await.unwrap();
    let host = reopened
        .host_by_ip("192.168.66.20")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(host.hostname.as_deref(), Some("printer.lan"));
}

/// Scan rows transition exactly once and interrupted rows recover on boot.
#[tokio::test]
async fn scan_lifecycle_and_startup_recovery() {
    let store = Store::in_memory().await.unwrap();

    let interrupted = store.create_scan("192.168.66.0/24").await.unwrap();
    assert_eq!(interrupted.status, ScanStatus::Running);
    assert_eq!(store.fail_interrupted_scans().await.unwrap(), 1);

    let row = store.scan_by_id(&interrupted.id).await.unwrap().unwrap();
    assert_eq!(row.status, ScanStatus::Error);
    assert_eq!(row.error.as_deref(), Some("server restarted"));

    let scan = store.create_scan("192.168.66.0/24").await.unwrap();
    store.complete_scan(&scan.id, 3, 7).await.unwrap();
    let done = store.scan_by_id(&scan.id).await.unwrap().unwrap();
    assert_eq!(done.status, ScanStatus::Completed);
    assert!(done.finished_at.is_some());
}
