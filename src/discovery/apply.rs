//! Turn resolved hints into store state.
//!
//! The parent rewrite must look atomic to API readers: clearing the old
//! auto-discovered links and assigning the new ones happens in one
//! transaction (`Store::replace_auto_parents`).

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::classify;
use crate::discovery::hints::{self, Hint, ResolvedParent};
use crate::server::error::Error;
use crate::store::{Host, Store};

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub parents_resolved: usize,
    pub parents_applied: usize,
    pub edges_dropped: usize,
    pub hosts_enriched: usize,
}

/// Device type that drives the sanity edges: the operator override first,
/// the classifier otherwise, and the default-route owner counts as gateway.
fn effective_type(host: &Host, services: &[crate::store::Service], gateway_ip: Option<&str>) -> String {
    if gateway_ip == Some(host.ip.as_str()) && host.device_type.is_none() {
        return "gateway".to_string();
    }
    classify::classify(host, services).device_type
}

/// Two structural mistakes no evidence source should be able to cause:
/// a VM reparented under access gear instead of its hypervisor, and the
/// backbone (gateway/firewall) hung below an edge switch.
fn is_sane_edge(child_type: &str, parent_type: &str) -> bool {
    if child_type == "vm" && matches!(parent_type, "switch" | "ap" | "gateway" | "router") {
        return false;
    }
    if matches!(child_type, "gateway" | "firewall") && parent_type == "switch" {
        return false;
    }
    true
}

pub async fn apply_hints(
    store: &Store,
    all_hints: &[Hint],
    gateway_ip: Option<&str>,
) -> Result<ApplyOutcome, Error> {
    let resolved = hints::resolve_relationships(all_hints);
    let hosts = store.all_hosts().await?;
    let host_by_ip = |ip: &str| hosts.iter().find(|h| h.ip == ip);

    let mut outcome = ApplyOutcome {
        parents_resolved: resolved.len(),
        ..Default::default()
    };

    let mut assignments: Vec<(Uuid, Uuid)> = Vec::new();
    for ResolvedParent {
        child_ip,
        parent_ip,
        method,
        confidence,
    } in &resolved
    {
        let (Some(child), Some(parent)) = (host_by_ip(child_ip), host_by_ip(parent_ip)) else {
            continue;
        };
        if child.id == parent.id {
            continue;
        }

        let child_services = store.services_for_host(&child.id).await?;
        let parent_services = store.services_for_host(&parent.id).await?;
        let child_type = effective_type(child, &child_services, gateway_ip);
        let parent_type = effective_type(parent, &parent_services, gateway_ip);

        if !is_sane_edge(&child_type, &parent_type) {
            tracing::debug!(
                "dropping edge {} ({}) -> {} ({}) from {}",
                child_ip,
                child_type,
                parent_ip,
                parent_type,
                method
            );
            outcome.edges_dropped += 1;
            continue;
        }

        tracing::debug!(
            "parent {} -> {} via {} ({}%)",
            child_ip,
            parent_ip,
            method,
            confidence
        );
        assignments.push((child.id, parent.id));
    }

    outcome.parents_applied = store.replace_auto_parents(&assignments).await?;

    // Enrichment maps, one JSON document per host, stamped once.
    let now = Utc::now();
    for (ip, mut info) in hints::merge_enrichments(all_hints) {
        let Some(host) = host_by_ip(&ip) else { continue };
        if let Value::Object(map) = &mut info {
            map.insert(
                "_lastDiscovery".to_string(),
                Value::String(now.to_rfc3339()),
            );
        }
        store.set_discovery_info(&host.id, &info, now).await?;
        outcome.hosts_enriched += 1;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::hints::Hint;
    use crate::store::HostObservation;
    use serde_json::json;

    async fn seed(store: &Store, ip: &str, mac: Option<&str>) -> Host {
        store
            .upsert_host(
                &HostObservation {
                    ip: ip.to_string(),
                    mac: mac.map(str::to_string),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    #[test]
    fn sanity_edges() {
        assert!(!is_sane_edge("vm", "switch"));
        assert!(!is_sane_edge("vm", "ap"));
        assert!(!is_sane_edge("vm", "router"));
        assert!(is_sane_edge("vm", "hypervisor"));
        assert!(!is_sane_edge("gateway", "switch"));
        assert!(!is_sane_edge("firewall", "switch"));
        assert!(is_sane_edge("firewall", "router"));
        assert!(is_sane_edge("client", "switch"));
    }

    #[tokio::test]
    async fn proxmox_vm_lands_under_hypervisor() {
        let store = Store::in_memory().await.unwrap();
        let hypervisor = seed(&store, "10.0.0.10", None).await;
        let vm = seed(&store, "10.0.0.42", Some("bc:24:11:aa:bb:cc")).await;

        let hints = vec![Hint::relationship(
            "10.0.0.42",
            "10.0.0.10",
            "proxmox_api",
            98,
        )];
        let outcome = apply_hints(&store, &hints, None).await.unwrap();
        assert_eq!(outcome.parents_applied, 1);
        assert_eq!(outcome.edges_dropped, 0);

        let vm = store.host_by_id(&vm.id).await.unwrap().unwrap();
        assert_eq!(vm.parent_host_id, Some(hypervisor.id));
    }

    #[tokio::test]
    async fn vm_under_switch_is_dropped() {
        let store = Store::in_memory().await.unwrap();
        let switch = seed(&store, "10.0.0.2", None).await;
        // sysDescr makes the parent a switch, the MAC makes the child a VM.
        store
            .set_discovery_info(
                &switch.id,
                &json!({"snmp": {"sysDescr": "ProCurve Switch 2810"}}),
                Utc::now(),
            )
            .await
            .unwrap();
        let vm = seed(&store, "10.0.0.42", Some("52:54:00:12:34:56")).await;

        let hints = vec![Hint::Relationship(crate::discovery::hints::RelationshipHint {
            child_ip: "10.0.0.42".to_string(),
            parent_ip: "10.0.0.2".to_string(),
            method: crate::discovery::hints::SNMP_MAC_TABLE,
            confidence: 90,
            port_mac_count: Some(1),
            detail: None,
        })];
        let outcome = apply_hints(&store, &hints, None).await.unwrap();
        assert_eq!(outcome.edges_dropped, 1);
        assert_eq!(outcome.parents_applied, 0);

        let vm = store.host_by_id(&vm.id).await.unwrap().unwrap();
        assert_eq!(vm.parent_host_id, None);
    }

    #[tokio::test]
    async fn manual_device_type_keeps_parent_and_wins_classification() {
        let store = Store::in_memory().await.unwrap();
        let ap = seed(&store, "10.0.0.3", None).await;
        let pinned = seed(&store, "10.0.0.60", None).await;

        // First discovery run assigns a parent, operator pins the type after.
        store
            .replace_auto_parents(&[(pinned.id, ap.id)])
            .await
            .unwrap();
        store
            .set_device_type(&pinned.id, Some("server"))
            .await
            .unwrap();

        // Next run resolves nothing for this child; the reset query must
        // not touch the manually typed host.
        let outcome = apply_hints(&store, &[], None).await.unwrap();
        assert_eq!(outcome.parents_applied, 0);

        let pinned = store.host_by_id(&pinned.id).await.unwrap().unwrap();
        assert_eq!(pinned.parent_host_id, Some(ap.id));

        let classification = classify::classify(&pinned, &[]);
        assert_eq!(classification.confidence, 100);
        assert_eq!(classification.reason, "Manuell gesetzt");
    }

    #[tokio::test]
    async fn enrichment_written_with_timestamp() {
        let store = Store::in_memory().await.unwrap();
        let host = seed(&store, "10.0.0.7", None).await;

        let hints = vec![
            Hint::enrichment("10.0.0.7", "ttl", json!({"ttl": 64})),
            Hint::enrichment("10.0.0.99", "ttl", json!({"ttl": 64})),
        ];
        let outcome = apply_hints(&store, &hints, None).await.unwrap();
        // The unknown IP is skipped.
        assert_eq!(outcome.hosts_enriched, 1);

        let host = store.host_by_id(&host.id).await.unwrap().unwrap();
        let info = host.discovery_info.unwrap();
        assert_eq!(info["ttl"]["ttl"], 64);
        assert!(info.get("_lastDiscovery").is_some());
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        let parent = seed(&store, "10.0.1.1", None).await;
        let child = seed(&store, "10.0.1.2", None).await;

        let hints = vec![
            Hint::relationship("10.0.1.2", "10.0.1.1", "traceroute", 85),
            Hint::enrichment("10.0.1.2", "arp", json!({"mac": "aa:bb:cc:dd:ee:ff"})),
        ];
        apply_hints(&store, &hints, None).await.unwrap();
        let first = store.host_by_id(&child.id).await.unwrap().unwrap();

        apply_hints(&store, &hints, None).await.unwrap();
        let second = store.host_by_id(&child.id).await.unwrap().unwrap();

        assert_eq!(first.parent_host_id, Some(parent.id));
        assert_eq!(second.parent_host_id, Some(parent.id));
        let mut a = first.discovery_info.unwrap();
        let mut b = second.discovery_info.unwrap();
        a.as_object_mut().unwrap().remove("_lastDiscovery");
        b.as_object_mut().unwrap().remove("_lastDiscovery");
        assert_eq!(a, b);
    }
}
