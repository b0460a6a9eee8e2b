//! The scan pipeline orchestrator.
//!
//! Liveness sweep, SYN port discovery, per-port probing and identification,
//! availability bookkeeping, optional deep discovery — all under the scan
//! singleton, finalising the scan row on every exit path.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{Duration, Utc};
use mac_oui::Oui;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::guard::Singleton;
use super::liveness;
use super::nmap::{DiscoveredPort, HostScan, PortScanner, SweepHost};
use crate::discovery;
use crate::identify::{self, Identification};
use crate::probe::{ProbeResult, Prober};
use crate::server::error::Error;
use crate::store::{HostObservation, HostStatus, Scan, ServiceObservation, Store};
use crate::util::batch::batch_scan;

/// Concurrent per-port probes per host.
const PROBES_PER_HOST: usize = 8;
/// Hosts and services are not retired within this window of their last
/// sighting; one flaky scan must not erase known state.
const GRACE_HOURS: i64 = 2;
const AVAILABILITY_RETENTION_DAYS: i64 = 30;

static OUI_DB: LazyLock<Option<Oui>> = LazyLock::new(|| match Oui::default() {
    Ok(db) => Some(db),
    Err(e) => {
        tracing::warn!("OUI database unavailable, vendor backfill disabled: {}", e);
        None
    }
});

fn vendor_for_mac(mac: &str) -> Option<String> {
    OUI_DB
        .as_ref()?
        .lookup_by_mac(mac)
        .ok()
        .flatten()
        .map(|entry| entry.company_name.clone())
}

pub struct ScanEngine {
    store: Store,
    scanner: PortScanner,
    prober: Prober,
    scan_singleton: Singleton,
    discovery_singleton: Singleton,
    shutdown: CancellationToken,
}

impl ScanEngine {
    pub fn new(store: Store, shutdown: CancellationToken) -> Result<Arc<Self>, Error> {
        Ok(Arc::new(Self {
            store,
            scanner: PortScanner::default(),
            prober: Prober::new()?,
            scan_singleton: Singleton::new("scan"),
            discovery_singleton: Singleton::new("discovery"),
            shutdown,
        }))
    }

    pub fn scan_running(&self) -> bool {
        self.scan_singleton.is_running()
    }

    pub fn discovery_running(&self) -> bool {
        self.discovery_singleton.is_running()
    }

    /// Acquire the scan singleton, create the scan row and run the pipeline
    /// in the background. Returns the fresh `running` row; concurrent
    /// callers get [`Error::SingletonBusy`].
    pub async fn start_scan(self: &Arc<Self>) -> Result<Scan, Error> {
        let guard = self.scan_singleton.try_acquire()?;
        let network = self.store.setting_or_default("scan_network").await?;
        let scan = self.store.create_scan(&network).await?;

        let engine = self.clone();
        let row = scan.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match engine.run_pipeline(&row).await {
                Ok((hosts_found, services_found)) => {
                    tracing::info!(
                        "scan {} completed: {} hosts, {} services",
                        row.id,
                        hosts_found,
                        services_found
                    );
                    if let Err(e) = engine
                        .store
                        .complete_scan(&row.id, hosts_found, services_found)
                        .await
                    {
                        tracing::error!("could not finalise scan {}: {}", row.id, e);
                    }
                }
                Err(e) => {
                    tracing::error!("scan {} failed: {}", row.id, e);
                    if let Err(store_err) = engine.store.fail_scan(&row.id, &e.to_string()).await {
                        tracing::error!("could not finalise scan {}: {}", row.id, store_err);
                    }
                }
            }
        });

        Ok(scan)
    }

    /// Deep discovery alone, guarded by its own singleton.
    pub async fn start_discovery(self: &Arc<Self>) -> Result<(), Error> {
        let guard = self.discovery_singleton.try_acquire()?;
        let engine = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = discovery::run(&engine.store, engine.shutdown.child_token()).await {
                tracing::error!("standalone discovery failed: {}", e);
            }
        });
        Ok(())
    }

    async fn run_pipeline(&self, scan: &Scan) -> Result<(usize, usize), Error> {
        let cancel = self.shutdown.child_token();
        let ports_setting = self.store.setting_or_default("scan_ports").await?;

        // Phase 0: who answers a ping.
        let sweep_hosts = self.scanner.ping_sweep(&scan.network).await?;
        tracing::info!("phase 0: {} hosts answered the sweep", sweep_hosts.len());

        // Phase 1: SYN scan with OS detection.
        let scanned_hosts = self
            .scanner
            .port_discovery(&scan.network, &ports_setting)
            .await?;
        let scanned_ips: HashSet<String> = scanned_hosts.iter().map(|h| h.ip.clone()).collect();
        tracing::info!("phase 1: {} hosts with open ports", scanned_hosts.len());

        // Phase 1.5: quiet stored hosts get one more chance via TCP/ICMP.
        let existing = self.store.all_hosts().await?;
        let unseen: Vec<String> = existing
            .iter()
            .filter(|h| !sweep_hosts.contains_key(&h.ip) && !scanned_ips.contains(&h.ip))
            .map(|h| h.ip.clone())
            .collect();
        let liveness_hits = liveness::sweep(unseen, cancel.clone()).await;
        if !liveness_hits.is_empty() {
            tracing::info!("phase 1.5: {} quiet hosts still alive", liveness_hits.len());
        }

        let mut alive: HashSet<String> = sweep_hosts.keys().cloned().collect();
        alive.extend(scanned_ips.iter().cloned());
        alive.extend(liveness_hits.iter().cloned());

        let now = Utc::now();
        let cutoff = now - Duration::hours(GRACE_HOURS);

        // Availability and up/down transitions for everything already known.
        let mut samples: Vec<(Uuid, HostStatus)> = Vec::new();
        for host in &existing {
            if alive.contains(&host.ip) {
                self.store.mark_host_up(&host.id, now).await?;
                samples.push((host.id, HostStatus::Up));
            } else {
                self.store
                    .mark_host_down_graceful(&host.id, cutoff, now)
                    .await?;
                // The sample mirrors the grace-aware status: a host inside
                // its grace window still counts as up.
                let status = self
                    .store
                    .host_by_id(&host.id)
                    .await?
                    .map(|h| h.status)
                    .unwrap_or(HostStatus::Down);
                samples.push((
                    host.id,
                    if status == HostStatus::Down {
                        HostStatus::Down
                    } else {
                        HostStatus::Up
                    },
                ));
            }
        }
        self.store.insert_availability_samples(&samples, now).await?;
        let pruned = self
            .store
            .prune_availability_before(now - Duration::days(AVAILABILITY_RETENTION_DAYS))
            .await?;
        if pruned > 0 {
            tracing::debug!("pruned {} availability samples", pruned);
        }

        // Phase 2: persist hosts, probe and identify every open port.
        let mut services_found = 0usize;

        for (ip, sweep_info) in &sweep_hosts {
            if scanned_ips.contains(ip) {
                continue;
            }
            if let Err(e) = self
                .store
                .upsert_host(&observation_from_sweep(ip, sweep_info), now)
                .await
            {
                tracing::warn!("skipping sweep host {}: {}", ip, e);
            }
        }

        for host_record in &scanned_hosts {
            if cancel.is_cancelled() {
                return Err(Error::Transport("scan cancelled by shutdown".to_string()));
            }
            services_found += self
                .process_host(host_record, sweep_hosts.get(&host_record.ip), cutoff, &cancel)
                .await;
        }

        // Phase 3: deep discovery rides along unless disabled.
        if self.store.deep_discovery_enabled().await? {
            match self.discovery_singleton.try_acquire() {
                Ok(_guard) => {
                    discovery::run(&self.store, cancel.clone()).await?;
                }
                Err(_) => {
                    tracing::info!("deep discovery already running, skipping phase 3");
                }
            }
        }

        Ok((alive.len(), services_found))
    }

    /// Upsert one scanned host and all of its services. Store failures are
    /// logged and skip the host; a single bad row must not kill the scan.
    async fn process_host(
        &self,
        record: &HostScan,
        sweep_info: Option<&SweepHost>,
        cutoff: chrono::DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> usize {
        let now = Utc::now();
        let host = match self
            .store
            .upsert_host(&observation_from_scan(record, sweep_info), now)
            .await
        {
            Ok(host) => host,
            Err(e) => {
                tracing::warn!("skipping host {}: {}", record.ip, e);
                return 0;
            }
        };

        let ip = record.ip.clone();
        let ports = record.ports.clone();
        let prober = self.prober.clone();

        let observations = batch_scan(ports, PROBES_PER_HOST, cancel.clone(), |port| {
            let ip = ip.clone();
            let prober = prober.clone();
            async move {
                let probe = prober.probe(&ip, port.port).await;
                let identification =
                    identify::identify(port.port, &probe, port.product.as_deref());
                Some(service_observation(&port, &probe, identification))
            }
        })
        .await;

        let mut stored = 0usize;
        for observation in &observations {
            match self.store.upsert_service(&host.id, observation, now).await {
                Ok(_) => stored += 1,
                Err(e) => {
                    tracing::warn!(
                        "skipping service {}:{}: {}",
                        record.ip,
                        observation.port,
                        e
                    );
                }
            }
        }

        // Retire services this scan no longer sees — but only when the scan
        // actually saw ports here. A host whose port list came back empty
        // keeps its rows until the grace window does its work.
        if !record.ports.is_empty() {
            let seen: Vec<u16> = record.ports.iter().map(|p| p.port).collect();
            if let Err(e) = self
                .store
                .mark_services_closed_graceful(&host.id, &seen, cutoff)
                .await
            {
                tracing::warn!("could not retire services of {}: {}", record.ip, e);
            }
        }

        stored
    }
}

fn observation_from_sweep(ip: &str, sweep: &SweepHost) -> HostObservation {
    let vendor = sweep.vendor.clone().or_else(|| {
        sweep
            .mac
            .as_deref()
            .and_then(vendor_for_mac)
    });
    HostObservation {
        ip: ip.to_string(),
        hostname: sweep.hostname.clone(),
        mac: sweep.mac.clone(),
        vendor,
        os_guess: None,
    }
}

fn observation_from_scan(record: &HostScan, sweep: Option<&SweepHost>) -> HostObservation {
    let mac = record
        .mac
        .clone()
        .or_else(|| sweep.and_then(|s| s.mac.clone()));
    let vendor = record
        .vendor
        .clone()
        .or_else(|| sweep.and_then(|s| s.vendor.clone()))
        .or_else(|| mac.as_deref().and_then(vendor_for_mac));

    HostObservation {
        ip: record.ip.clone(),
        hostname: record
            .hostname
            .clone()
            .or_else(|| sweep.and_then(|s| s.hostname.clone())),
        mac,
        vendor,
        os_guess: record.os_guess.clone(),
    }
}

fn service_observation(
    port: &DiscoveredPort,
    probe: &ProbeResult,
    identification: Identification,
) -> ServiceObservation {
    let http = probe.http.as_ref();
    let banner = probe.banner.as_ref();

    let extra_info = json!({
        "matchSource": identification.match_source,
        "statusCode": http.map(|h| h.status_code),
        "icon": identification.icon,
        "protocol": http.map(|h| h.protocol),
    });

    ServiceObservation {
        port: port.port,
        service_name: port.name.clone(),
        product: identification.product.or_else(|| port.product.clone()),
        version: identification.version.or_else(|| port.version.clone()),
        info: port.extra_info.clone(),
        banner: banner.map(|b| b.text.clone()),
        http_title: http
            .and_then(|h| h.extracted.title.clone())
            .or_else(|| banner.and_then(|b| b.http_title.clone())),
        http_server: http.and_then(|h| h.headers.server.clone()),
        identified_as: Some(identification.identified_as),
        extra_info: Some(extra_info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::http::{Extracted, HttpHeaders, HttpProbe};

    fn port(p: u16) -> DiscoveredPort {
        DiscoveredPort {
            port: p,
            protocol: "tcp".to_string(),
            name: Some("http".to_string()),
            product: None,
            version: None,
            extra_info: None,
        }
    }

    #[test]
    fn service_observation_carries_match_source_and_status() {
        let probe = ProbeResult {
            http: Some(HttpProbe {
                protocol: "http",
                status_code: 200,
                headers: HttpHeaders {
                    server: Some("nginx/1.25.3".to_string()),
                    ..Default::default()
                },
                body: String::new(),
                extracted: Extracted {
                    title: Some("Grafana".to_string()),
                    ..Default::default()
                },
            }),
            banner: None,
            app_endpoint: None,
        };
        let identification = identify::identify(80, &probe, None);
        let observation = service_observation(&port(80), &probe, identification);

        assert_eq!(observation.identified_as.as_deref(), Some("Grafana"));
        assert_eq!(observation.http_server.as_deref(), Some("nginx/1.25.3"));
        let extra = observation.extra_info.unwrap();
        assert_eq!(extra["matchSource"], "title");
        assert_eq!(extra["statusCode"], 200);
    }

    #[test]
    fn scan_observation_prefers_scanner_fields_and_falls_back_to_sweep() {
        let record = HostScan {
            ip: "10.0.0.5".to_string(),
            mac: None,
            vendor: None,
            hostname: None,
            os_guess: Some("Linux 5.4".to_string()),
            ports: vec![],
        };
        let sweep = SweepHost {
            mac: Some("aa:bb:cc:dd:ee:ff".to_string()),
            vendor: Some("AVM".to_string()),
            hostname: Some("box.lan".to_string()),
        };
        let observation = observation_from_scan(&record, Some(&sweep));
        assert_eq!(observation.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(observation.vendor.as_deref(), Some("AVM"));
        assert_eq!(observation.hostname.as_deref(), Some("box.lan"));
        assert_eq!(observation.os_guess.as_deref(), Some("Linux 5.4"));
    }
}
