//! AVM source: a FRITZ!Box knows its wireless stations and its full host
//! table. Stations the scanner has never seen are created on the fly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::{Hint, RelationshipHint};
use crate::integrations::fritzbox::Tr064Client;
use crate::server::error::Error;
use crate::store::HostObservation;

const WLAN_CONFIDENCE: u8 = 95;
const WIRED_CONFIDENCE: u8 = 88;

pub struct FritzboxSource;

#[async_trait]
impl EvidenceSource for FritzboxSource {
    fn name(&self) -> &'static str {
        "fritzbox"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(90)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let boxes = ctx.store.hosts_with_fritzbox_credentials().await?;
        if boxes.is_empty() {
            tracing::debug!("fritzbox source skipped, no credentials stored");
            return Ok(Vec::new());
        }

        let mut hints = Vec::new();

        for fritzbox in boxes {
            let Some(creds) = &fritzbox.fritzbox else {
                continue;
            };
            let client = Tr064Client::new(creds)?;

            match client.device_info().await {
                Ok(info) => {
                    hints.push(Hint::enrichment(
                        fritzbox.ip.clone(),
                        "fritzbox",
                        json!({
                            "model": info.model,
                            "firmware": info.firmware,
                            "serial": info.serial,
                        }),
                    ));
                }
                Err(e) => {
                    tracing::warn!("fritzbox {} device info failed: {}", fritzbox.ip, e);
                    // Auth or transport trouble; the station calls would
                    // fail the same way.
                    continue;
                }
            }

            match client.wlan_stations().await {
                Ok(stations) => {
                    for station in stations {
                        let child_ip = match self
                            .resolve_child(ctx, station.ip.as_deref(), Some(&station.mac), None)
                            .await
                        {
                            Some(ip) => ip,
                            None => continue,
                        };
                        if child_ip == fritzbox.ip {
                            continue;
                        }
                        hints.push(Hint::Relationship(RelationshipHint {
                            child_ip,
                            parent_ip: fritzbox.ip.clone(),
                            method: "fritzbox_wlan",
                            confidence: WLAN_CONFIDENCE,
                            port_mac_count: None,
                            detail: station
                                .signal
                                .map(|signal| format!("signal {}%", signal)),
                        }));
                    }
                }
                Err(e) => tracing::warn!("fritzbox {} wlan list failed: {}", fritzbox.ip, e),
            }

            match client.host_list().await {
                Ok(entries) => {
                    for entry in entries.into_iter().filter(|e| e.active) {
                        // Wireless links were already claimed at higher
                        // confidence by the station list.
                        let wireless = entry.interface_type.contains("802.11");
                        if wireless {
                            continue;
                        }
                        let child_ip = match self
                            .resolve_child(
                                ctx,
                                Some(&entry.ip),
                                Some(&entry.mac),
                                entry.hostname.as_deref(),
                            )
                            .await
                        {
                            Some(ip) => ip,
                            None => continue,
                        };
                        if child_ip == fritzbox.ip {
                            continue;
                        }
                        hints.push(Hint::Relationship(RelationshipHint {
                            child_ip,
                            parent_ip: fritzbox.ip.clone(),
                            method: "fritzbox_wired",
                            confidence: WIRED_CONFIDENCE,
                            port_mac_count: None,
                            detail: Some(entry.interface_type),
                        }));
                    }
                }
                Err(e) => tracing::warn!("fritzbox {} host list failed: {}", fritzbox.ip, e),
            }
        }

        Ok(hints)
    }
}

impl FritzboxSource {
    /// Find the station among known hosts, or create it: the box vouches
    /// for devices the active scan may never have caught awake.
    async fn resolve_child(
        &self,
        ctx: &DiscoveryContext,
        ip: Option<&str>,
        mac: Option<&str>,
        hostname: Option<&str>,
    ) -> Option<String> {
        if let Some(mac) = mac
            && let Some(host) = ctx.host_by_mac(mac)
        {
            return Some(host.ip.clone());
        }
        let ip = ip?;
        if ctx.host_by_ip(ip).is_some() {
            return Some(ip.to_string());
        }

        let observation = HostObservation {
            ip: ip.to_string(),
            hostname: hostname.map(str::to_string),
            mac: mac.map(str::to_string),
            ..Default::default()
        };
        match ctx.store.upsert_host(&observation, Utc::now()).await {
            Ok(host) => {
                tracing::info!("created host {} reported by fritzbox", host.ip);
                Some(host.ip)
            }
            Err(e) => {
                tracing::warn!("could not create fritzbox-reported host {}: {}", ip, e);
                None
            }
        }
    }
}
