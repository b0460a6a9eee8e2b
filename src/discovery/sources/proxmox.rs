//! Proxmox source: map guest NIC MACs onto scanned hosts; whoever carries
//! such a MAC runs under that hypervisor.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::{Hint, RelationshipHint};
use crate::integrations::proxmox::ProxmoxClient;
use crate::server::error::Error;

const CONFIDENCE: u8 = 98;

pub struct ProxmoxSource;

#[async_trait]
impl EvidenceSource for ProxmoxSource {
    fn name(&self) -> &'static str {
        "proxmox_api"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let hypervisors = ctx.store.hosts_with_proxmox_credentials().await?;
        if hypervisors.is_empty() {
            tracing::debug!("proxmox source skipped, no credentials stored");
            return Ok(Vec::new());
        }

        let mut hints = Vec::new();

        for hypervisor in hypervisors {
            let Some(creds) = &hypervisor.proxmox else {
                continue;
            };

            let guests = match ProxmoxClient::new(creds)?.guest_nics().await {
                Ok(guests) => guests,
                Err(e) => {
                    tracing::warn!("proxmox {} unreachable: {}", hypervisor.ip, e);
                    continue;
                }
            };

            let mut mapped = 0usize;
            for guest in &guests {
                for mac in &guest.macs {
                    let Some(child) = ctx.host_by_mac(mac) else {
                        continue;
                    };
                    if child.ip == hypervisor.ip {
                        continue;
                    }
                    mapped += 1;
                    hints.push(Hint::Relationship(RelationshipHint {
                        child_ip: child.ip.clone(),
                        parent_ip: hypervisor.ip.clone(),
                        method: "proxmox_api",
                        confidence: CONFIDENCE,
                        port_mac_count: None,
                        detail: guest
                            .name
                            .clone()
                            .or_else(|| Some(format!("{}/{}", guest.kind, guest.vmid))),
                    }));
                }
            }

            hints.push(Hint::enrichment(
                hypervisor.ip.clone(),
                "proxmox_api",
                json!({
                    "guests": guests.len(),
                    "mappedGuests": mapped,
                }),
            ));
        }

        Ok(hints)
    }
}
