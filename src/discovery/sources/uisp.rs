//! UISP controller source: the controller already knows which AP every
//! wireless client hangs off.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::{Hint, RelationshipHint};
use crate::integrations::uisp::UispClient;
use crate::server::error::Error;

const WIRELESS_CONFIDENCE: u8 = 92;

pub struct UispSource;

#[async_trait]
impl EvidenceSource for UispSource {
    fn name(&self) -> &'static str {
        "unifi"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(45)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let Some((url, token)) = &ctx.unifi else {
            tracing::debug!("unifi source skipped, controller not configured");
            return Ok(Vec::new());
        };

        let client = UispClient::new(url, token)?;
        let devices = client.devices().await?;
        let mut hints = Vec::new();

        for device in &devices {
            let Some(device_ip) = &device.ip else { continue };
            if ctx.host_by_ip(device_ip).is_some() {
                hints.push(Hint::enrichment(
                    device_ip.clone(),
                    "unifi",
                    json!({
                        "name": device.name,
                        "model": device.model,
                        "role": device.role,
                        "active": device.active,
                    }),
                ));
            }
        }

        for (device, stations) in client.stations_by_device(&devices).await {
            let Some(device_ip) = device.ip else { continue };
            for station in stations {
                // Prefer the reported IP; fall back to a MAC lookup.
                let child_ip = station
                    .ip
                    .filter(|ip| ctx.host_by_ip(ip).is_some())
                    .or_else(|| {
                        station
                            .mac
                            .as_deref()
                            .and_then(|mac| ctx.host_by_mac(mac))
                            .map(|h| h.ip.clone())
                    });
                let Some(child_ip) = child_ip else { continue };
                if child_ip == device_ip {
                    continue;
                }
                hints.push(Hint::Relationship(RelationshipHint {
                    child_ip,
                    parent_ip: device_ip.clone(),
                    method: "unifi_wireless",
                    confidence: WIRELESS_CONFIDENCE,
                    port_mac_count: None,
                    detail: station.name,
                }));
            }
        }

        Ok(hints)
    }
}
