//! ARP table source: hosts in the local ARP cache are on a directly
//! attached L2 segment.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::Hint;
use crate::server::error::Error;
use crate::util::exec::run_tool;
use crate::util::strings::normalize_mac;

pub struct ArpSource;

#[derive(Debug, PartialEq)]
pub(crate) struct ArpEntry {
    pub ip: String,
    pub mac: String,
    pub iface: String,
}

/// `? (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on eth0`
pub(crate) fn parse_arp_table(output: &str) -> Vec<ArpEntry> {
    output
        .lines()
        .filter_map(|line| {
            let ip = line.split('(').nth(1)?.split(')').next()?.trim();
            let after_at = line.split(" at ").nth(1)?;
            let mac = normalize_mac(after_at.split_whitespace().next()?)?;
            let iface = line
                .split(" on ")
                .nth(1)
                .map(|i| i.split_whitespace().next().unwrap_or(""))
                .unwrap_or("")
                .to_string();
            Some(ArpEntry {
                ip: ip.to_string(),
                mac,
                iface,
            })
        })
        .collect()
}

#[async_trait]
impl EvidenceSource for ArpSource {
    fn name(&self) -> &'static str {
        "arp"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let output = run_tool("arp", &["-an"], Duration::from_secs(5)).await?;
        let entries = parse_arp_table(&output.stdout);

        let hints = entries
            .into_iter()
            .filter(|entry| ctx.host_by_ip(&entry.ip).is_some())
            .map(|entry| {
                Hint::enrichment(
                    entry.ip,
                    "arp",
                    json!({
                        "mac": entry.mac,
                        "iface": entry.iface,
                        "l2_direct": true,
                    }),
                )
            })
            .collect();

        Ok(hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_linux_arp_output() {
        let output = "\
? (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on eth0
? (192.168.1.7) at <incomplete> on eth0
gateway (10.0.0.1) at 11:22:33:44:55:66 [ether] on wlan0
";
        let entries = parse_arp_table(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ip, "192.168.1.1");
        assert_eq!(entries[0].mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entries[0].iface, "eth0");
        assert_eq!(entries[1].iface, "wlan0");
    }
}
