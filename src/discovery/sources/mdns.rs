//! mDNS source: one avahi-browse pass over all service types.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::Hint;
use crate::server::error::Error;
use crate::util::exec::run_tool;

pub struct MdnsSource;

#[derive(Debug, PartialEq)]
pub(crate) struct MdnsRecord {
    pub ip: String,
    pub name: String,
    pub service_type: String,
    pub host: String,
    pub port: u16,
}

/// Parse `avahi-browse -a -t -r -p` output. Resolved records start with `=`
/// and carry `=;iface;proto;name;type;domain;host;addr;port;txt`.
pub(crate) fn parse_avahi(output: &str) -> Vec<MdnsRecord> {
    output
        .lines()
        .filter(|line| line.starts_with('='))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(';').collect();
            if fields.len() < 9 || fields[2] != "IPv4" {
                return None;
            }
            let ip = fields[7].trim();
            ip.parse::<std::net::Ipv4Addr>().ok()?;
            Some(MdnsRecord {
                ip: ip.to_string(),
                name: fields[3].replace("\\032", " "),
                service_type: fields[4].to_string(),
                host: fields[6].to_string(),
                port: fields[8].trim().parse().unwrap_or(0),
            })
        })
        .collect()
}

#[async_trait]
impl EvidenceSource for MdnsSource {
    fn name(&self) -> &'static str {
        "mdns"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn collect(&self, _ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let output = run_tool(
            "avahi-browse",
            &["-a", "-t", "-r", "-p"],
            Duration::from_secs(20),
        )
        .await?;

        Ok(parse_avahi(&output.stdout)
            .into_iter()
            .map(|record| {
                Hint::enrichment(
                    record.ip,
                    "mdns",
                    json!({
                        "name": record.name,
                        "serviceType": record.service_type,
                        "host": record.host,
                        "port": record.port,
                    }),
                )
            })
            .collect())
    }
}
