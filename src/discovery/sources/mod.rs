//! The ten evidence sources deep discovery fuses.
//!
//! Every source is contained: transport, parse and auth failures as well as
//! missing external tools degrade that one source to zero hints, never the
//! whole run.

pub mod arp;
pub mod fritzbox;
pub mod mdns;
pub mod proxmox;
pub mod rtt;
pub mod snmp;
pub mod ssdp;
pub mod traceroute;
pub mod ttl;
pub mod uisp;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::discovery::hints::Hint;
use crate::server::error::Error;
use crate::store::{Host, Store};
use crate::util::exec::run_tool;

/// Snapshot handed to every source at the start of a discovery run.
pub struct DiscoveryContext {
    pub store: Store,
    /// Hosts known when the run started, in stable ip order.
    pub hosts: Vec<Host>,
    /// SNMP communities, tried in order.
    pub communities: Vec<String>,
    /// UISP controller `(url, token)` when configured.
    pub unifi: Option<(String, String)>,
    pub cancel: CancellationToken,
}

impl DiscoveryContext {
    pub fn host_by_ip(&self, ip: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.ip == ip)
    }

    pub fn host_by_mac(&self, mac: &str) -> Option<&Host> {
        self.hosts
            .iter()
            .find(|h| h.mac.as_deref() == Some(mac))
    }
}

#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Wall-clock budget for the whole source.
    fn budget(&self) -> Duration;

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error>;
}

/// The default gateway of the scanning machine, from `ip route show default`.
pub async fn default_gateway_ip() -> Option<String> {
    let output = run_tool("ip", &["route", "show", "default"], Duration::from_secs(5))
        .await
        .ok()?;
    parse_default_route(&output.stdout)
}

pub(crate) fn parse_default_route(output: &str) -> Option<String> {
    // "default via 192.168.1.1 dev eth0 proto dhcp metric 100"
    let line = output.lines().find(|l| l.trim_start().starts_with("default"))?;
    let mut fields = line.split_whitespace();
    while let Some(field) = fields.next() {
        if field == "via" {
            return fields.next().map(str::to_string);
        }
    }
    None
}
