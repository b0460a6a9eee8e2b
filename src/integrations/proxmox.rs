//! Proxmox VE REST client.
//!
//! API tokens (`PVEAPIToken={id}={secret}`) against `/api2/json`, self-signed
//! certificates accepted. Only the token id is ever logged.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::server::error::Error;
use crate::store::ProxmoxCredentials;
use crate::util::strings::normalize_mac;

const API_TIMEOUT: Duration = Duration::from_secs(10);

/// One guest (QEMU VM or LXC container) and the MACs of its virtual NICs.
#[derive(Debug, Clone)]
pub struct GuestNics {
    pub node: String,
    pub vmid: i64,
    pub name: Option<String>,
    pub kind: &'static str,
    pub macs: Vec<String>,
}

pub struct ProxmoxClient {
    client: reqwest::Client,
    base: String,
    auth_header: String,
    token_id: String,
}

#[derive(Deserialize)]
struct ApiData<T> {
    data: T,
}

#[derive(Deserialize)]
struct NodeEntry {
    node: String,
    status: Option<String>,
}

#[derive(Deserialize)]
struct GuestEntry {
    vmid: serde_json::Value,
    name: Option<String>,
}

static NET_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^net\d+$").unwrap());
static MAC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})").unwrap());

impl ProxmoxClient {
    pub fn new(creds: &ProxmoxCredentials) -> Result<Self, Error> {
        let base = creds.api_host.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Transport(format!("proxmox client: {}", e)))?;

        Ok(Self {
            client,
            base,
            auth_header: format!("PVEAPIToken={}={}", creds.token_id, creds.token_secret),
            token_id: creds.token_id.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = format!("{}/api2/json{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth(format!(
                "proxmox rejected token {} ({})",
                self.token_id, status
            )));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("proxmox {}: {}", path, status)));
        }

        let body: ApiData<T> = response.json().await?;
        Ok(body.data)
    }

    /// Names of all online cluster nodes.
    pub async fn online_nodes(&self) -> Result<Vec<String>, Error> {
        let nodes: Vec<NodeEntry> = self.get_json("/nodes").await?;
        Ok(nodes
            .into_iter()
            .filter(|n| n.status.as_deref() == Some("online"))
            .map(|n| n.node)
            .collect())
    }

    /// All guests of all online nodes with their virtual NIC MACs.
    pub async fn guest_nics(&self) -> Result<Vec<GuestNics>, Error> {
        let mut guests = Vec::new();

        for node in self.online_nodes().await? {
            for kind in ["qemu", "lxc"] {
                let list: Vec<GuestEntry> =
                    match self.get_json(&format!("/nodes/{}/{}", node, kind)).await {
                        Ok(list) => list,
                        Err(Error::Auth(e)) => return Err(Error::Auth(e)),
                        Err(e) => {
                            tracing::debug!("proxmox {}/{} listing failed: {}", node, kind, e);
                            continue;
                        }
                    };

                for guest in list {
                    // vmid arrives as number or string depending on version.
                    let Some(vmid) = guest
                        .vmid
                        .as_i64()
                        .or_else(|| guest.vmid.as_str().and_then(|s| s.parse().ok()))
                    else {
                        continue;
                    };

                    let config: serde_json::Value = match self
                        .get_json(&format!("/nodes/{}/{}/{}/config", node, kind, vmid))
                        .await
                    {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::debug!("proxmox config for {}/{} failed: {}", kind, vmid, e);
                            continue;
                        }
                    };

                    let macs = extract_net_macs(&config);
                    guests.push(GuestNics {
                        node: node.clone(),
                        vmid,
                        name: guest.name.clone(),
                        kind: if kind == "qemu" { "qemu" } else { "lxc" },
                        macs,
                    });
                }
            }
        }

        Ok(guests)
    }
}

/// Pull every MAC out of the `net0`, `net1`, ... lines of a guest config.
fn extract_net_macs(config: &serde_json::Value) -> Vec<String> {
    let Some(map) = config.as_object() else {
        return Vec::new();
    };

    let mut macs = Vec::new();
    for (key, value) in map {
        if !NET_KEY_RE.is_match(key) {
            continue;
        }
        let Some(line) = value.as_str() else { continue };
        for caps in MAC_RE.captures_iter(line) {
            if let Some(mac) = normalize_mac(&caps[1]) {
                if !macs.contains(&mac) {
                    macs.push(mac);
                }
            }
        }
    }
    macs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_macs_from_net_lines() {
        let config = serde_json::json!({
            "net0": "virtio=BC:24:11:AA:BB:CC,bridge=vmbr0,firewall=1",
            "net1": "e1000=BC:24:11:00:11:22,bridge=vmbr1",
            "net12": "virtio=BC:24:11:AA:BB:CC,bridge=vmbr0",
            "scsi0": "local-lvm:vm-100-disk-0,size=32G",
            "netX": "virtio=FF:FF:FF:FF:FF:FF"
        });
        let macs = extract_net_macs(&config);
        assert_eq!(
            macs,
            vec![
                "bc:24:11:aa:bb:cc".to_string(),
                "bc:24:11:00:11:22".to_string()
            ]
        );
    }

    #[test]
    fn lxc_net_line_format() {
        let config = serde_json::json!({
            "net0": "name=eth0,bridge=vmbr0,hwaddr=BC:24:11:DE:AD:01,ip=dhcp"
        });
        assert_eq!(extract_net_macs(&config), vec!["bc:24:11:de:ad:01".to_string()]);
    }
}
