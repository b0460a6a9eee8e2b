//! SNMP source: sysDescr/sysName enrichment plus three relationship tables
//! read off managed gear — the bridge forwarding database, LLDP neighbours
//! and the TP-Link wireless station table.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use snmp2::{AsyncSession, Oid, Value};
use tokio::time::timeout;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::{Hint, RelationshipHint, SNMP_MAC_TABLE};
use crate::server::error::Error;
use crate::store::Host;

const OP_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound on getnext steps per table walk.
const WALK_CAP: usize = 512;

const SYS_DESCR: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 1, 0];
const SYS_NAME: &[u64] = &[1, 3, 6, 1, 2, 1, 1, 5, 0];
/// BRIDGE-MIB dot1dTpFdbPort: learnt MAC -> bridge port.
const DOT1D_TP_FDB_PORT: &[u64] = &[1, 3, 6, 1, 2, 1, 17, 4, 3, 1, 2];
/// LLDP-MIB lldpRemSysName.
const LLDP_REM_SYS_NAME: &[u64] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 9];
/// TP-Link EAP wireless station table (vendor MIB).
const TPLINK_WLAN_STATION: &[u64] = &[1, 3, 6, 1, 4, 1, 11863, 6, 66, 1, 1, 1, 1, 1];

const LLDP_CONFIDENCE: u8 = 95;
const TPLINK_CONFIDENCE: u8 = 93;

pub struct SnmpSource;

#[derive(Debug, Clone)]
pub(crate) enum WalkValue {
    Int(i64),
    Bytes(Vec<u8>),
    Other,
}

fn parse_oid(dotted: &str) -> Vec<u64> {
    dotted
        .trim_start_matches('.')
        .split('.')
        .filter_map(|arc| arc.parse().ok())
        .collect()
}

pub(crate) fn mac_from_arcs(arcs: &[u64]) -> Option<String> {
    if arcs.len() != 6 || arcs.iter().any(|&a| a > 255) {
        return None;
    }
    Some(
        arcs.iter()
            .map(|a| format!("{:02x}", a))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

pub(crate) fn mac_from_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 6 {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Hints derived from one switch's forwarding database.
///
/// `fdb` maps learnt MAC -> bridge port. The number of MACs sharing the
/// port becomes `port_mac_count`, the closest-switch signal resolution
/// keys on.
pub(crate) fn fdb_hints(switch_ip: &str, fdb: &[(String, i64)], hosts: &[Host]) -> Vec<Hint> {
    let mut per_port: HashMap<i64, u32> = HashMap::new();
    for (_, port) in fdb {
        *per_port.entry(*port).or_default() += 1;
    }

    fdb.iter()
        .filter_map(|(mac, port)| {
            let child = hosts
                .iter()
                .find(|h| h.mac.as_deref() == Some(mac.as_str()))?;
            if child.ip == switch_ip {
                return None;
            }
            Some(Hint::Relationship(RelationshipHint {
                child_ip: child.ip.clone(),
                parent_ip: switch_ip.to_string(),
                method: SNMP_MAC_TABLE,
                confidence: 90,
                port_mac_count: Some(per_port.get(port).copied().unwrap_or(1)),
                detail: Some(format!("port {}", port)),
            }))
        })
        .collect()
}

/// Match LLDP neighbour sysnames against known hostnames / sysnames.
pub(crate) fn lldp_hints(
    switch_ip: &str,
    neighbours: &[String],
    names_to_ip: &HashMap<String, String>,
) -> Vec<Hint> {
    neighbours
        .iter()
        .filter_map(|name| {
            let key = name.split('.').next().unwrap_or(name).to_lowercase();
            let child_ip = names_to_ip.get(&key)?;
            if child_ip == switch_ip {
                return None;
            }
            Some(Hint::Relationship(RelationshipHint {
                child_ip: child_ip.clone(),
                parent_ip: switch_ip.to_string(),
                method: "snmp_lldp",
                confidence: LLDP_CONFIDENCE,
                port_mac_count: None,
                detail: Some(name.clone()),
            }))
        })
        .collect()
}

async fn get_string(session: &mut AsyncSession, oid_arcs: &[u64]) -> Option<String> {
    let oid = Oid::from(oid_arcs).ok()?;
    let mut response = timeout(OP_TIMEOUT, session.get(&oid)).await.ok()?.ok()?;
    match response.varbinds.next()? {
        (_, Value::OctetString(bytes)) => Some(String::from_utf8_lossy(bytes).trim().to_string()),
        _ => None,
    }
}

async fn walk(session: &mut AsyncSession, base: &[u64]) -> Vec<(Vec<u64>, WalkValue)> {
    let mut results = Vec::new();
    let mut current: Vec<u64> = base.to_vec();

    for _ in 0..WALK_CAP {
        let Ok(oid) = Oid::from(current.as_slice()) else {
            break;
        };
        let response = match timeout(OP_TIMEOUT, session.getnext(&oid)).await {
            Ok(Ok(response)) => response,
            _ => break,
        };

        let mut pdu = response;
        let Some((next_oid, value)) = pdu.varbinds.next() else {
            break;
        };
        let next = parse_oid(&next_oid.to_string());
        if !next.starts_with(base) || next == current {
            break;
        }

        let value = match value {
            Value::Integer(i) => WalkValue::Int(i),
            Value::OctetString(bytes) => WalkValue::Bytes(bytes.to_vec()),
            _ => WalkValue::Other,
        };
        results.push((next.clone(), value));
        current = next;
    }

    results
}

/// Open a v2c session with the first community the device accepts.
async fn open_session(ip: &str, communities: &[String]) -> Option<(AsyncSession, String)> {
    let target = format!("{}:161", ip);
    for community in communities {
        let Ok(mut session) =
            AsyncSession::new_v2c(&target, community.as_bytes(), 0).await
        else {
            continue;
        };
        if get_string(&mut session, SYS_DESCR).await.is_some() {
            return Some((session, community.clone()));
        }
    }
    None
}

#[async_trait]
impl EvidenceSource for SnmpSource {
    fn name(&self) -> &'static str {
        "snmp"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(180)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let mut hints = Vec::new();

        // Hostname -> ip lookup for LLDP matching; sysNames join as they
        // are learnt.
        let mut names_to_ip: HashMap<String, String> = ctx
            .hosts
            .iter()
            .filter_map(|h| {
                let name = h.hostname.as_deref()?;
                Some((
                    name.split('.').next().unwrap_or(name).to_lowercase(),
                    h.ip.clone(),
                ))
            })
            .collect();

        // Agents are polled one after another: SNMP gear tends to rate-limit
        // and parallel walks distort the port counters.
        for host in &ctx.hosts {
            if ctx.cancel.is_cancelled() {
                break;
            }

            let Some((mut session, community)) = open_session(&host.ip, &ctx.communities).await
            else {
                continue;
            };

            let sys_descr = get_string(&mut session, SYS_DESCR).await;
            let sys_name = get_string(&mut session, SYS_NAME).await;

            if let Some(name) = &sys_name {
                names_to_ip
                    .entry(name.split('.').next().unwrap_or(name).to_lowercase())
                    .or_insert_with(|| host.ip.clone());
            }

            tracing::debug!(
                "snmp agent {} answered (community '{}')",
                host.ip,
                community
            );
            hints.push(Hint::enrichment(
                host.ip.clone(),
                "snmp",
                json!({
                    "sysDescr": sys_descr,
                    "sysName": sys_name,
                }),
            ));

            // Bridge forwarding database.
            let fdb: Vec<(String, i64)> = walk(&mut session, DOT1D_TP_FDB_PORT)
                .await
                .into_iter()
                .filter_map(|(arcs, value)| {
                    let mac = mac_from_arcs(&arcs[DOT1D_TP_FDB_PORT.len()..])?;
                    match value {
                        WalkValue::Int(port) => Some((mac, port)),
                        _ => None,
                    }
                })
                .collect();
            hints.extend(fdb_hints(&host.ip, &fdb, &ctx.hosts));

            // LLDP neighbours.
            let neighbours: Vec<String> = walk(&mut session, LLDP_REM_SYS_NAME)
                .await
                .into_iter()
                .filter_map(|(_, value)| match value {
                    WalkValue::Bytes(bytes) => {
                        Some(String::from_utf8_lossy(&bytes).trim().to_string())
                    }
                    _ => None,
                })
                .filter(|name| !name.is_empty())
                .collect();
            hints.extend(lldp_hints(&host.ip, &neighbours, &names_to_ip));

            // TP-Link wireless stations (vendor MIB on EAP access points).
            for (arcs, value) in walk(&mut session, TPLINK_WLAN_STATION).await {
                let mac = match value {
                    WalkValue::Bytes(bytes) => mac_from_bytes(&bytes),
                    _ => mac_from_arcs(&arcs[arcs.len().saturating_sub(6)..]),
                };
                let Some(mac) = mac else { continue };
                let Some(station) = ctx.host_by_mac(&mac) else {
                    continue;
                };
                if station.ip == host.ip {
                    continue;
                }
                hints.push(Hint::Relationship(RelationshipHint {
                    child_ip: station.ip.clone(),
                    parent_ip: host.ip.clone(),
                    method: "snmp_tplink_wlan",
                    confidence: TPLINK_CONFIDENCE,
                    port_mac_count: None,
                    detail: Some(mac),
                }));
            }
        }

        Ok(hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HostStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn host(ip: &str, mac: Option<&str>, hostname: Option<&str>) -> Host {
        let now = Utc::now();
        Host {
            id: Uuid::new_v4(),
            ip: ip.to_string(),
            hostname: hostname.map(str::to_string),
            mac: mac.map(str::to_string),
            vendor: None,
            os_guess: None,
            status: HostStatus::Up,
            device_type: None,
            parent_host_id: None,
            discovery_info: None,
            proxmox: None,
            fritzbox: None,
            first_seen: now,
            last_seen: now,
            updated_at: now,
        }
    }

    #[test]
    fn mac_conversion() {
        assert_eq!(
            mac_from_arcs(&[188, 36, 17, 170, 187, 204]).as_deref(),
            Some("bc:24:11:aa:bb:cc")
        );
        assert!(mac_from_arcs(&[1, 2, 3]).is_none());
        assert!(mac_from_arcs(&[300, 1, 2, 3, 4, 5]).is_none());
        assert_eq!(
            mac_from_bytes(&[0xbc, 0x24, 0x11, 0, 1, 2]).as_deref(),
            Some("bc:24:11:00:01:02")
        );
    }

    #[test]
    fn fdb_counts_macs_per_port() {
        let hosts = vec![
            host("10.0.0.50", Some("aa:aa:aa:aa:aa:01"), None),
            host("10.0.0.51", Some("aa:aa:aa:aa:aa:02"), None),
        ];
        // Port 1 is an edge port with one MAC, port 24 an uplink with three.
        let fdb = vec![
            ("aa:aa:aa:aa:aa:01".to_string(), 1),
            ("aa:aa:aa:aa:aa:02".to_string(), 24),
            ("aa:aa:aa:aa:aa:03".to_string(), 24),
            ("aa:aa:aa:aa:aa:04".to_string(), 24),
        ];
        let hints = fdb_hints("10.0.0.2", &fdb, &hosts);
        assert_eq!(hints.len(), 2);
        let counts: Vec<u32> = hints
            .iter()
            .map(|h| match h {
                Hint::Relationship(rel) => rel.port_mac_count.unwrap(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(counts, vec![1, 3]);
    }

    #[test]
    fn lldp_matches_short_hostname() {
        let mut names = HashMap::new();
        names.insert("ap-garage".to_string(), "10.0.0.77".to_string());
        let hints = lldp_hints(
            "10.0.0.2",
            &["AP-Garage.fritz.box".to_string(), "unknown-device".to_string()],
            &names,
        );
        assert_eq!(hints.len(), 1);
        match &hints[0] {
            Hint::Relationship(rel) => {
                assert_eq!(rel.child_ip, "10.0.0.77");
                assert_eq!(rel.confidence, 95);
            }
            _ => panic!(),
        }
    }
}
