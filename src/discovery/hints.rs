//! Evidence hints and the parent-resolution algorithm.

use std::collections::BTreeMap;

use serde_json::Value;

/// Descriptive facts one evidence source learnt about a host.
#[derive(Debug, Clone)]
pub struct EnrichmentHint {
    pub ip: String,
    pub method: &'static str,
    pub data: Value,
}

/// Evidence that `child` sits below `parent` in the topology.
#[derive(Debug, Clone)]
pub struct RelationshipHint {
    pub child_ip: String,
    pub parent_ip: String,
    pub method: &'static str,
    /// 0..=100.
    pub confidence: u8,
    /// For switch MAC-table hints: MACs learnt on the same switch port.
    pub port_mac_count: Option<u32>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Hint {
    Enrichment(EnrichmentHint),
    Relationship(RelationshipHint),
}

impl Hint {
    pub fn enrichment(ip: impl Into<String>, method: &'static str, data: Value) -> Self {
        Hint::Enrichment(EnrichmentHint {
            ip: ip.into(),
            method,
            data,
        })
    }

    pub fn relationship(
        child_ip: impl Into<String>,
        parent_ip: impl Into<String>,
        method: &'static str,
        confidence: u8,
    ) -> Self {
        Hint::Relationship(RelationshipHint {
            child_ip: child_ip.into(),
            parent_ip: parent_ip.into(),
            method,
            confidence,
            port_mac_count: None,
            detail: None,
        })
    }
}

/// Method name of the switch MAC-table source; its hints get the
/// closest-switch treatment instead of plain confidence comparison.
pub const SNMP_MAC_TABLE: &str = "snmp_mac_table";

/// The winning parent for one child after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParent {
    pub child_ip: String,
    pub parent_ip: String,
    pub method: &'static str,
    pub confidence: u8,
}

/// Resolve one winner per child IP.
///
/// Switch MAC tables first: among all switches that learnt the child's MAC,
/// the one that saw it on the emptiest port is physically closest (trunk
/// and uplink ports accumulate many MACs, edge ports few). The port
/// population rescores confidence. Every other relationship source then
/// overlays the table winner only with *strictly* higher confidence.
pub fn resolve_relationships(hints: &[Hint]) -> Vec<ResolvedParent> {
    let mut winners: BTreeMap<String, ResolvedParent> = BTreeMap::new();

    // Pass 1: SNMP MAC-table candidates, closest switch wins.
    let mut mac_table: BTreeMap<String, Vec<&RelationshipHint>> = BTreeMap::new();
    for hint in hints {
        if let Hint::Relationship(rel) = hint
            && rel.method == SNMP_MAC_TABLE
        {
            mac_table.entry(rel.child_ip.clone()).or_default().push(rel);
        }
    }

    for (child_ip, mut candidates) in mac_table {
        candidates.sort_by_key(|rel| rel.port_mac_count.unwrap_or(u32::MAX));
        let best = candidates[0];
        let confidence = match best.port_mac_count.unwrap_or(u32::MAX) {
            0..=3 => 95,
            4..=10 => 85,
            _ => 75,
        };
        winners.insert(
            child_ip.clone(),
            ResolvedParent {
                child_ip,
                parent_ip: best.parent_ip.clone(),
                method: best.method,
                confidence,
            },
        );
    }

    // Pass 2: everything else replaces only on strictly higher confidence.
    for hint in hints {
        let Hint::Relationship(rel) = hint else {
            continue;
        };
        if rel.method == SNMP_MAC_TABLE {
            continue;
        }
        if rel.child_ip == rel.parent_ip {
            continue;
        }

        match winners.get(&rel.child_ip) {
            Some(current) if current.confidence >= rel.confidence => {}
            _ => {
                winners.insert(
                    rel.child_ip.clone(),
                    ResolvedParent {
                        child_ip: rel.child_ip.clone(),
                        parent_ip: rel.parent_ip.clone(),
                        method: rel.method,
                        confidence: rel.confidence,
                    },
                );
            }
        }
    }

    winners.into_values().collect()
}

/// Merge enrichment hints into one JSON map per IP, keyed by method.
/// A method reported more than once for the same IP aggregates to a list.
pub fn merge_enrichments(hints: &[Hint]) -> BTreeMap<String, Value> {
    let mut merged: BTreeMap<String, serde_json::Map<String, Value>> = BTreeMap::new();

    for hint in hints {
        let Hint::Enrichment(enrichment) = hint else {
            continue;
        };
        let per_host = merged.entry(enrichment.ip.clone()).or_default();
        match per_host.get_mut(enrichment.method) {
            None => {
                per_host.insert(enrichment.method.to_string(), enrichment.data.clone());
            }
            Some(Value::Array(list)) => list.push(enrichment.data.clone()),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, enrichment.data.clone()]);
            }
        }
    }

    merged
        .into_iter()
        .map(|(ip, map)| (ip, Value::Object(map)))
        .collect()
}
