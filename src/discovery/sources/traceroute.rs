//! Traceroute source: the last known hop before a host is its L3 parent.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::Hint;
use crate::server::error::Error;
use crate::util::batch::batch_scan;
use crate::util::exec::run_tool;

/// At most this many hosts get a traceroute per run.
const HOST_CAP: usize = 30;
const BATCH: usize = 10;
const PER_HOST_CAP: Duration = Duration::from_secs(12);
const CONFIDENCE: u8 = 85;

pub struct TracerouteSource;

/// Hop list in order; `None` marks a `*` timeout line.
pub(crate) fn parse_hops(output: &str) -> Vec<Option<String>> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            // Hop lines start with the hop number.
            fields.next()?.parse::<u32>().ok()?;
            match fields.next() {
                Some("*") | None => Some(None),
                Some(addr) => Some(Some(addr.to_string())),
            }
        })
        .collect()
}

/// Route evidence for one target.
pub(crate) fn hints_for_route(target: &str, hops: &[Option<String>]) -> Vec<Hint> {
    // Position of the target in the hop list decides reachability.
    let Some(target_index) = hops
        .iter()
        .position(|hop| hop.as_deref() == Some(target))
    else {
        return Vec::new();
    };

    let mut hints = vec![Hint::enrichment(
        target,
        "traceroute",
        json!({
            "hops": target_index,
            "direct": target_index == 0,
        }),
    )];

    // The last resolvable hop before the target is its parent.
    if let Some(parent) = hops[..target_index]
        .iter()
        .rev()
        .flatten()
        .find(|hop| hop.as_str() != target)
    {
        hints.push(Hint::relationship(
            target,
            parent.clone(),
            "traceroute",
            CONFIDENCE,
        ));
    }

    hints
}

#[async_trait]
impl EvidenceSource for TracerouteSource {
    fn name(&self) -> &'static str {
        "traceroute"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(120)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let targets: Vec<String> = ctx
            .hosts
            .iter()
            .take(HOST_CAP)
            .map(|h| h.ip.clone())
            .collect();

        let hint_groups = batch_scan(targets, BATCH, ctx.cancel.clone(), |ip| async move {
            let output = run_tool(
                "traceroute",
                &["-n", "-m", "5", "-w", "1", "-q", "1", &ip],
                PER_HOST_CAP,
            )
            .await
            .ok()?;
            let hops = parse_hops(&output.stdout);
            Some(hints_for_route(&ip, &hops))
        })
        .await;

        Ok(hint_groups.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::hints::Hint;

    #[test]
    fn parses_hops_with_timeouts() {
        let output = "\
traceroute to 10.0.2.50 (10.0.2.50), 5 hops max
 1  192.168.1.1  0.412 ms
 2  *
 3  10.0.2.50  1.934 ms
";
        let hops = parse_hops(output);
        assert_eq!(
            hops,
            vec![Some("192.168.1.1".to_string()), None, Some("10.0.2.50".to_string())]
        );
    }

    #[test]
    fn relationship_uses_last_known_hop() {
        let hops = vec![
            Some("192.168.1.1".to_string()),
            None,
            Some("10.0.2.50".to_string()),
        ];
        let hints = hints_for_route("10.0.2.50", &hops);
        assert_eq!(hints.len(), 2);
        match &hints[1] {
            Hint::Relationship(rel) => {
                assert_eq!(rel.parent_ip, "192.168.1.1");
                assert_eq!(rel.confidence, 85);
            }
            _ => panic!("expected relationship"),
        }
    }

    #[test]
    fn zero_hop_target_is_direct_with_no_parent() {
        let hops = vec![Some("192.168.1.20".to_string())];
        let hints = hints_for_route("192.168.1.20", &hops);
        assert_eq!(hints.len(), 1);
        match &hints[0] {
            Hint::Enrichment(e) => {
                assert_eq!(e.data["direct"], true);
                assert_eq!(e.data["hops"], 0);
            }
            _ => panic!("expected enrichment"),
        }
    }

    #[test]
    fn unreached_target_yields_nothing() {
        let hops = vec![Some("192.168.1.1".to_string()), None, None];
        assert!(hints_for_route("10.9.9.9", &hops).is_empty());
    }
}
