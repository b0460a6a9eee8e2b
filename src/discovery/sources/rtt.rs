//! RTT clustering source: hosts with near-identical round-trip times tend
//! to share a physical segment. Informational only, no relationships.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::Hint;
use crate::server::error::Error;
use crate::util::batch::batch_scan;
use crate::util::exec::run_tool;

const BATCH: usize = 20;
const PER_HOST_CAP: Duration = Duration::from_secs(6);
/// Sorted-gap threshold that starts a new cluster.
const CLUSTER_GAP_MS: f64 = 0.5;

pub struct RttSource;

/// Minimum of the `time=` values in ping output, in milliseconds.
pub(crate) fn parse_min_rtt(output: &str) -> Option<f64> {
    output
        .lines()
        .filter_map(|line| {
            let after = line.split("time=").nth(1)?;
            after
                .split_whitespace()
                .next()?
                .parse::<f64>()
                .ok()
        })
        .fold(None, |min: Option<f64>, rtt| {
            Some(min.map_or(rtt, |m| m.min(rtt)))
        })
}

/// Cluster `(ip, rtt)` pairs by sorting and splitting where the gap between
/// neighbours exceeds the threshold. Returns `(ip, rtt, cluster, size)`.
pub(crate) fn cluster_rtts(mut samples: Vec<(String, f64)>) -> Vec<(String, f64, usize, usize)> {
    samples.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut cluster_of: Vec<usize> = Vec::with_capacity(samples.len());
    let mut cluster = 0usize;
    for (index, sample) in samples.iter().enumerate() {
        if index > 0 && sample.1 - samples[index - 1].1 > CLUSTER_GAP_MS {
            cluster += 1;
        }
        cluster_of.push(cluster);
    }

    let sizes: Vec<usize> = (0..=cluster)
        .map(|c| cluster_of.iter().filter(|&&x| x == c).count())
        .collect();

    samples
        .into_iter()
        .zip(cluster_of)
        .map(|((ip, rtt), c)| (ip, rtt, c, sizes[c]))
        .collect()
}

#[async_trait]
impl EvidenceSource for RttSource {
    fn name(&self) -> &'static str {
        "rtt_cluster"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(90)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let targets: Vec<String> = ctx.hosts.iter().map(|h| h.ip.clone()).collect();

        let samples = batch_scan(targets, BATCH, ctx.cancel.clone(), |ip| async move {
            let output = run_tool(
                "ping",
                &["-c", "3", "-i", "0.1", "-W", "1", &ip],
                PER_HOST_CAP,
            )
            .await
            .ok()?;
            let rtt = parse_min_rtt(&output.stdout)?;
            Some((ip, rtt))
        })
        .await;

        Ok(cluster_rtts(samples)
            .into_iter()
            .map(|(ip, rtt, cluster, size)| {
                Hint::enrichment(
                    ip,
                    "rtt_cluster",
                    json!({
                        "cluster": cluster,
                        "rtt": rtt,
                        "clusterSize": size,
                    }),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_min_of_three_pings() {
        let output = "\
64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.512 ms
64 bytes from 10.0.0.1: icmp_seq=2 ttl=64 time=0.331 ms
64 bytes from 10.0.0.1: icmp_seq=3 ttl=64 time=0.408 ms
";
        assert_eq!(parse_min_rtt(output), Some(0.331));
        assert_eq!(parse_min_rtt("no replies"), None);
    }

    #[test]
    fn clusters_split_on_gap() {
        let samples = vec![
            ("a".to_string(), 0.3),
            ("b".to_string(), 0.4),
            ("c".to_string(), 2.1),
            ("d".to_string(), 2.3),
            ("e".to_string(), 9.0),
        ];
        let clustered = cluster_rtts(samples);
        let cluster_for = |ip: &str| {
            clustered
                .iter()
                .find(|(i, ..)| i == ip)
                .map(|(_, _, c, s)| (*c, *s))
                .unwrap()
        };
        assert_eq!(cluster_for("a"), (0, 2));
        assert_eq!(cluster_for("b"), (0, 2));
        assert_eq!(cluster_for("c"), (1, 2));
        assert_eq!(cluster_for("d"), (1, 2));
        assert_eq!(cluster_for("e"), (2, 1));
    }
}
