//! TTL source: the residual TTL of a ping reply hints at the OS family and
//! the hop distance.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::Hint;
use crate::server::error::Error;
use crate::util::batch::batch_scan;
use crate::util::exec::run_tool;

const HOST_CAP: usize = 60;
const BATCH: usize = 20;
const PER_HOST_CAP: Duration = Duration::from_secs(4);

pub struct TtlSource;

pub(crate) fn parse_ttl(output: &str) -> Option<u32> {
    let after = output.split("ttl=").nth(1)?;
    after
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()
}

/// Initial TTLs in the wild are 64 (Unix), 128 (Windows), 255 (network gear).
pub(crate) fn default_ttl_for(observed: u32) -> u32 {
    match observed {
        0..=64 => 64,
        65..=128 => 128,
        _ => 255,
    }
}

pub(crate) fn os_guess_for(default_ttl: u32) -> &'static str {
    match default_ttl {
        64 => "Linux/Unix",
        128 => "Windows",
        _ => "Network device",
    }
}

#[async_trait]
impl EvidenceSource for TtlSource {
    fn name(&self) -> &'static str {
        "ttl"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let targets: Vec<String> = ctx
            .hosts
            .iter()
            .take(HOST_CAP)
            .map(|h| h.ip.clone())
            .collect();

        let hints = batch_scan(targets, BATCH, ctx.cancel.clone(), |ip| async move {
            let output = run_tool("ping", &["-c", "1", "-W", "1", &ip], PER_HOST_CAP)
                .await
                .ok()?;
            let ttl = parse_ttl(&output.stdout)?;
            let default_ttl = default_ttl_for(ttl);
            Some(Hint::enrichment(
                ip,
                "ttl",
                json!({
                    "ttl": ttl,
                    "defaultTtl": default_ttl,
                    "hops": default_ttl.saturating_sub(ttl),
                    "osGuess": os_guess_for(default_ttl),
                }),
            ))
        })
        .await;

        Ok(hints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ttl_from_ping() {
        let output = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=254 time=0.51 ms";
        assert_eq!(parse_ttl(output), Some(254));
        assert_eq!(parse_ttl("Request timeout"), None);
    }

    #[test]
    fn default_ttl_buckets() {
        assert_eq!(default_ttl_for(62), 64);
        assert_eq!(default_ttl_for(64), 64);
        assert_eq!(default_ttl_for(116), 128);
        assert_eq!(default_ttl_for(254), 255);
        assert_eq!(os_guess_for(64), "Linux/Unix");
        assert_eq!(os_guess_for(128), "Windows");
        assert_eq!(os_guess_for(255), "Network device");
    }
}
