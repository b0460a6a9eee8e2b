//! Per-port deep identification probe.
//!
//! Stateless and reentrant; the scan engine runs up to eight probes per
//! host concurrently.

pub mod banner;
pub mod endpoints;
pub mod http;
pub mod patterns;

use crate::identify::signatures;
use crate::server::error::Error;

pub use banner::BannerProbe;
pub use http::{Extracted, HttpHeaders, HttpProbe};

/// Everything one probe learned about `(ip, port)`.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub http: Option<HttpProbe>,
    pub banner: Option<BannerProbe>,
    /// Application named by the endpoint matcher, when it ran and hit.
    pub app_endpoint: Option<&'static str>,
}

#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            client: http::build_client()
                .map_err(|e| Error::Transport(format!("probe client: {}", e)))?,
        })
    }

    /// Probe one open port. HTTP is tried first over both schemes; only
    /// when neither answers does the raw banner path run.
    pub async fn probe(&self, ip: &str, port: u16) -> ProbeResult {
        let mut result = ProbeResult::default();

        // Plain HTTP is the more common scheme on a LAN; HTTPS second.
        for protocol in ["http", "https"] {
            if let Some(probe) = http::fetch(&self.client, protocol, ip, port).await {
                result.http = Some(probe);
                break;
            }
        }

        match &result.http {
            Some(http_probe) => {
                let title_known = http_probe
                    .extracted
                    .title
                    .as_deref()
                    .and_then(signatures::match_title)
                    .is_some();
                let pattern_known = !http_probe.extracted.patterns.is_empty();

                if !title_known && !pattern_known {
                    let base = format!("{}://{}:{}", http_probe.protocol, ip, port);
                    result.app_endpoint = endpoints::probe_endpoints(&self.client, &base).await;
                }
            }
            None => {
                result.banner = banner::grab(ip, port).await;
            }
        }

        result
    }
}
