//! SSDP source: multicast M-SEARCH and collect whoever answers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};

use super::{DiscoveryContext, EvidenceSource};
use crate::discovery::hints::Hint;
use crate::server::error::Error;

const SSDP_ADDR: &str = "239.255.255.250:1900";
const COLLECT_WINDOW: Duration = Duration::from_secs(6);
const RESEND_AFTER: Duration = Duration::from_millis(1500);

const M_SEARCH: &[u8] = b"M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 3\r\n\
ST: ssdp:all\r\n\r\n";

pub struct SsdpSource;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct SsdpResponse {
    pub server: Option<String>,
    pub location: Option<String>,
    pub st: Option<String>,
    pub usn: Option<String>,
}

pub(crate) fn parse_response(text: &str) -> Option<SsdpResponse> {
    let mut lines = text.lines();
    let status = lines.next()?;
    if !status.starts_with("HTTP/1.1 200") && !status.starts_with("NOTIFY") {
        return None;
    }

    let mut response = SsdpResponse::default();
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_lowercase().as_str() {
            "server" => response.server = Some(value),
            "location" => response.location = Some(value),
            "st" | "nt" => response.st = Some(value),
            "usn" => response.usn = Some(value),
            _ => {}
        }
    }
    Some(response)
}

#[async_trait]
impl EvidenceSource for SsdpSource {
    fn name(&self) -> &'static str {
        "ssdp"
    }

    fn budget(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn collect(&self, ctx: &DiscoveryContext) -> Result<Vec<Hint>, Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| Error::Transport(format!("ssdp bind: {}", e)))?;

        socket
            .send_to(M_SEARCH, SSDP_ADDR)
            .await
            .map_err(|e| Error::Transport(format!("ssdp send: {}", e)))?;

        let deadline = Instant::now() + COLLECT_WINDOW;
        let resend_at = Instant::now() + RESEND_AFTER;
        let mut resent = false;

        // One response per IP; the first one wins.
        let mut responders: HashMap<String, SsdpResponse> = HashMap::new();
        let mut buf = [0u8; 4096];

        loop {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if !resent && Instant::now() >= resend_at {
                let _ = socket.send_to(M_SEARCH, SSDP_ADDR).await;
                resent = true;
            }

            let next_wakeup = if resent { deadline } else { deadline.min(resend_at) };
            match timeout_at(next_wakeup, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    let text = String::from_utf8_lossy(&buf[..len]);
                    if let Some(response) = parse_response(&text) {
                        responders.entry(from.ip().to_string()).or_insert(response);
                    }
                }
                Ok(Err(e)) => {
                    tracing::trace!("ssdp recv error: {}", e);
                    break;
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
            }
        }

        Ok(responders
            .into_iter()
            .map(|(ip, response)| {
                Hint::enrichment(
                    ip,
                    "ssdp",
                    json!({
                        "server": response.server,
                        "location": response.location,
                        "st": response.st,
                        "usn": response.usn,
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
    fn parses_msearch_response() {
        let text = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://192.168.1.1:49000/igddesc.xml\r\n\
SERVER: FRITZ!Box 7590 UPnP/1.0 AVM FRITZ!Box 7590 154.07.57\r\n\
ST: upnp:rootdevice\r\n\
USN: uuid:1234::upnp:rootdevice\r\n\r\n";
        let response = parse_response(text).unwrap();
        assert!(response.server.unwrap().contains("FRITZ!Box"));
        assert_eq!(
            response.location.as_deref(),
            Some("http://192.168.1.1:49000/igddesc.xml")
        );
        assert_eq!(response.st.as_deref(), Some("upnp:rootdevice"));
    }

    #[test]
    fn rejects_non_200() {
        assert!(parse_response("HTTP/1.1 404 Not Found\r\n\r\n").is_none());
    }
}
