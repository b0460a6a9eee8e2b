//! External port-scanner driver.
//!
//! Invokes nmap for the liveness sweep and the SYN port-discovery pass and
//! parses its `-oX -` output. Version probing (`-sV`) is deliberately not
//! requested; per-port identification is the Prober's job.

use std::collections::HashMap;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::server::error::Error;
use crate::util::exec::run_tool;
use crate::util::strings::normalize_mac;

pub const SWEEP_CAP: Duration = Duration::from_secs(120);
pub const DISCOVERY_CAP: Duration = Duration::from_secs(30 * 60);

/// What the ping sweep knows about one live host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepHost {
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
}

/// An open TCP port as reported by the SYN scan. Version fields stay empty
/// without `-sV`; they are kept because nmap still guesses `name`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredPort {
    pub port: u16,
    pub protocol: String,
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extra_info: Option<String>,
}

/// One live host from the port-discovery pass.
#[derive(Debug, Clone, Default)]
pub struct HostScan {
    pub ip: String,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
    pub os_guess: Option<String>,
    pub ports: Vec<DiscoveredPort>,
}

#[derive(Debug, Clone)]
pub struct PortScanner {
    binary: String,
}

impl Default for PortScanner {
    fn default() -> Self {
        Self {
            binary: "nmap".to_string(),
        }
    }
}

impl PortScanner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Ping-only sweep of a network. Two-minute wall-clock cap.
    pub async fn ping_sweep(&self, cidr: &str) -> Result<HashMap<String, SweepHost>, Error> {
        let args = ["-sn", "-T4", "--max-retries", "2", "-oX", "-", cidr];
        let output = run_tool(&self.binary, &args, SWEEP_CAP).await?;

        let hosts = parse_scan_xml(&output.stdout)?;
        Ok(hosts
            .into_iter()
            .map(|h| {
                (
                    h.ip,
                    SweepHost {
                        mac: h.mac,
                        vendor: h.vendor,
                        hostname: h.hostname,
                    },
                )
            })
            .collect())
    }

    /// SYN scan with OS detection. The sweep already decided host liveness,
    /// so nmap's own host discovery is skipped (`-Pn`).
    pub async fn port_discovery(
        &self,
        cidr: &str,
        port_range: &str,
    ) -> Result<Vec<HostScan>, Error> {
        let args = [
            "-sS",
            "-Pn",
            "-O",
            "--osscan-limit",
            "-T4",
            "-p",
            port_range,
            "--open",
            "-oX",
            "-",
            "--max-retries",
            "3",
            "--host-timeout",
            "90s",
            "--min-rate",
            "200",
            cidr,
        ];
        let output = run_tool(&self.binary, &args, DISCOVERY_CAP).await?;
        if !output.success {
            tracing::warn!(
                "port scanner exited non-zero, parsing partial output ({} bytes)",
                output.stdout.len()
            );
        }
        parse_scan_xml(&output.stdout)
    }
}

/// Parse nmap XML into live hosts with open TCP ports.
///
/// Tolerates truncated documents: hosts parsed before the document breaks
/// off are returned. Output that never opens an `<nmaprun>` element is an
/// error — there is nothing to salvage.
pub fn parse_scan_xml(xml: &str) -> Result<Vec<HostScan>, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut hosts = Vec::new();
    let mut saw_nmaprun = false;
    let mut current: Option<HostScan> = None;
    let mut current_up = false;
    let mut best_os_accuracy: i64 = -1;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let name = e.name();
                match name.as_ref() {
                    b"nmaprun" => saw_nmaprun = true,
                    b"host" => {
                        current = Some(HostScan::default());
                        current_up = false;
                        best_os_accuracy = -1;
                    }
                    b"status" => {
                        if current.is_some() {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"state" {
                                    current_up = attr.value.as_ref() == b"up";
                                }
                            }
                        }
                    }
                    b"address" => {
                        if let Some(ref mut host) = current {
                            let mut addr_type = String::new();
                            let mut addr_val = String::new();
                            let mut vendor = None;
                            for attr in e.attributes().flatten() {
                                let val = String::from_utf8_lossy(&attr.value).to_string();
                                match attr.key.as_ref() {
                                    b"addrtype" => addr_type = val,
                                    b"addr" => addr_val = val,
                                    b"vendor" => vendor = Some(val),
                                    _ => {}
                                }
                            }
                            match addr_type.as_str() {
                                "ipv4" => host.ip = addr_val,
                                "mac" => {
                                    host.mac = normalize_mac(&addr_val);
                                    if vendor.is_some() {
                                        host.vendor = vendor;
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    b"hostname" => {
                        if let Some(ref mut host) = current
                            && host.hostname.is_none()
                        {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"name" {
                                    host.hostname =
                                        Some(String::from_utf8_lossy(&attr.value).to_string());
                                }
                            }
                        }
                    }
                    b"port" => {
                        if let Some(ref mut host) = current {
                            let mut port = DiscoveredPort::default();
                            for attr in e.attributes().flatten() {
                                let val = String::from_utf8_lossy(&attr.value).to_string();
                                match attr.key.as_ref() {
                                    b"portid" => port.port = val.parse().unwrap_or(0),
                                    b"protocol" => port.protocol = val,
                                    _ => {}
                                }
                            }
                            host.ports.push(port);
                        }
                    }
                    b"state" => {
                        if let Some(ref mut host) = current
                            && let Some(last) = host.ports.last_mut()
                        {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"state"
                                    && attr.value.as_ref() != b"open"
                                {
                                    // --open should filter these, but be safe.
                                    last.port = 0;
                                }
                            }
                        }
                    }
                    b"service" => {
                        if let Some(ref mut host) = current
                            && let Some(last) = host.ports.last_mut()
                        {
                            for attr in e.attributes().flatten() {
                                let val = String::from_utf8_lossy(&attr.value).to_string();
                                if val.is_empty() {
                                    continue;
                                }
                                match attr.key.as_ref() {
                                    b"name" => last.name = Some(val),
                                    b"product" => last.product = Some(val),
                                    b"version" => last.version = Some(val),
                                    b"extrainfo" => last.extra_info = Some(val),
                                    _ => {}
                                }
                            }
                        }
                    }
                    b"osmatch" => {
                        if let Some(ref mut host) = current {
                            let mut os_name = None;
                            let mut accuracy: i64 = 0;
                            for attr in e.attributes().flatten() {
                                let val = String::from_utf8_lossy(&attr.value).to_string();
                                match attr.key.as_ref() {
                                    b"name" => os_name = Some(val),
                                    b"accuracy" => accuracy = val.parse().unwrap_or(0),
                                    _ => {}
                                }
                            }
                            if accuracy > best_os_accuracy
                                && let Some(os_name) = os_name
                            {
                                best_os_accuracy = accuracy;
                                host.os_guess = Some(os_name);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"host"
                    && let Some(mut host) = current.take()
                {
                    host.ports.retain(|p| p.port != 0 && p.protocol == "tcp");
                    if current_up && !host.ip.is_empty() {
                        hosts.push(host);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                // Truncated document from a killed scanner: keep what parsed.
                if saw_nmaprun {
                    tracing::warn!("scanner XML broke off, keeping {} hosts: {}", hosts.len(), e);
                    break;
                }
                return Err(Error::Parse(format!("scanner XML: {}", e)));
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_nmaprun {
        return Err(Error::Parse(
            "scanner produced no usable output".to_string(),
        ));
    }

    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_an_error() {
        assert!(parse_scan_xml("").is_err());
        assert!(parse_scan_xml("plain text, no xml").is_err());
    }

    #[test]
    fn parses_host_with_ports_and_os() {
        let xml = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
  <host>
    <status state="up"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac" vendor="AVM GmbH"/>
    <hostnames><hostname name="fritz.box" type="PTR"/><hostname name="alt.box" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="80">
        <state state="open"/>
        <service name="http"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="open"/>
        <service name="https" product="nginx"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 4.15" accuracy="92"/>
      <osmatch name="Linux 5.4" accuracy="96"/>
    </os>
  </host>
</nmaprun>"#;
        let hosts = parse_scan_xml(xml).unwrap();
        assert_eq!(hosts.len(), 1);
        let host = &hosts[0];
        assert_eq!(host.ip, "192.168.1.1");
        assert_eq!(host.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(host.vendor.as_deref(), Some("AVM GmbH"));
        assert_eq!(host.hostname.as_deref(), Some("fritz.box"));
        assert_eq!(host.os_guess.as_deref(), Some("Linux 5.4"));
        assert_eq!(host.ports.len(), 2);
        assert_eq!(host.ports[1].product.as_deref(), Some("nginx"));
    }

    #[test]
    fn down_hosts_are_dropped() {
        let xml = r#"<nmaprun><host><status state="down"/><address addr="10.0.0.9" addrtype="ipv4"/></host></nmaprun>"#;
        assert!(parse_scan_xml(xml).unwrap().is_empty());
    }

    #[test]
    fn truncated_document_keeps_parsed_hosts() {
        let xml = r#"<nmaprun>
  <host><status state="up"/><address addr="10.0.0.1" addrtype="ipv4"/></host>
  <host><status state="up"/><address addr="10.0.0.2" addrtype="ipv4"/></hos"#;
        let hosts = parse_scan_xml(xml).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].ip, "10.0.0.1");
    }

    #[test]
    fn non_tcp_and_closed_ports_are_dropped() {
        let xml = r#"<nmaprun><host>
  <status state="up"/><address addr="10.0.0.3" addrtype="ipv4"/>
  <ports>
    <port protocol="udp" portid="53"><state state="open"/></port>
    <port protocol="tcp" portid="22"><state state="filtered"/></port>
    <port protocol="tcp" portid="80"><state state="open"/></port>
  </ports>
</host></nmaprun>"#;
        let hosts = parse_scan_xml(xml).unwrap();
        assert_eq!(hosts[0].ports.len(), 1);
        assert_eq!(hosts[0].ports[0].port, 80);
    }
}
