//! AVM TR-064 client: SOAP over TCP:49000 with digest authentication.

use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;

use super::digest::{self, DigestChallenge};
use crate::server::error::Error;
use crate::store::FritzboxCredentials;
use crate::util::strings::{normalize_mac, strip_nul};

const SOAP_TIMEOUT: Duration = Duration::from_secs(10);
const TR064_PORT: u16 = 49000;
/// Association indices probed before giving up on the WLAN station list.
const MAX_WLAN_INDEX: u32 = 30;

#[derive(Debug, Clone, Default)]
pub struct FritzDeviceInfo {
    pub model: Option<String>,
    pub firmware: Option<String>,
    pub serial: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WlanStation {
    pub mac: String,
    pub ip: Option<String>,
    pub signal: Option<i64>,
    pub speed: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct KnownHost {
    pub ip: String,
    pub mac: String,
    pub hostname: Option<String>,
    pub interface_type: String,
    pub active: bool,
}

pub struct Tr064Client {
    client: reqwest::Client,
    base: String,
    username: String,
    password: String,
}

struct SoapService {
    path: &'static str,
    urn: &'static str,
}

const DEVICE_INFO: SoapService = SoapService {
    path: "/upnp/control/deviceinfo",
    urn: "urn:dslforum-org:service:DeviceInfo:1",
};
const WLAN_CONFIG: SoapService = SoapService {
    path: "/upnp/control/wlanconfig1",
    urn: "urn:dslforum-org:service:WLANConfiguration:1",
};
const HOSTS: SoapService = SoapService {
    path: "/upnp/control/hosts1",
    urn: "urn:dslforum-org:service:Hosts:1",
};

impl Tr064Client {
    pub fn new(creds: &FritzboxCredentials) -> Result<Self, Error> {
        let host = creds
            .host
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        let base = if host.contains(':') {
            format!("http://{}", host)
        } else {
            format!("http://{}:{}", host, TR064_PORT)
        };

        let client = reqwest::Client::builder()
            .timeout(SOAP_TIMEOUT)
            .build()
            .map_err(|e| Error::Transport(format!("tr064 client: {}", e)))?;

        Ok(Self {
            client,
            base,
            username: creds.username.clone(),
            password: creds.password.clone(),
        })
    }

    fn envelope(service: &SoapService, action: &str, arguments: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body><u:{action} xmlns:u="{urn}">{arguments}</u:{action}></s:Body>
</s:Envelope>"#,
            action = action,
            urn = service.urn,
            arguments = arguments,
        )
    }

    /// One SOAP call with the two-step digest dance: the first request comes
    /// back 401 with a challenge, the retry answers it.
    async fn soap_call(
        &self,
        service: &SoapService,
        action: &str,
        arguments: &str,
    ) -> Result<String, Error> {
        let url = format!("{}{}", self.base, service.path);
        let soap_action = format!("{}#{}", service.urn, action);
        let body = Self::envelope(service, action, arguments);

        let first = self
            .client
            .post(&url)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPAction", soap_action.clone())
            .body(body.clone())
            .send()
            .await?;

        let response = if first.status() == StatusCode::UNAUTHORIZED {
            let challenge_header = first
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| Error::Auth("401 without digest challenge".to_string()))?;
            let challenge = DigestChallenge::parse(challenge_header)?;
            let cnonce = format!("{:08x}", std::process::id() ^ 0x6e63_6174);
            let authorization = digest::authorization_header(
                &challenge,
                &self.username,
                &self.password,
                "POST",
                service.path,
                &cnonce,
            );

            let retry = self
                .client
                .post(&url)
                .header("Content-Type", "text/xml; charset=\"utf-8\"")
                .header("SOAPAction", soap_action)
                .header("Authorization", authorization)
                .body(body)
                .send()
                .await?;

            if retry.status() == StatusCode::UNAUTHORIZED {
                return Err(Error::Auth(format!(
                    "digest challenge exhausted for {}",
                    action
                )));
            }
            retry
        } else {
            first
        };

        Ok(response.text().await?)
    }

    pub async fn device_info(&self) -> Result<FritzDeviceInfo, Error> {
        let body = self.soap_call(&DEVICE_INFO, "GetInfo", "").await?;
        if is_soap_fault(&body) {
            return Err(Error::Parse("DeviceInfo#GetInfo returned a fault".to_string()));
        }
        Ok(FritzDeviceInfo {
            model: xml_tag(&body, "NewModelName"),
            firmware: xml_tag(&body, "NewSoftwareVersion"),
            serial: xml_tag(&body, "NewSerialNumber"),
        })
    }

    /// Iterate the associated-device table until the box faults out.
    pub async fn wlan_stations(&self) -> Result<Vec<WlanStation>, Error> {
        let mut stations = Vec::new();

        for index in 0..MAX_WLAN_INDEX {
            let arguments = format!(
                "<NewAssociatedDeviceIndex>{}</NewAssociatedDeviceIndex>",
                index
            );
            let body = self
                .soap_call(&WLAN_CONFIG, "GetGenericAssociatedDeviceInfo", &arguments)
                .await?;

            if is_soap_fault(&body) {
                break;
            }

            let Some(mac) =
                xml_tag(&body, "NewAssociatedDeviceMACAddress").and_then(|m| normalize_mac(&m))
            else {
                break;
            };

            stations.push(WlanStation {
                mac,
                ip: xml_tag(&body, "NewAssociatedDeviceIPAddress").filter(|v| !v.is_empty()),
                signal: xml_tag(&body, "NewX_AVM-DE_SignalStrength")
                    .and_then(|v| v.parse().ok()),
                speed: xml_tag(&body, "NewX_AVM-DE_Speed").and_then(|v| v.parse().ok()),
            });
        }

        Ok(stations)
    }

    /// Full wired+wireless host list.
    pub async fn host_list(&self) -> Result<Vec<KnownHost>, Error> {
        let body = self.soap_call(&HOSTS, "GetHostList", "").await?;
        if is_soap_fault(&body) {
            return Err(Error::Parse("Hosts#GetHostList returned a fault".to_string()));
        }
        Ok(parse_host_list(&body))
    }
}

/// Extract the text content of a single XML tag.
fn xml_tag(body: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?s)<{tag}>\s*(.*?)\s*</{tag}>",
        tag = regex::escape(tag)
    ))
    .ok()?;
    re.captures(body).map(|c| strip_nul(c[1].trim()))
}

fn is_soap_fault(body: &str) -> bool {
    body.contains(":Fault>") || body.contains("<Fault>") || body.contains("UPnPError")
}

/// Parse the CSV host list: `ip,mac,hostname,interfaceType,active,...`.
fn parse_host_list(body: &str) -> Vec<KnownHost> {
    body.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().split(',').collect();
            if fields.len() < 5 {
                return None;
            }
            let ip = fields[0].trim();
            let mac = normalize_mac(fields[1].trim())?;
            if ip.parse::<std::net::Ipv4Addr>().is_err() {
                return None;
            }
            Some(KnownHost {
                ip: ip.to_string(),
                mac,
                hostname: Some(fields[2].trim().to_string()).filter(|h| !h.is_empty()),
                interface_type: fields[3].trim().to_string(),
                active: matches!(fields[4].trim(), "1" | "true" | "active"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_device_info_tags() {
        let body = r#"<s:Envelope><s:Body><u:GetInfoResponse>
<NewModelName>FRITZ!Box 7590</NewModelName>
<NewSoftwareVersion>154.07.57</NewSoftwareVersion>
<NewSerialNumber>ABC123</NewSerialNumber>
</u:GetInfoResponse></s:Body></s:Envelope>"#;
        assert_eq!(xml_tag(body, "NewModelName").as_deref(), Some("FRITZ!Box 7590"));
        assert_eq!(xml_tag(body, "NewSoftwareVersion").as_deref(), Some("154.07.57"));
        assert!(!is_soap_fault(body));
    }

    #[test]
    fn detects_soap_fault() {
        let fault = r#"<s:Envelope><s:Body><s:Fault>
<faultcode>s:Client</faultcode><detail><UPnPError><errorCode>713</errorCode></UPnPError></detail>
</s:Fault></s:Body></s:Envelope>"#;
        assert!(is_soap_fault(fault));
    }

    #[test]
    fn parses_host_list_csv() {
        let csv = "192.168.178.20,AA:BB:CC:DD:EE:01,laptop,802.11,1,extra\n\
                   192.168.178.21,aa-bb-cc-dd-ee-02,,Ethernet,0\n\
                   garbage line\n\
                   not-an-ip,AA:BB:CC:DD:EE:03,x,Ethernet,1";
        let hosts = parse_host_list(csv);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].ip, "192.168.178.20");
        assert_eq!(hosts[0].mac, "aa:bb:cc:dd:ee:01");
        assert_eq!(hosts[0].interface_type, "802.11");
        assert!(hosts[0].active);
        assert_eq!(hosts[1].hostname, None);
        assert!(!hosts[1].active);
    }
}
