//! UISP (Ubiquiti network controller) REST client.

use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;

use crate::server::error::Error;
use crate::util::strings::{normalize_mac, strip_cidr_suffix};

const API_TIMEOUT: Duration = Duration::from_secs(15);

/// An infrastructure device known to the controller.
#[derive(Debug, Clone)]
pub struct UispDevice {
    pub id: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub role: Option<String>,
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub active: bool,
}

/// A wireless client associated with one device.
#[derive(Debug, Clone)]
pub struct UispStation {
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub name: Option<String>,
}

pub struct UispClient {
    client: reqwest::Client,
    base: String,
    token: String,
}

#[derive(Deserialize)]
struct DeviceEntry {
    identification: DeviceIdentification,
    overview: Option<DeviceOverview>,
    #[serde(rename = "ipAddress")]
    ip_address: Option<String>,
}

#[derive(Deserialize)]
struct DeviceIdentification {
    id: String,
    name: Option<String>,
    model: Option<String>,
    role: Option<String>,
    mac: Option<String>,
}

#[derive(Deserialize)]
struct DeviceOverview {
    status: Option<String>,
}

#[derive(Deserialize)]
struct StationEntry {
    #[serde(rename = "ipAddress")]
    ip_address: Option<String>,
    mac: Option<String>,
    name: Option<String>,
}

impl UispClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Transport(format!("uisp client: {}", e)))?;

        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .header("x-auth-token", &self.token)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth(format!("uisp rejected token ({})", status)));
        }
        if !status.is_success() {
            return Err(Error::Transport(format!("uisp {}: {}", path, status)));
        }
        Ok(response.json().await?)
    }

    /// All devices (APs, switches, routers) the controller manages.
    pub async fn devices(&self) -> Result<Vec<UispDevice>, Error> {
        let entries: Vec<DeviceEntry> = self.get_json("/nms/api/v2.1/devices").await?;
        Ok(entries
            .into_iter()
            .map(|e| UispDevice {
                id: e.identification.id,
                name: e.identification.name,
                model: e.identification.model,
                role: e.identification.role,
                ip: e
                    .ip_address
                    .as_deref()
                    .map(strip_cidr_suffix)
                    .map(str::to_string),
                mac: e.identification.mac.as_deref().and_then(normalize_mac),
                active: e
                    .overview
                    .and_then(|o| o.status)
                    .map(|s| s == "active")
                    .unwrap_or(false),
            })
            .collect())
    }

    /// Wireless stations of one device. aircube and airmax expose different
    /// station endpoints; the first one that answers wins.
    pub async fn stations(&self, device_id: &str) -> Vec<UispStation> {
        for family in ["aircubes", "airmaxes"] {
            let path = format!("/nms/api/v2.1/devices/{}/{}/stations", family, device_id);
            match self.get_json::<Vec<StationEntry>>(&path).await {
                Ok(entries) => {
                    return entries
                        .into_iter()
                        .map(|e| UispStation {
                            ip: e
                                .ip_address
                                .as_deref()
                                .map(strip_cidr_suffix)
                                .map(str::to_string),
                            mac: e.mac.as_deref().and_then(normalize_mac),
                            name: e.name,
                        })
                        .collect();
                }
                Err(e) => {
                    tracing::trace!("uisp stations ({}) for {}: {}", family, device_id, e);
                }
            }
        }
        Vec::new()
    }

    /// Stations of every active device, fetched fully in parallel.
    pub async fn stations_by_device(&self, devices: &[UispDevice]) -> Vec<(UispDevice, Vec<UispStation>)> {
        let futures = devices
            .iter()
            .filter(|d| d.active)
            .map(|device| async move { (device.clone(), self.stations(&device.id).await) });
        join_all(futures).await
    }
}
