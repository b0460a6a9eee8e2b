use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{self, Classification};
use crate::server::config::AppState;
use crate::server::error::Error;
use crate::store::{
    AvailabilitySample, FritzboxCredentials, Host, ProxmoxCredentials, Scan, Service,
    SettingsBatch,
};

/// A host as the dashboard sees it: row, services, computed classification
/// and credential presence flags (never the secrets themselves).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostView {
    #[serde(flatten)]
    pub host: Host,
    pub services: Vec<Service>,
    pub classification: Classification,
    pub has_proxmox_credentials: bool,
    pub has_fritzbox_credentials: bool,
}

async fn host_view(state: &AppState, host: Host) -> Result<HostView, Error> {
    let services = state.store.services_for_host(&host.id).await?;
    let classification = classify::classify(&host, &services);
    Ok(HostView {
        has_proxmox_credentials: host.has_proxmox_credentials(),
        has_fritzbox_credentials: host.has_fritzbox_credentials(),
        classification,
        services,
        host,
    })
}

pub async fn list_hosts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<HostView>>, Error> {
    let hosts = state.store.all_hosts().await?;
    let mut views = Vec::with_capacity(hosts.len());
    for host in hosts {
        views.push(host_view(&state, host).await?);
    }
    Ok(Json(views))
}

pub async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HostView>, Error> {
    let host = state
        .store
        .host_by_id(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("host {}", id)))?;
    Ok(Json(host_view(&state, host).await?))
}

pub async fn delete_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Error> {
    if !state.store.delete_host(&id).await? {
        return Err(Error::NotFound(format!("host {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypePayload {
    pub device_type: Option<String>,
}

pub async fn set_device_type(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DeviceTypePayload>,
) -> Result<StatusCode, Error> {
    if let Some(device_type) = &payload.device_type
        && classify::DeviceType::parse(device_type).is_none()
    {
        return Err(Error::Config(format!(
            "unknown device type '{}'",
            device_type
        )));
    }
    state
        .store
        .set_device_type(&id, payload.device_type.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxmoxPayload {
    pub api_host: String,
    pub token_id: String,
    pub token_secret: String,
}

pub async fn set_proxmox_credentials(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Option<ProxmoxPayload>>,
) -> Result<StatusCode, Error> {
    let creds = payload.map(|p| ProxmoxCredentials {
        api_host: p.api_host,
        token_id: p.token_id,
        token_secret: p.token_secret,
    });
    if let Some(creds) = &creds {
        // Log the id and a length, never the secret.
        tracing::info!(
            "storing proxmox token {} ({} chars) for host {}",
            creds.token_id,
            creds.token_secret.len(),
            id
        );
    }
    state.store.set_proxmox_credentials(&id, creds.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FritzboxPayload {
    pub host: String,
    pub username: String,
    pub password: String,
}

pub async fn set_fritzbox_credentials(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Option<FritzboxPayload>>,
) -> Result<StatusCode, Error> {
    let creds = payload.map(|p| FritzboxCredentials {
        host: p.host,
        username: p.username,
        password: p.password,
    });
    state
        .store
        .set_fritzbox_credentials(&id, creds.as_ref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub hours: Option<i64>,
}

pub async fn host_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Vec<AvailabilitySample>>, Error> {
    if state.store.host_by_id(&id).await?.is_none() {
        return Err(Error::NotFound(format!("host {}", id)));
    }
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 30);
    let since = Utc::now() - Duration::hours(hours);
    Ok(Json(state.store.availability_for_host(&id, since).await?))
}

pub async fn list_scans(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Scan>>, Error> {
    Ok(Json(state.store.recent_scans(50).await?))
}

pub async fn latest_scan(State(state): State<Arc<AppState>>) -> Result<Json<Scan>, Error> {
    state
        .store
        .latest_scan()
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound("no scans yet".to_string()))
}

pub async fn trigger_scan(State(state): State<Arc<AppState>>) -> Result<Json<Scan>, Error> {
    let scan = state.engine.start_scan().await?;
    Ok(Json(scan))
}

#[derive(Serialize)]
pub struct DiscoveryStarted {
    pub started: bool,
}

pub async fn trigger_discovery(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DiscoveryStarted>, Error> {
    state.engine.start_discovery().await?;
    Ok(Json(DiscoveryStarted { started: true }))
}

/// The controller token is a secret like the host credentials: readers
/// get presence and a length stat, never the token itself. Leaving the
/// key out entirely also keeps a blind round-trip of this response from
/// wiping the stored value.
fn redact_settings(settings: &mut BTreeMap<String, String>) {
    if let Some(token) = settings.remove("unifi_token") {
        settings.insert("unifi_token_set".to_string(), (!token.is_empty()).to_string());
        settings.insert("unifi_token_length".to_string(), token.len().to_string());
    }
}

pub async fn get_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, String>>, Error> {
    let mut settings = state.store.all_settings().await?;
    redact_settings(&mut settings);
    Ok(Json(settings))
}

pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BTreeMap<String, String>>,
) -> Result<StatusCode, Error> {
    state
        .store
        .write_settings(&SettingsBatch(payload))
        .await?;
    // Timer parameters may have changed; re-arm both triggers.
    state.scheduler.reload().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_token_is_redacted_to_presence_and_length() {
        let mut settings = BTreeMap::new();
        settings.insert("scan_network".to_string(), "192.168.66.0/24".to_string());
        settings.insert("unifi_token".to_string(), "super-secret-token".to_string());

        redact_settings(&mut settings);

        assert!(!settings.contains_key("unifi_token"));
        assert_eq!(settings.get("unifi_token_set").map(String::as_str), Some("true"));
        assert_eq!(settings.get("unifi_token_length").map(String::as_str), Some("18"));
        assert_eq!(
            settings.get("scan_network").map(String::as_str),
            Some("192.168.66.0/24")
        );
    }

    #[test]
    fn unset_token_redacts_to_absent() {
        let mut settings = BTreeMap::new();
        settings.insert("unifi_token".to_string(), String::new());

        redact_settings(&mut settings);

        assert_eq!(settings.get("unifi_token_set").map(String::as_str), Some("false"));
        assert_eq!(settings.get("unifi_token_length").map(String::as_str), Some("0"));
    }
}
