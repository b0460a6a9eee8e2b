//! Application endpoint probing.
//!
//! When neither the page title nor a body indicator identified the service,
//! a fixed table of well-known application paths is tried against the host.
//! Requests go out in batches of four; the first hit short-circuits.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;

pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(4);
pub const ENDPOINT_BATCH: usize = 4;

/// `(path, expected body substring, application name)`.
pub struct AppEndpoint {
    pub path: &'static str,
    pub expect: &'static str,
    pub name: &'static str,
}

macro_rules! endpoint {
    ($path:literal, $expect:literal, $name:literal) => {
        AppEndpoint {
            path: $path,
            expect: $expect,
            name: $name,
        }
    };
}

pub const APP_ENDPOINTS: &[AppEndpoint] = &[
    endpoint!("/api/health", "database", "Grafana"),
    endpoint!("/admin/api.php", "domains_being_blocked", "Pi-hole"),
    endpoint!("/api/v1/status/apcache", "FTL", "Pi-hole"),
    endpoint!("/System/Info/Public", "jellyfin", "Jellyfin"),
    endpoint!("/web/index.html", "plex", "Plex"),
    endpoint!("/identity", "machineidentifier", "Plex"),
    endpoint!("/api/v2/app/version", "v", "qBittorrent"),
    endpoint!("/api/status", "portainer", "Portainer"),
    endpoint!("/api/v1/status", "uptime", "Uptime Kuma"),
    endpoint!("/api/", "api_version", "Home Assistant"),
    endpoint!("/manifest.json", "home assistant", "Home Assistant"),
    endpoint!("/api/info", "octoprint", "OctoPrint"),
    endpoint!("/rest/system/status", "syncthing", "Syncthing"),
    endpoint!("/api/v3/system/status", "sonarr", "Sonarr"),
    endpoint!("/api/v3/system/status", "radarr", "Radarr"),
    endpoint!("/api/v1/system/status", "prowlarr", "Prowlarr"),
    endpoint!("/api/server/version", "immich", "Immich"),
    endpoint!("/api/v2/status", "authelia", "Authelia"),
    endpoint!("/application/o/authorize/", "authentik", "authentik"),
    endpoint!("/alive", "vaultwarden", "Vaultwarden"),
    endpoint!("/api/version", "nodered", "Node-RED"),
    endpoint!("/description.xml", "philips hue", "Philips Hue Bridge"),
    endpoint!("/api/zones", "powerdns", "PowerDNS"),
    endpoint!("/control/status", "adguard", "AdGuard Home"),
    endpoint!("/api2/json/version", "version", "Proxmox VE"),
    endpoint!("/print/printers", "cups", "CUPS"),
];

/// Probe the endpoint table against `base_url` (`http://ip:port`).
///
/// Returns the first application whose expected substring occurs in a 2xx
/// response body, or `None` when the whole table misses.
pub async fn probe_endpoints(client: &reqwest::Client, base_url: &str) -> Option<&'static str> {
    for batch in APP_ENDPOINTS.chunks(ENDPOINT_BATCH) {
        let attempts = batch.iter().map(|endpoint| async move {
            let url = format!("{}{}", base_url, endpoint.path);
            let response = timeout(ENDPOINT_TIMEOUT, client.get(&url).send())
                .await
                .ok()?
                .ok()?;
            if !response.status().is_success() {
                return None;
            }
            let body = timeout(ENDPOINT_TIMEOUT, response.text()).await.ok()?.ok()?;
            if body.to_lowercase().contains(endpoint.expect) {
                tracing::debug!("endpoint {} identified {}", url, endpoint.name);
                Some(endpoint.name)
            } else {
                None
            }
        });

        if let Some(name) = join_all(attempts).await.into_iter().flatten().next() {
            return Some(name);
        }
    }
    None
}
