//! Read-only queries, manual triggers and the few writes the dashboard
//! needs. Errors surface as `{error}` bodies with 400/404/409/500.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};

use crate::server::config::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/hosts", get(handlers::list_hosts))
        .route("/api/hosts/{id}", get(handlers::get_host))
        .route("/api/hosts/{id}", delete(handlers::delete_host))
        .route("/api/hosts/{id}/device-type", put(handlers::set_device_type))
        .route(
            "/api/hosts/{id}/credentials/proxmox",
            put(handlers::set_proxmox_credentials),
        )
        .route(
            "/api/hosts/{id}/credentials/fritzbox",
            put(handlers::set_fritzbox_credentials),
        )
        .route(
            "/api/hosts/{id}/availability",
            get(handlers::host_availability),
        )
        .route("/api/scans", get(handlers::list_scans))
        .route("/api/scans/latest", get(handlers::latest_scan))
        .route("/api/scan", post(handlers::trigger_scan))
        .route("/api/discovery", post(handlers::trigger_discovery))
        .route("/api/settings", get(handlers::get_settings))
        .route("/api/settings", put(handlers::put_settings))
}
