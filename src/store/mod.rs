//! Typed persistence over a shared SQLite pool.
//!
//! All timestamps are UTC. Upserts follow last-writer-wins with
//! coalesce-on-empty: a re-observation only overwrites a field when the
//! new value is non-empty.

pub mod availability;
pub mod hosts;
mod migrate;
pub mod scans;
pub mod services;
pub mod settings;

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use availability::AvailabilitySample;
pub use hosts::{FritzboxCredentials, Host, HostObservation, HostStatus, ProxmoxCredentials};
pub use scans::{Scan, ScanStatus};
pub use services::{Service, ServiceObservation, ServiceState};
pub use settings::SettingsBatch;

use crate::server::error::Error;

/// Handle to the relational store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) and migrate the database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("invalid database url: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        migrate::run(&pool).await?;

        Ok(Self { pool })
    }

    /// In-memory store for tests. A single connection keeps the database alive.
    pub async fn in_memory() -> Result<Self, Error> {
        Self::connect("sqlite::memory:", 1).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
