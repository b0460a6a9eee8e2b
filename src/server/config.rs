use std::sync::Arc;

use anyhow::{Error, Result};
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::scan::{ScanEngine, Scheduler};
use crate::store::Store;

/// CLI arguments structure (for figment integration)
#[derive(Debug, Default)]
pub struct CliArgs {
    pub server_port: Option<u16>,
    pub log_level: Option<String>,
    pub database_url: Option<String>,
    pub database_pool_size: Option<u32>,
}

/// Flattened server configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// What port the server should listen on
    pub server_port: u16,

    /// Level of logs to show
    pub log_level: String,

    /// Where database should be located
    pub database_url: String,

    /// Size of the shared connection pool
    pub database_pool_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_port: 3080,
            log_level: "info".to_string(),
            database_url: "sqlite://netcatalog.db".to_string(),
            database_pool_size: 5,
        }
    }
}

impl ServerConfig {
    pub fn load(cli_args: CliArgs) -> Result<Self> {
        // Standard configuration layering: Defaults → Env → CLI (highest priority)
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));

        // Add environment variables with NETCATALOG_ prefix
        figment = figment.merge(Env::prefixed("NETCATALOG_"));

        // Add CLI overrides (highest priority) - only if explicitly provided
        if let Some(server_port) = cli_args.server_port {
            figment = figment.merge(("server_port", server_port));
        }
        if let Some(log_level) = cli_args.log_level {
            figment = figment.merge(("log_level", log_level));
        }
        if let Some(database_url) = cli_args.database_url {
            figment = figment.merge(("database_url", database_url));
        }
        if let Some(database_pool_size) = cli_args.database_pool_size {
            figment = figment.merge(("database_pool_size", database_pool_size));
        }

        let config: ServerConfig = figment
            .extract()
            .map_err(|e| Error::msg(format!("Configuration error: {}", e)))?;

        Ok(config)
    }
}

pub struct AppState {
    pub config: ServerConfig,
    pub store: Store,
    pub engine: Arc<ScanEngine>,
    pub scheduler: Arc<Scheduler>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>, Error> {
        let shutdown = CancellationToken::new();
        let store = Store::connect(&config.database_url, config.database_pool_size).await?;

        // Scans interrupted by the previous process are unrecoverable.
        let recovered = store.fail_interrupted_scans().await?;
        if recovered > 0 {
            tracing::warn!("{} interrupted scans marked as errors", recovered);
        }

        let engine = ScanEngine::new(store.clone(), shutdown.child_token())?;
        let scheduler = Scheduler::new(store.clone(), engine.clone()).await?;

        Ok(Arc::new(Self {
            config,
            store,
            engine,
            scheduler,
            shutdown,
        }))
    }
}
