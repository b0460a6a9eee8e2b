use std::time::Duration;

use axum::Router;
use axum::http::Method;
use clap::Parser;
use netcatalog::server::{
    api::create_router,
    config::{AppState, CliArgs, ServerConfig},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "netcatalog-server")]
#[command(about = "NetCatalog network inventory server")]
struct Cli {
    /// Override server port
    #[arg(long)]
    server_port: Option<u16>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Override database url
    #[arg(long)]
    database_url: Option<String>,

    /// Override database pool size
    #[arg(long)]
    database_pool_size: Option<u32>,
}

impl From<Cli> for CliArgs {
    fn from(cli: Cli) -> Self {
        Self {
            server_port: cli.server_port,
            log_level: cli.log_level,
            database_url: cli.database_url,
            database_pool_size: cli.database_pool_size,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    let config = ServerConfig::load(CliArgs::from(cli))?;
    let listen_addr = format!("0.0.0.0:{}", config.server_port);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "netcatalog={},server={}",
            config.log_level, config.log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::new(config).await?;

    let app = Router::new().merge(create_router()).with_state(state.clone()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                    .allow_headers(Any),
            ),
    );

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!("NetCatalog server listening on {}", listen_addr);

    state.scheduler.start().await?;

    let shutdown = state.shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });

    let serve_handle = tokio::spawn(std::future::IntoFuture::into_future(server));

    wait_for_signal().await;
    tracing::info!("shutdown signal received");

    // Drain in order: timers, listener, in-flight work, pool. A hard
    // deadline forces the exit if anything refuses to wind down.
    let state_for_shutdown = state.clone();
    let graceful = async move {
        state_for_shutdown.scheduler.shutdown().await;
        state_for_shutdown.shutdown.cancel();
        let _ = serve_handle.await;
        state_for_shutdown.store.close().await;
    };

    if tokio::time::timeout(Duration::from_secs(10), graceful)
        .await
        .is_err()
    {
        tracing::error!("graceful shutdown deadline exceeded, forcing exit");
        std::process::exit(1);
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
