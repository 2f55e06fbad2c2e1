//! Launchpad API Server

use std::path::PathBuf;

use clap::Parser;
use launchpad_api::{AppState, Backends, routes};
use launchpad_config::SystemConfig;
use launchpad_db::{create_pool, run_migrations};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "launchpad-server")]
#[command(about = "Launchpad build and deployment API", long_about = None)]
struct Cli {
    /// Path to the KDL configuration file
    #[arg(long, env = "LAUNCHPAD_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LAUNCHPAD_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = SystemConfig::from_env_or_file(cli.config.as_deref())?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let shutdown = CancellationToken::new();
    let listen = config.server.listen.clone();
    let backends = Backends::postgres(pool, &config);
    let state = AppState::new(backends, config, shutdown.clone())?;

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", listen);
    let listener = TcpListener::bind(&listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then end every open stream so connections can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
    shutdown.cancel();
}
