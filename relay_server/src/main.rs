//! Commit Relay: webhook relay between version control, CI and chat.
//!
//! Receives commit notifications from the VCS trigger and build status
//! updates from CI jobs, matches commits against the configured response
//! rules, starts builds and keeps one chat notice per build up to date.

mod config;
mod errors;
mod integrations;
mod metrics;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::RelayConfig;
use crate::services::dispatcher::Dispatcher;

#[derive(Parser)]
#[command(name = "commit-relay", about = "Commit and build status relay")]
struct Cli {
    /// Relay configuration file
    #[arg(short, long, env = "RELAY_CONFIG", default_value = "relay.toml")]
    config: PathBuf,

    /// Server port, overrides `[webserver] port`
    #[arg(short, long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// Prometheus exporter port
    #[arg(long, env = "RELAY_METRICS_PORT", default_value = "9000")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting Commit Relay...");

    let config = RelayConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    // Spawn collaborators
    let vcs = integrations::vcs_from_config(&config.vcs);
    let ci = integrations::ci_from_config(&config.ci)?;
    let chat = integrations::chat_from_config(&config.chat)?;

    let dispatcher = Dispatcher::new(
        vcs,
        ci,
        chat,
        config.rules,
        config.build_jobs,
        config.webhooks,
    );

    let shutdown = CancellationToken::new();
    let state = routes::AppState {
        dispatcher: Arc::new(dispatcher),
        key: config.webserver.key().map(str::to_string),
        shutdown: shutdown.clone(),
    };

    let app = routes::relay_router(state).layer(TraceLayer::new_for_http());

    // Initialize metrics
    metrics::init_metrics(SocketAddr::from(([0, 0, 0, 0], cli.metrics_port)));

    // Start server
    let port = cli.port.unwrap_or_else(|| config.webserver.port());
    let addr = format!("{}:{}", config.webserver.address(), port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        "Commit Relay listening on {}. To shut down: curl -H \"key:<yourkey>\" http://<address>/shutdown",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        _ = token.cancelled() => tracing::info!("Shutdown requested, shutting down..."),
    }
}
