//! Authorization credential vault gateway.
//!
//! HTTP entrypoint: wires `AppState`, mounts the resource routers from
//! `api::router()`, starts the webhook retry worker (C8) and retention
//! reaper as background tasks, and serves with graceful shutdown.
//! Grounded on `cyxcloud_gateway::main`'s `Cli`/`tracing_subscriber::
//! fmt()`/`axum::serve().with_graceful_shutdown()` shape, simplified to
//! one HTTP listener (no gRPC surface in this service).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use vault_gateway::config::VaultConfig;
use vault_gateway::retention::RetentionReaper;
use vault_gateway::state::AppState;
use vault_gateway::webhook_worker::WebhookWorker;

#[derive(Parser)]
#[command(name = "vault-gateway")]
#[command(about = "Authorization credential vault gateway")]
struct Cli {
    /// HTTP listen address
    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// Enable CORS for all origins (development only)
    #[arg(long, default_value = "false")]
    cors_permissive: bool,
}

async fn health() -> &'static str {
    "OK"
}

async fn version() -> &'static str {
    concat!("vault-gateway/", env!("CARGO_PKG_VERSION"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = VaultConfig::from_env();

    info!(http = %cli.http_addr, "starting authorization credential vault gateway");

    let state = AppState::new(config).await?;

    let shutdown = CancellationToken::new();

    let webhook_worker = Arc::new(WebhookWorker::new(
        state.config().webhook.worker_tick,
        state.db_arc(),
        state.webhook().clone(),
    ));
    let webhook_worker_handle = webhook_worker.start(shutdown.clone());

    let retention_reaper = Arc::new(RetentionReaper::new(
        state.config().retention.reaper_interval,
        state.db_arc(),
        Arc::new(vault_gateway::audit::AuditLog::new(state.db_arc())),
    ));
    let retention_reaper_handle = retention_reaper.start(shutdown.clone());

    let cors = if cli.cors_permissive {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .merge(vault_gateway::api::router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            vault_gateway::ratelimit::enforce,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = cli.http_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = webhook_worker_handle.await;
    let _ = retention_reaper_handle.await;

    info!("gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
