//! Settld control plane HTTP daemon: tenant lifecycle, upload/verify,
//! decisions, outbox operations, metrics.
//!
//! The daemon shape — parse `Cli`, resolve it into an immutable config,
//! install a tracing subscriber sized to `--verbose`/`--log-level`, bind a
//! listener, serve an axum `Router` — follows `ledgerd`'s entrypoint, minus
//! the transport/registry machinery this crate has no use for: the HTTP
//! boundary here needs one listener, not a QUIC/Unix/loopback transport
//! selection.

mod config;
mod error;
mod metrics;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::{Cli, RuntimeConfig};
use state::{AppState, SharedState};

fn resolve_log_level(cli: &Cli) -> Level {
    cli.log_level
        .as_deref()
        .map(str::to_ascii_uppercase)
        .map(|lvl| match lvl.as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or_else(|| match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/tenants", post(routes::create_tenant))
        .route("/v1/tenants/:id/settings", get(routes::get_settings).put(routes::put_settings))
        .route("/v1/tenants/:id/entitlements", get(routes::get_entitlements))
        .route("/v1/tenants/:id/plan", post(routes::post_plan))
        .route("/v1/ingest/:tenantId", post(routes::post_ingest))
        .route("/r/:token/verify.json", get(routes::get_verify_json))
        .route("/r/:token/receipt.json", get(routes::get_receipt_json))
        .route("/r/:token/otp/request", post(routes::post_otp_request))
        .route("/r/:token/decision", post(routes::post_decision))
        .route("/v1/revoke", post(routes::post_revoke))
        .route("/v1/tenants/:id/webhook-retries", get(routes::get_webhook_retries))
        .route("/v1/tenants/:id/webhook-retries/run-once", post(routes::post_run_once))
        .route("/v1/tenants/:id/webhook-retries/:recordId/replay", post(routes::post_replay))
        .route("/metrics", get(routes::get_metrics))
        .route("/healthz", get(routes::get_healthz))
        .route("/readyz", get(routes::get_readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = resolve_log_level(&cli);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_env_filter(env_filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = RuntimeConfig::from_cli(&cli)?;
    let bind_addr = config.bind_addr.clone();
    let state: SharedState = std::sync::Arc::new(AppState::new(config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("settld-httpd listening on {}", bind_addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
