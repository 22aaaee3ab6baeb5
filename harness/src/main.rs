//! CLI entrypoint for the first-paid-call demo harness.
//!
//! Mirrors `ledgerd`'s `Cli`/tracing-subscriber bootstrap, scaled down to
//! the one thing this binary does: run a single attempt against a demo ops
//! API and a running control plane, printing each stage as it completes.

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use settld_harness::{FirstPaidCallHarness, OpsApiClient, RuntimeCouplingClient};
use settld_spec::chain::ChainState;

/// First-paid-call demo harness command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Base URL of the demo ops API.
    #[arg(long, env = "SETTLD_OPS_BASE_URL", default_value = "http://localhost:8081")]
    ops_base_url: String,
    /// Base URL of the control plane under test.
    #[arg(long, env = "SETTLD_BASE_URL", default_value = "http://localhost:8080")]
    control_plane_base_url: String,
    /// Tenant id to ingest the demo run under.
    #[arg(long, env = "SETTLD_TENANT_ID")]
    tenant_id: String,
    /// Vendor ingest key bearer token.
    #[arg(long, env = "SETTLD_INGEST_KEY")]
    ingest_key: String,
    /// Bearer token for the ops API's chained-event write endpoint.
    #[arg(long, env = "SETTLD_OPS_BEARER_TOKEN")]
    ops_bearer_token: String,
    /// Attempt id; reuse the same value to idempotently resume a prior run.
    #[arg(long)]
    attempt_id: Option<String>,
    /// Maximum number of 250ms polls to wait for settlement.
    #[arg(long, default_value_t = 40)]
    poll_budget: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder().with_max_level(level).with_env_filter(env_filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let attempt_id = cli.attempt_id.unwrap_or_else(|| format!("attempt_{}", uuid::Uuid::new_v4()));
    info!("starting first-paid-call attempt {attempt_id}");

    let ops = OpsApiClient::new(cli.ops_base_url, cli.control_plane_base_url.clone(), cli.tenant_id, cli.ingest_key);
    let runtime_coupling = RuntimeCouplingClient::new(ops.control_plane_base_url().to_string(), cli.ops_bearer_token);
    let harness = FirstPaidCallHarness::new(ops, runtime_coupling);

    let mut chain = ChainState::default();
    let record = harness.run_attempt(&attempt_id, &mut chain, cli.poll_budget).await?;

    info!(
        "attempt {} settled: run_id={:?} receipt_token={:?}",
        record.attempt_id, record.run_id, record.receipt_token
    );
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
