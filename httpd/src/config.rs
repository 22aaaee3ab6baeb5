//! Process-wide runtime configuration, sourced from the environment at
//! startup and passed by `Arc` into every component constructor
//! (SPEC_FULL.md §3.1 `RuntimeConfig`).
//!
//! Mirrors the `Cli`/`clap::Parser` + `env =` attribute pattern
//! (`LEDGER_STATUS_ADDR`, `LEDGER_TRANSPORT`) rather than scattering
//! `std::env::var` calls at call sites.

use clap::Parser;

/// Settld control plane daemon command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "SETTLD_LOG_LEVEL")]
    pub log_level: Option<String>,
    /// HTTP bind address for the API surface, `/metrics`, `/healthz`, `/readyz`.
    #[arg(long, env = "SETTLD_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,
    /// Directory backing per-tenant audit logs and the artifact vault overflow.
    #[arg(long, env = "SETTLD_DATA_DIR", default_value = "./data")]
    pub data_dir: String,
    /// Hex-encoded 32-byte AES-256-GCM key used to seal tenant secrets.
    #[arg(long, env = "SETTLD_SEAL_KEY_HEX")]
    pub seal_key_hex: Option<String>,
    /// Hex-encoded Ed25519 seed the control plane signs settlement decisions with.
    #[arg(long, env = "SETTLD_DECISION_SIGNING_KEY_HEX")]
    pub decision_signing_key_hex: Option<String>,
}

/// Resolved configuration snapshot, immutable after startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bind address for the HTTP listener.
    pub bind_addr: String,
    /// Root directory for on-disk state.
    pub data_dir: std::path::PathBuf,
    /// 32-byte key sealing tenant secrets at rest.
    pub seal_key: [u8; 32],
    /// Ed25519 signing key the control plane signs decisions with.
    pub decision_signing_key: ed25519_dalek::SigningKey,
}

impl RuntimeConfig {
    /// Resolve a [`Cli`] into a [`RuntimeConfig`], generating ephemeral keys
    /// when none were supplied (development convenience; production
    /// deployments must pin both via the environment).
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let seal_key = match &cli.seal_key_hex {
            Some(hex_str) => {
                let bytes = hex::decode(hex_str)?;
                let array: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("SETTLD_SEAL_KEY_HEX must decode to exactly 32 bytes"))?;
                array
            }
            None => {
                tracing::warn!("SETTLD_SEAL_KEY_HEX not set; generating an ephemeral seal key");
                let mut bytes = [0u8; 32];
                rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
                bytes
            }
        };
        let decision_signing_key = match &cli.decision_signing_key_hex {
            Some(hex_str) => {
                let bytes = hex::decode(hex_str)?;
                let array: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("SETTLD_DECISION_SIGNING_KEY_HEX must decode to exactly 32 bytes"))?;
                ed25519_dalek::SigningKey::from_bytes(&array)
            }
            None => {
                tracing::warn!("SETTLD_DECISION_SIGNING_KEY_HEX not set; generating an ephemeral signing key");
                ed25519_dalek::SigningKey::generate(&mut rand_core::OsRng)
            }
        };
        Ok(Self {
            bind_addr: cli.bind_addr.clone(),
            data_dir: std::path::PathBuf::from(&cli.data_dir),
            seal_key,
            decision_signing_key,
        })
    }
}
