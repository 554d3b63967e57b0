//! Command-line interface for the guard daemon.
//!
//! Every setting is a flag with an environment fallback, so the daemon can
//! be driven from an `.env` file in production and from flags in
//! development. Running without a subcommand defaults to `run`.

use std::env;

use clap::{Args, Parser, Subcommand};

use valguard_common::config::parse_endpoints;
use valguard_common::GuardConfig;

/// Validator guard — watches nodes and broadcasts a pre-signed
/// `set_offline` transaction before missed-block slashing accrues.
#[derive(Parser)]
#[command(
    name = "valguard-node",
    version,
    about = "Validator guard sidecar",
    long_about = "Watches one or more nodes exposing a single validator's activity.\n\
                  When the validator misses too many blocks while the pre-signed\n\
                  set_offline transaction is still acceptable, the guard broadcasts\n\
                  it to remove the validator from the active set before slashing."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the guard daemon
    Run(RunArgs),

    /// Show version string
    Version,
}

/// Arguments for the `run` subcommand.
///
/// All flags have environment variable fallbacks. CLI flags take precedence.
#[derive(Args, Debug)]
pub struct RunArgs {
    // ── Nodes ───────────────────────────────────────────────────────────
    /// Comma-separated Tendermint RPC endpoints, one watcher each
    #[arg(long, env = "NODES_ENDPOINTS")]
    pub nodes_endpoints: String,

    // ── Guarded validator ───────────────────────────────────────────────
    /// Hex consensus address of the guarded validator
    #[arg(long, env = "VALIDATOR_ADDRESS")]
    pub validator_address: String,

    /// Hex-encoded pre-signed set_offline transaction
    #[arg(long, env = "SET_OFFLINE_TX")]
    pub set_offline_tx: String,

    // ── Miss window ─────────────────────────────────────────────────────
    /// Missed blocks within the window that trigger set_offline
    #[arg(long, env = "MISSED_BLOCKS_LIMIT", default_value_t = 8)]
    pub missed_blocks_limit: usize,

    /// Length of the sliding signature window in blocks (must exceed the limit)
    #[arg(long, env = "MISSED_BLOCKS_WINDOW", default_value_t = 24)]
    pub missed_blocks_window: usize,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Seconds to wait before a watcher retries a failed connection
    #[arg(long, env = "FALLBACK_PAUSE", default_value_t = 2)]
    pub fallback_pause: u64,

    /// Seconds of block silence before the status endpoint reports critical
    #[arg(long, env = "NEW_BLOCK_TIMEOUT", default_value_t = 10)]
    pub new_block_timeout: u64,

    // ── Reserved ────────────────────────────────────────────────────────
    /// Reserved: grace-period switch (not consulted by the supervisor)
    #[arg(long, env = "ENABLE_GRACE_PERIOD", default_value_t = false)]
    pub enable_grace_period: bool,

    /// Reserved: grace-period duration in blocks
    #[arg(long, env = "GRACE_PERIOD_DURATION", default_value_t = 15840)]
    pub grace_period_duration: u64,

    // ── Observability ───────────────────────────────────────────────────
    /// Bind address for the read-only status endpoint (disabled when unset)
    #[arg(long, env = "HTTP_LISTEN")]
    pub http_listen: Option<String>,
}

impl RunArgs {
    /// Convert parsed arguments into the typed runtime configuration.
    pub fn into_config(self) -> GuardConfig {
        GuardConfig {
            nodes_endpoints: parse_endpoints(&self.nodes_endpoints),
            missed_blocks_limit: self.missed_blocks_limit,
            missed_blocks_window: self.missed_blocks_window,
            fallback_pause: self.fallback_pause,
            new_block_timeout: self.new_block_timeout,
            validator_address: self.validator_address,
            set_offline_tx: self.set_offline_tx,
            enable_grace_period: self.enable_grace_period,
            grace_period_duration: self.grace_period_duration,
            http_listen: self.http_listen,
        }
    }
}

/// Load environment variables from an env file, if one exists.
///
/// Load order:
/// 1. `VALGUARD_ENV_FILE` environment variable (custom path)
/// 2. `.env` (development default)
///
/// A missing file is not an error; a malformed one is reported.
pub fn load_env_file() {
    let env_file = env::var("VALGUARD_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
    if let Err(e) = dotenvy::from_filename(&env_file) {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("warning: failed to load {}: {}", env_file, e);
        }
    }
}
