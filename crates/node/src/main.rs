//! Guard daemon entry point.
//!
//! Wiring order:
//! 1. Load the env file and parse the CLI (flags override environment).
//! 2. Validate configuration; a config error is fatal (exit 1).
//! 3. Decode the `set_offline` transaction; a decode failure is logged but
//!    not fatal — the guard then simply never has a transaction to send.
//! 4. Start the guard, one watcher per endpoint, and (optionally) the
//!    status HTTP server.
//! 5. Wait for SIGINT/SIGTERM, stop everything cooperatively, join all
//!    tasks, exit 0.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Level};

use valguard_common::{GuardConfig, HttpRpc, NodeRpc};
use valguard_node::cli::{load_env_file, Cli, Command};
use valguard_node::{build_router, AppState, Guard, Guarder, Watcher};

/// Per-request timeout for node RPC calls.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    load_env_file();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    match cli.command {
        Some(Command::Version) => {
            println!("valguard-node {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Command::Run(args)) => run(args.into_config()).await,
        None => {
            // running without a subcommand is not supported because the
            // required flags live on `run`; keep the hint short
            eprintln!("usage: valguard-node run --help");
            std::process::exit(1);
        }
    }
}

async fn run(config: GuardConfig) {
    if let Err(e) = config.validate() {
        error!("configuration error: {}", e);
        std::process::exit(1);
    }

    let tx_data = match config.decode_offline_tx() {
        Ok(tx) => Some(tx),
        Err(e) => {
            error!("can't decode set_offline transaction: {}", e);
            None
        }
    };

    info!("starting validator guard");
    info!("validator address: {}", config.validator_address);
    info!("nodes: {}", config.nodes_endpoints.join(", "));
    info!(
        "miss window: {} of {} blocks",
        config.missed_blocks_limit, config.missed_blocks_window
    );
    if config.enable_grace_period {
        warn!(
            "grace period configured ({} blocks) but not consulted by the supervisor",
            config.grace_period_duration
        );
    }

    // The offline callback and the watcher list reference each other, so
    // the list is shared and filled in after the guard exists.
    let watchers: Arc<RwLock<Vec<Arc<Watcher>>>> = Arc::new(RwLock::new(Vec::new()));
    let callback_watchers = Arc::clone(&watchers);
    let guard = Guard::new(
        config.clone(),
        Box::new(move || {
            let watchers: Vec<Arc<Watcher>> = callback_watchers.read().clone();
            async move {
                for watcher in watchers {
                    watcher.send_offline().await;
                }
            }
            .boxed()
        }),
    );

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    handles.push(Arc::clone(&guard).start());

    for endpoint in &config.nodes_endpoints {
        let client: Arc<dyn NodeRpc> = Arc::new(HttpRpc::new(endpoint.clone(), RPC_TIMEOUT));
        let watcher = Watcher::new(
            endpoint.clone(),
            config.clone(),
            Arc::clone(&guard) as Arc<dyn Guarder>,
            client,
        );
        watcher.set_tx_data(tx_data.clone());
        watchers.write().push(Arc::clone(&watcher));
        handles.push(Arc::clone(&watcher).start());
    }

    let http_shutdown = Arc::new(Notify::new());
    if let Some(addr) = config.http_listen.clone() {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!("status endpoint available at http://{}/status", addr);
                let app = Arc::new(AppState {
                    guard: Arc::clone(&guard),
                });
                let shutdown = Arc::clone(&http_shutdown);
                handles.push(tokio::spawn(async move {
                    let router = build_router(app);
                    let serve = axum::serve(listener, router)
                        .with_graceful_shutdown(async move { shutdown.notified().await });
                    if let Err(e) = serve.await {
                        error!("status server error: {}", e);
                    }
                }));
            }
            Err(e) => {
                // the status endpoint is an optional read-only surface; the
                // guard keeps protecting the validator without it
                error!(
                    "failed to bind status endpoint {}: {}, continuing without it",
                    addr, e
                );
            }
        }
    }

    wait_for_shutdown().await;
    info!("shutdown requested");

    for watcher in watchers.read().iter() {
        watcher.stop();
    }
    guard.stop();
    http_shutdown.notify_waiters();

    for handle in handles {
        let _ = handle.await;
    }
    info!("guard stopped cleanly");
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
