//! gridplaned — the Gridplane agent daemon.
//!
//! Assembles the reconciliation engine with a file-backed northbound
//! source and the reference descriptor set over the mock dataplane:
//!
//! ```text
//! gridplaned run --config /etc/gridplane/agent.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use gridplane_core::AgentConfig;
use gridplane_kvs::{KvScheduler, Registry};
use gridplaned::dataplane::{DataplaneClient, MockDataplane};
use gridplaned::descriptors;
use gridplaned::northbound::FileSource;

#[derive(Parser)]
#[command(name = "gridplaned", about = "Gridplane agent daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent.
    Run {
        /// Path to agent.toml.
        #[arg(long, default_value = "/etc/gridplane/agent.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridplaned=debug,gridplane_kvs=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(config).await,
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = AgentConfig::from_file(&config_path)?;
    info!(label = %config.label, config = ?config_path, "gridplane agent starting");

    // ── Dataplane boundary ─────────────────────────────────────
    let dataplane = DataplaneClient::new(Arc::new(MockDataplane::new()), config.rpc_timeout());
    info!(timeout = ?config.rpc_timeout(), "mock dataplane initialized");

    // ── Descriptor registry + engine ───────────────────────────
    let mut registry = Registry::new();
    descriptors::register_defaults(&mut registry, &config.label, dataplane)?;
    info!(descriptors = registry.len(), "descriptor registry built");

    let scheduler = Arc::new(KvScheduler::start(registry));

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Northbound source ──────────────────────────────────────
    let source = FileSource::new(&config.northbound.snapshot, &config.label);
    let source_handle = tokio::spawn(source.run(
        scheduler.clone(),
        config.poll_interval(),
        shutdown_rx.clone(),
    ));

    // ── Periodic resync ────────────────────────────────────────
    let resync_handle = config.resync_interval().map(|interval| {
        info!(?interval, "periodic resync enabled");
        tokio::spawn(resync_loop(scheduler.clone(), interval, shutdown_rx))
    });

    // ── Wait for shutdown ──────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = source_handle.await;
    if let Some(handle) = resync_handle {
        let _ = handle.await;
    }

    if let Ok(scheduler) = Arc::try_unwrap(scheduler) {
        scheduler.shutdown().await;
    }
    info!("gridplane agent stopped");
    Ok(())
}

async fn resync_loop(
    scheduler: Arc<KvScheduler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match scheduler.resync().await {
                    Ok(result) if result.failed_count() > 0 => {
                        warn!(failed = result.failed_count(), "periodic resync had failures");
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "periodic resync failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
