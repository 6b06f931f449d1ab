//! fleetd — the fleetgrid daemon.
//!
//! Single binary that assembles the control plane:
//! - Cluster registry (redb)
//! - Report ingestor (capacity evaluation + scaling decisions)
//! - Fleet provisioning orchestrator
//! - Simulated cloud provider and, optionally, simulated agents
//!
//! # Usage
//!
//! ```text
//! fleetd run --data-dir /var/lib/fleetgrid --config fleet.toml --simulate-agents
//! ```

mod config;
mod sim_agents;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleet_capacity::DecisionEngine;
use fleet_cloud::{CloudProvider, SimulatedCloud};
use fleet_reconciler::{FleetOrchestrator, ReportIngestor};
use fleet_registry::ClusterRegistry;

use crate::config::FleetConfig;

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid control-plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciler loops.
    Run {
        /// Path to the fleet configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,

        /// Also run simulated in-cluster agents (dev mode).
        #[arg(long)]
        simulate_agents: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetd=debug,fleet_reconciler=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            simulate_agents,
        } => run(config, data_dir, simulate_agents).await,
    }
}

async fn run(
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    simulate_agents: bool,
) -> anyhow::Result<()> {
    info!("fleetgrid daemon starting");

    let config = match &config_path {
        Some(path) => FleetConfig::load(path)?,
        None => FleetConfig::default(),
    };

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("fleet.redb");

    // ── Initialize subsystems ──────────────────────────────────────

    let registry = ClusterRegistry::open(&db_path)?;
    info!(path = ?db_path, "cluster registry opened");

    // The shipped provider is simulated; the real one lives behind the
    // same trait in its own deployment.
    let cloud: Arc<dyn CloudProvider> = Arc::new(SimulatedCloud::new());
    info!("simulated cloud provider initialized");

    let engine = DecisionEngine::new(config.engine_config());
    let ingestor = Arc::new(ReportIngestor::new(
        registry.clone(),
        Arc::clone(&cloud),
        engine,
    ));
    info!("report ingestor initialized");

    let orchestrator = FleetOrchestrator::new(
        registry.clone(),
        Arc::clone(&cloud),
        config.orchestrator_config(),
    );
    info!(
        interval = config.intervals.orchestrate_secs,
        "fleet orchestrator initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrate_shutdown = shutdown_rx.clone();
    let agent_shutdown = shutdown_rx;

    // ── Start background loops ─────────────────────────────────────

    let orchestrate_interval = Duration::from_secs(config.intervals.orchestrate_secs);
    let orchestrate_handle = tokio::spawn(async move {
        orchestrator.run(orchestrate_interval, orchestrate_shutdown).await;
    });

    let agent_handle = if simulate_agents {
        let registry = registry.clone();
        let ingestor = Arc::clone(&ingestor);
        let cloud = Arc::clone(&cloud);
        let interval = Duration::from_secs(config.intervals.agent_secs);
        Some(tokio::spawn(async move {
            sim_agents::run(registry, ingestor, cloud, interval, agent_shutdown).await;
        }))
    } else {
        None
    };

    // ── Wait for shutdown ──────────────────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = orchestrate_handle.await;
    if let Some(handle) = agent_handle {
        let _ = handle.await;
    }

    info!("fleetgrid daemon stopped");
    Ok(())
}
