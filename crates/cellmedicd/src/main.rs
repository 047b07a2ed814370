use anyhow::{Context, Result};
use cellmedic_common::{Config, Orchestrator, PolicyStore, ResourceControl, TelemetrySource};
use cellmedicd::{EngineReport, SimulatedFleet};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Overrides the config search path
const CONFIG_ENV: &str = "CELLMEDIC_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("[BOOT] Cellmedic daemon v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => Config::load_from_path(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        Err(_) => Config::load(),
    };
    config.validate().context("Invalid configuration")?;
    info!(
        "[BOOT] Config loaded: max {} attempts, {}ms action timeout, {} neighbor entries",
        config.engine.max_retries,
        config.engine.action_timeout_ms,
        config.neighbors.len()
    );

    let fleet = Arc::new(SimulatedFleet::new(&config.simulation));
    info!(
        "[BOOT] Simulated fleet: {} cells, fault probability {:.2}",
        config.simulation.cells, config.simulation.fault_probability
    );

    let policy = Arc::new(PolicyStore::new(config.engine.neutral_prior));
    let mut orch = Orchestrator::new(
        &config,
        Arc::clone(&fleet) as Arc<dyn TelemetrySource>,
        fleet as Arc<dyn ResourceControl>,
        policy,
    );

    orch.run_until(shutdown_signal()).await;

    let report = EngineReport::from_engine(&orch);
    let stats = &report.stats;
    info!(
        "[SHUTDOWN] {} cycles: {} faults opened, {} resolved, {} unresolved, {} actions, success rate {:.1}%",
        stats.cycles,
        stats.faults_opened,
        stats.faults_resolved,
        stats.faults_unresolved,
        stats.actions_launched,
        report.success_rate
    );
    for entry in &report.policy {
        info!(
            "[SHUTDOWN] policy {}/{}: {}/{} ({:.2})",
            entry.fault_type, entry.action_type, entry.successes, entry.attempts, entry.success_rate
        );
    }

    if let Some(path) = &config.report.path {
        report
            .save(Path::new(path))
            .await
            .context("Failed to save shutdown report")?;
        info!("[SHUTDOWN] Report written to {}", path);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("[SHUTDOWN] Signal received, stopping");
}
