//! Configuration management for cellmedic.
//!
//! Loads settings from /etc/cellmedic/config.toml or uses defaults. Every
//! field has a serde default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{MedicError, Result};
use crate::telemetry::{BreachDirection, MetricKind};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/cellmedic/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/cellmedic/config.toml";

/// Longest accepted reopen cooldown (30 days)
pub const MAX_REOPEN_COOLDOWN_SECS: u64 = 30 * 24 * 3600;

/// Remediation loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between telemetry polls
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Maximum healing attempts per fault
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Attempts a single ranked action gets before the next one is tried
    #[serde(default = "default_attempts_per_action")]
    pub attempts_per_action: u32,

    /// Per-action timeout for the control interface
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,

    /// Success rate assumed for (fault, action) pairs with no history
    #[serde(default = "default_neutral_prior")]
    pub neutral_prior: f64,

    /// Wait after an unresolved fault before the resource may fault again
    #[serde(default = "default_reopen_cooldown")]
    pub reopen_cooldown_secs: u64,

    /// Closed faults kept in memory
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_cycle_interval() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_attempts_per_action() -> u32 {
    2
}

fn default_action_timeout() -> u64 {
    30_000
}

fn default_neutral_prior() -> f64 {
    0.5
}

fn default_reopen_cooldown() -> u64 {
    300 // 5 minutes
}

fn default_max_history() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            max_retries: default_max_retries(),
            attempts_per_action: default_attempts_per_action(),
            action_timeout_ms: default_action_timeout(),
            neutral_prior: default_neutral_prior(),
            reopen_cooldown_secs: default_reopen_cooldown(),
            max_history: default_max_history(),
        }
    }
}

impl EngineConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn reopen_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reopen_cooldown_secs.min(MAX_REOPEN_COOLDOWN_SECS) as i64)
    }
}

/// Warning and critical bounds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBounds {
    pub warning: f64,
    pub critical: f64,
}

impl ThresholdBounds {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Per-metric threshold table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_throughput")]
    pub throughput: ThresholdBounds,

    #[serde(default = "default_latency")]
    pub latency: ThresholdBounds,

    #[serde(default = "default_packet_loss")]
    pub packet_loss: ThresholdBounds,

    #[serde(default = "default_interference")]
    pub interference: ThresholdBounds,

    #[serde(default = "default_utilization")]
    pub utilization: ThresholdBounds,

    #[serde(default = "default_handover_success")]
    pub handover_success: ThresholdBounds,
}

fn default_throughput() -> ThresholdBounds {
    ThresholdBounds::new(30.0, 10.0) // Mbps, breach below
}

fn default_latency() -> ThresholdBounds {
    ThresholdBounds::new(100.0, 300.0) // ms
}

fn default_packet_loss() -> ThresholdBounds {
    ThresholdBounds::new(2.0, 10.0) // %
}

fn default_interference() -> ThresholdBounds {
    ThresholdBounds::new(0.4, 0.7)
}

fn default_utilization() -> ThresholdBounds {
    ThresholdBounds::new(85.0, 95.0) // %
}

fn default_handover_success() -> ThresholdBounds {
    ThresholdBounds::new(90.0, 80.0) // %, breach below
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            throughput: default_throughput(),
            latency: default_latency(),
            packet_loss: default_packet_loss(),
            interference: default_interference(),
            utilization: default_utilization(),
            handover_success: default_handover_success(),
        }
    }
}

impl ThresholdConfig {
    pub fn bounds(&self, kind: MetricKind) -> ThresholdBounds {
        match kind {
            MetricKind::Throughput => self.throughput,
            MetricKind::Latency => self.latency,
            MetricKind::PacketLoss => self.packet_loss,
            MetricKind::Interference => self.interference,
            MetricKind::Utilization => self.utilization,
            MetricKind::HandoverSuccess => self.handover_success,
        }
    }

    /// Critical must sit beyond warning in the breach direction
    pub fn validate(&self) -> Result<()> {
        for kind in MetricKind::ALL {
            let b = self.bounds(kind);
            if !b.warning.is_finite() || !b.critical.is_finite() {
                return Err(MedicError::Config(format!(
                    "threshold for {} must be finite (warning {}, critical {})",
                    kind, b.warning, b.critical
                )));
            }
            let ordered = match kind.direction() {
                BreachDirection::Above => b.critical >= b.warning,
                BreachDirection::Below => b.critical <= b.warning,
            };
            if !ordered {
                return Err(MedicError::Config(format!(
                    "threshold for {} has critical {} on the wrong side of warning {}",
                    kind, b.critical, b.warning
                )));
            }
        }
        Ok(())
    }
}

/// Simulated fleet used by the daemon when no real adapters are wired
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_cells")]
    pub cells: usize,

    /// Chance per healthy cell per cycle of a new fault
    #[serde(default = "default_fault_probability")]
    pub fault_probability: f64,

    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_cells() -> usize {
    10
}

fn default_fault_probability() -> f64 {
    0.05
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cells: default_cells(),
            fault_probability: default_fault_probability(),
            seed: None,
        }
    }
}

/// Shutdown report output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub path: Option<String>,
}

/// Full configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Resource id -> neighboring resource ids
    #[serde(default)]
    pub neighbors: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load and validate config from a specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.cycle_interval_secs == 0 {
            return Err(MedicError::Config(
                "engine.cycle_interval_secs must be at least 1".into(),
            ));
        }
        if self.engine.max_retries == 0 {
            return Err(MedicError::Config("engine.max_retries must be at least 1".into()));
        }
        if self.engine.attempts_per_action == 0 {
            return Err(MedicError::Config(
                "engine.attempts_per_action must be at least 1".into(),
            ));
        }
        if self.engine.reopen_cooldown_secs > MAX_REOPEN_COOLDOWN_SECS {
            return Err(MedicError::Config(format!(
                "engine.reopen_cooldown_secs {} exceeds {}",
                self.engine.reopen_cooldown_secs, MAX_REOPEN_COOLDOWN_SECS
            )));
        }
        // NaN fails the range check
        if !(0.0..=1.0).contains(&self.engine.neutral_prior) {
            return Err(MedicError::Config(format!(
                "engine.neutral_prior {} outside [0, 1]",
                self.engine.neutral_prior
            )));
        }
        if !(0.0..=1.0).contains(&self.simulation.fault_probability) {
            return Err(MedicError::Config(format!(
                "simulation.fault_probability {} outside [0, 1]",
                self.simulation.fault_probability
            )));
        }
        self.thresholds.validate()
    }
}
