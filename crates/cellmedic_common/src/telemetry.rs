//! Telemetry and resource model.
//!
//! A resource (cell) is owned by the telemetry source. The engine only ever
//! sees immutable [`MetricSnapshot`] copies, one per resource per poll.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use crate::error::Result;

/// Monitored metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Downlink throughput (Mbps)
    Throughput,
    /// Round-trip latency (ms)
    Latency,
    /// Packet loss (%)
    PacketLoss,
    /// Interference level (0.0 - 1.0)
    Interference,
    /// Resource utilization (%)
    Utilization,
    /// Handover success ratio (%)
    HandoverSuccess,
}

/// Which side of a bound counts as a breach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachDirection {
    /// Breach when the value drops below the bound
    Below,
    /// Breach when the value rises above the bound
    Above,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Throughput,
        MetricKind::Latency,
        MetricKind::PacketLoss,
        MetricKind::Interference,
        MetricKind::Utilization,
        MetricKind::HandoverSuccess,
    ];

    pub fn direction(&self) -> BreachDirection {
        match self {
            MetricKind::Throughput | MetricKind::HandoverSuccess => BreachDirection::Below,
            _ => BreachDirection::Above,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Throughput => "throughput",
            MetricKind::Latency => "latency",
            MetricKind::PacketLoss => "packet_loss",
            MetricKind::Interference => "interference",
            MetricKind::Utilization => "utilization",
            MetricKind::HandoverSuccess => "handover_success",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational status reported by the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Operational,
    Degraded,
    Failed,
}

/// Named numeric metrics. Ordered so iteration is deterministic.
pub type MetricVector = BTreeMap<MetricKind, f64>;

/// A managed resource as the telemetry source knows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    /// Vendor/class tag (e.g. "vendor-a/macro")
    pub tag: String,
    pub status: ResourceStatus,
    pub metrics: MetricVector,
}

impl Resource {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            status: ResourceStatus::Operational,
            metrics: MetricVector::new(),
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metric(mut self, kind: MetricKind, value: f64) -> Self {
        self.metrics.insert(kind, value);
        self
    }

    /// Take an immutable copy stamped with the current time
    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            resource_id: self.id.clone(),
            tag: self.tag.clone(),
            status: self.status,
            metrics: self.metrics.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time copy of one resource's telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub resource_id: String,
    pub tag: String,
    pub status: ResourceStatus,
    pub metrics: MetricVector,
    pub timestamp: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn metric(&self, kind: MetricKind) -> Option<f64> {
        self.metrics.get(&kind).copied()
    }
}

/// Source of per-cycle telemetry.
///
/// Resources that have gone silent are simply omitted from the result; the
/// orchestrator treats an omitted resource as unavailable.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn poll(&self) -> Result<Vec<MetricSnapshot>>;
}

// ============================================================================
// Scripted Telemetry (Testing)
// ============================================================================

/// Telemetry source that replays pre-configured fleet states.
///
/// Each `poll` consumes one scripted cycle. Once the script runs out the last
/// cycle is repeated, so a test only has to script the interesting part.
pub struct ScriptedTelemetry {
    cycles: Mutex<VecDeque<Vec<Resource>>>,
    last: Mutex<Vec<Resource>>,
}

impl ScriptedTelemetry {
    pub fn new() -> Self {
        Self {
            cycles: Mutex::new(VecDeque::new()),
            last: Mutex::new(Vec::new()),
        }
    }

    pub fn push_cycle(&self, resources: Vec<Resource>) {
        self.cycles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(resources);
    }
}

impl Default for ScriptedTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetry {
    async fn poll(&self) -> Result<Vec<MetricSnapshot>> {
        let next = self
            .cycles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(resources) = next {
            *last = resources;
        }
        Ok(last.iter().map(Resource::snapshot).collect())
    }
}
