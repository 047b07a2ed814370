//! Action executor.
//!
//! Issues one action through the control interface under a bounded timeout,
//! then judges recovery against fresh telemetry. The control interface's own
//! "succeeded" is never taken as proof of recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::control::{ActionRequest, ControlResponse, ResourceControl};
use crate::detector::{Detector, Symptom};
use crate::fault::{ActionStatus, Fault};
use crate::telemetry::{MetricKind, MetricSnapshot, ResourceStatus};

/// What came back from the control interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub action_id: String,
    /// Succeeded, Failed or TimedOut
    pub status: ActionStatus,
    pub detail: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Verdict of checking a resource after an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    /// Operational and every triggering symptom cleared
    Recovered,
    /// Resource is not reporting operational
    NotOperational(ResourceStatus),
    /// Operational, but some triggering symptoms remain
    SymptomsPersist(Vec<Symptom>),
    /// Metrics the fault was raised on are absent from the snapshot
    MissingMetrics(Vec<MetricKind>),
}

impl Verification {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Verification::Recovered)
    }
}

#[derive(Clone)]
pub struct ActionExecutor {
    control: Arc<dyn ResourceControl>,
    detector: Detector,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(control: Arc<dyn ResourceControl>, detector: Detector, timeout: Duration) -> Self {
        Self {
            control,
            detector,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one action. Never waits longer than the configured timeout.
    pub async fn execute(&self, request: ActionRequest) -> ExecutionReport {
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            "Executing {} on {} (action {})",
            request.action_type, request.resource_id, request.action_id
        );

        let (status, detail) = match tokio::time::timeout(self.timeout, self.control.execute(&request)).await {
            Ok(Ok(ControlResponse::Succeeded)) => (ActionStatus::Succeeded, None),
            Ok(Ok(ControlResponse::Failed)) => (
                ActionStatus::Failed,
                Some("control interface reported failure".to_string()),
            ),
            Ok(Ok(ControlResponse::TimedOut)) => (
                ActionStatus::TimedOut,
                Some("control interface reported timeout".to_string()),
            ),
            Ok(Err(e)) => (ActionStatus::Failed, Some(e.to_string())),
            Err(_) => (
                ActionStatus::TimedOut,
                Some(format!("no response within {}ms", self.timeout.as_millis())),
            ),
        };

        match status {
            ActionStatus::TimedOut => warn!(
                "Action {} on {} timed out: {}",
                request.action_type,
                request.resource_id,
                detail.as_deref().unwrap_or("")
            ),
            ActionStatus::Failed => warn!(
                "Action {} on {} failed: {}",
                request.action_type,
                request.resource_id,
                detail.as_deref().unwrap_or("")
            ),
            _ => info!(
                "Action {} on {} reported success",
                request.action_type, request.resource_id
            ),
        }

        ExecutionReport {
            action_id: request.action_id,
            status,
            detail,
            started_at,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Check the fault's resource against a snapshot taken after the action
    pub fn verify(&self, fault: &Fault, snapshot: &MetricSnapshot) -> Verification {
        if snapshot.status != ResourceStatus::Operational {
            return Verification::NotOperational(snapshot.status);
        }
        // an absent metric is unknown, not cleared
        let missing: Vec<MetricKind> = fault
            .symptoms
            .iter()
            .filter_map(|f| match f.symptom {
                Symptom::Metric(kind) if snapshot.metric(kind).is_none() => Some(kind),
                _ => None,
            })
            .collect();
        if !missing.is_empty() {
            return Verification::MissingMetrics(missing);
        }
        let current: Vec<Symptom> = self
            .detector
            .evaluate(snapshot)
            .into_iter()
            .map(|f| f.symptom)
            .collect();
        let persisting: Vec<Symptom> = fault
            .symptoms
            .iter()
            .map(|f| f.symptom)
            .filter(|s| current.contains(s))
            .collect();
        if persisting.is_empty() {
            Verification::Recovered
        } else {
            Verification::SymptomsPersist(persisting)
        }
    }
}
