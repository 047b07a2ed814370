//! Shutdown report: engine statistics, learned policy and open problems.

use anyhow::{Context, Result};
use cellmedic_common::{
    ActionStatus, ActionType, EngineStats, Fault, FaultStatus, FaultType, HealingAction,
    Orchestrator, PolicyEntry, Severity, UnresolvedReason,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// One healing attempt as it was finally judged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub action_type: ActionType,
    /// Failed when verification contradicted a reported success
    pub status: ActionStatus,
    pub verified: Option<bool>,
}

impl From<&HealingAction> for AttemptSummary {
    fn from(action: &HealingAction) -> Self {
        Self {
            action_type: action.action_type,
            status: action.status,
            verified: action.verified,
        }
    }
}

/// Condensed view of one fault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultSummary {
    pub fault_id: String,
    pub resource_id: String,
    pub fault_type: FaultType,
    pub severity: Severity,
    pub status: FaultStatus,
    /// Actions tried, in order
    pub actions: Vec<AttemptSummary>,
    pub reason: Option<UnresolvedReason>,
    pub detected_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<String>,
}

impl From<&Fault> for FaultSummary {
    fn from(fault: &Fault) -> Self {
        Self {
            fault_id: fault.id.clone(),
            resource_id: fault.resource_id.clone(),
            fault_type: fault.fault_type,
            severity: fault.severity,
            status: fault.status,
            actions: fault.actions.iter().map(AttemptSummary::from).collect(),
            reason: fault.unresolved_reason,
            detected_at: fault.detected_at,
            closed_at: fault.closed_at,
            superseded_by: fault.superseded_by.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub generated_at: DateTime<Utc>,
    pub stats: EngineStats,
    pub success_rate: f64,
    pub policy: Vec<PolicyEntry>,
    /// Closed without recovery and not yet superseded
    pub unresolved: Vec<FaultSummary>,
    /// Still live at shutdown
    pub active: Vec<FaultSummary>,
}

impl EngineReport {
    pub fn from_engine(orch: &Orchestrator) -> Self {
        let stats = orch.stats().clone();
        Self {
            generated_at: Utc::now(),
            success_rate: stats.success_rate(),
            stats,
            policy: orch.policy().snapshot(),
            unresolved: orch
                .history()
                .filter(|f| f.status == FaultStatus::Unresolved && f.superseded_by.is_none())
                .map(FaultSummary::from)
                .collect(),
            active: orch.active_faults().map(FaultSummary::from).collect(),
        }
    }

    /// Write as pretty JSON, creating parent directories
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;

        Ok(())
    }
}
