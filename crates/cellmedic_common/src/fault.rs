//! Fault and healing-action records.
//!
//! A fault's progress through detect -> diagnose -> heal -> verify is kept as
//! an explicit [`FaultStatus`] on the record itself, so a stored fault can be
//! resumed without re-deriving where it was.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detector::SymptomFlag;
use crate::diagnosis::Diagnosis;
use crate::error::{MedicError, Result};
use crate::telemetry::{MetricSnapshot, ResourceStatus};

/// Fault classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    Hardware,
    Configuration,
    PerformanceDegradation,
    Connectivity,
    CapacityOverload,
    Interference,
}

impl FaultType {
    pub const ALL: [FaultType; 6] = [
        FaultType::Hardware,
        FaultType::Configuration,
        FaultType::PerformanceDegradation,
        FaultType::Connectivity,
        FaultType::CapacityOverload,
        FaultType::Interference,
    ];

    /// Tie-break rank between equally specific signatures (0 wins)
    pub fn priority(&self) -> u8 {
        match self {
            FaultType::Hardware => 0,
            FaultType::Connectivity => 1,
            FaultType::CapacityOverload => 2,
            FaultType::Interference => 3,
            FaultType::Configuration => 4,
            FaultType::PerformanceDegradation => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::Hardware => "hardware",
            FaultType::Configuration => "configuration",
            FaultType::PerformanceDegradation => "performance_degradation",
            FaultType::Connectivity => "connectivity",
            FaultType::CapacityOverload => "capacity_overload",
            FaultType::Interference => "interference",
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Lifecycle state of a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStatus {
    Detected,
    Diagnosing,
    Healing,
    Verifying,
    Resolved,
    Unresolved,
}

impl FaultStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FaultStatus::Resolved | FaultStatus::Unresolved)
    }

    /// Allowed edges of the lifecycle. Any live state may be abandoned.
    pub fn can_transition_to(&self, next: FaultStatus) -> bool {
        use FaultStatus::*;
        match (self, next) {
            (from, Unresolved) => !from.is_terminal(),
            (Detected, Diagnosing) => true,
            (Diagnosing, Healing) => true,
            (Healing, Verifying) => true,
            (Verifying, Resolved) => true,
            (Verifying, Healing) => true,
            _ => false,
        }
    }
}

/// Why a fault ended unresolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Attempt budget used up
    RetriesExhausted,
    /// Every candidate action was tried
    NoCandidates,
    /// Resource dropped out of telemetry
    ResourceUnavailable,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnresolvedReason::RetriesExhausted => "retries exhausted",
            UnresolvedReason::NoCandidates => "no further candidate actions",
            UnresolvedReason::ResourceUnavailable => "resource unavailable",
        };
        f.write_str(text)
    }
}

/// Corrective action kinds the control interface understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Restart,
    Reconfigure,
    PowerAdjust,
    RerouteTraffic,
    CapacityReallocate,
    InterferenceMitigate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Restart => "restart",
            ActionType::Reconfigure => "reconfigure",
            ActionType::PowerAdjust => "power_adjust",
            ActionType::RerouteTraffic => "reroute_traffic",
            ActionType::CapacityReallocate => "capacity_reallocate",
            ActionType::InterferenceMitigate => "interference_mitigate",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a healing action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
}

impl ActionStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ActionStatus::Pending | ActionStatus::Executing)
    }
}

/// One attempt at healing a fault
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAction {
    pub id: String,
    pub fault_id: String,
    pub resource_id: String,
    pub action_type: ActionType,
    pub status: ActionStatus,
    /// 1-based attempt index within the fault
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Verification verdict, set once fresh telemetry has been checked
    pub verified: Option<bool>,
    pub detail: Option<String>,
}

impl HealingAction {
    pub fn new(fault: &Fault, action_type: ActionType, attempt: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fault_id: fault.id.clone(),
            resource_id: fault.resource_id.clone(),
            action_type,
            status: ActionStatus::Pending,
            attempt,
            started_at: None,
            completed_at: None,
            verified: None,
            detail: None,
        }
    }
}

/// A detected fault on one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fault {
    pub id: String,
    pub resource_id: String,
    pub fault_type: FaultType,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    /// Snapshot that raised the fault
    pub trigger: MetricSnapshot,
    /// Resource status seen on the previous cycle
    pub prior_status: ResourceStatus,
    pub symptoms: Vec<SymptomFlag>,
    pub status: FaultStatus,
    pub diagnosis: Option<Diagnosis>,
    pub actions: Vec<HealingAction>,
    pub closed_at: Option<DateTime<Utc>>,
    pub unresolved_reason: Option<UnresolvedReason>,
    /// Id of the fault that replaced this one after it went unresolved
    pub superseded_by: Option<String>,
}

impl Fault {
    pub fn new(
        fault_type: FaultType,
        severity: Severity,
        trigger: MetricSnapshot,
        prior_status: ResourceStatus,
        symptoms: Vec<SymptomFlag>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: trigger.resource_id.clone(),
            fault_type,
            severity,
            detected_at: Utc::now(),
            trigger,
            prior_status,
            symptoms,
            status: FaultStatus::Detected,
            diagnosis: None,
            actions: Vec::new(),
            closed_at: None,
            unresolved_reason: None,
            superseded_by: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Move along the lifecycle, rejecting edges the state machine lacks
    pub fn transition(&mut self, next: FaultStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MedicError::Internal(format!(
                "fault {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.closed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Close the fault as unresolved from whatever live state it is in
    pub fn abandon(&mut self, reason: UnresolvedReason) -> Result<()> {
        self.transition(FaultStatus::Unresolved)?;
        self.unresolved_reason = Some(reason);
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.actions.len() as u32
    }

    pub fn current_action(&self) -> Option<&HealingAction> {
        self.actions.last()
    }

    pub fn current_action_mut(&mut self) -> Option<&mut HealingAction> {
        self.actions.last_mut()
    }

    pub fn has_action_in_flight(&self) -> bool {
        self.actions.iter().any(|a| a.status.is_in_flight())
    }

    /// Attempts already spent on one action type
    pub fn attempts_of(&self, action_type: ActionType) -> u32 {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count() as u32
    }

    /// Action types that were tried and failed verification
    pub fn failed_actions(&self) -> Vec<ActionType> {
        let mut failed: Vec<ActionType> = self
            .actions
            .iter()
            .filter(|a| a.verified == Some(false))
            .map(|a| a.action_type)
            .collect();
        failed.sort();
        failed.dedup();
        failed
    }
}
