//! Cellmedic Common - fault remediation engine for network cells
//!
//! Telemetry in, corrective actions out. Detection, diagnosis, execution,
//! verification and learning live here; the daemon only wires them to a
//! fleet and a clock.

pub mod config;
pub mod control;
pub mod detector;
pub mod diagnosis;
pub mod error;
pub mod executor;
pub mod fault;
pub mod neighbors;
pub mod orchestrator;
pub mod policy;
pub mod telemetry;

pub use config::{Config, EngineConfig, ThresholdBounds, ThresholdConfig};
pub use control::{ActionRequest, ControlResponse, ResourceControl, ScriptedControl, ScriptedResponse};
pub use detector::{Detector, FlagLevel, Symptom, SymptomFlag};
pub use diagnosis::{Candidate, Diagnosis, DiagnosisEngine, KnowledgeBase, KnowledgeRule, RuleTier};
pub use error::{MedicError, Result};
pub use executor::{ActionExecutor, ExecutionReport, Verification};
pub use fault::{
    ActionStatus, ActionType, Fault, FaultStatus, FaultType, HealingAction, Severity, UnresolvedReason,
};
pub use neighbors::NeighborMap;
pub use orchestrator::{CycleReport, EngineStats, Orchestrator};
pub use policy::{Outcome, PolicyEntry, PolicyRecord, PolicyStore};
pub use telemetry::{MetricKind, MetricSnapshot, Resource, ResourceStatus, ScriptedTelemetry, TelemetrySource};
