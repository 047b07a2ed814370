//! Threshold-based fault detection.
//!
//! The detector is stateless per call: a snapshot is compared against the
//! threshold table, every breached bound becomes a [`SymptomFlag`], and the
//! flag set is classified against the static signature table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::config::ThresholdConfig;
use crate::fault::{Fault, FaultType, Severity};
use crate::telemetry::{BreachDirection, MetricKind, MetricSnapshot, ResourceStatus};

/// Something observably wrong with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symptom {
    /// A metric is outside its bounds
    Metric(MetricKind),
    /// The resource reports itself failed
    Outage,
}

/// Which bound was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagLevel {
    Warning,
    Critical,
}

/// One breached bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymptomFlag {
    pub symptom: Symptom,
    pub level: FlagLevel,
    /// Observed value (None for status-derived flags)
    pub value: Option<f64>,
    /// Bound that was crossed
    pub bound: Option<f64>,
}

/// Symptom combination that identifies a fault type
#[derive(Debug, Clone, Copy)]
pub struct FaultSignature {
    pub fault_type: FaultType,
    pub symptoms: &'static [Symptom],
}

impl FaultSignature {
    pub fn specificity(&self) -> usize {
        self.symptoms.len()
    }

    pub fn matches(&self, present: &BTreeSet<Symptom>) -> bool {
        self.symptoms.iter().all(|s| present.contains(s))
    }
}

use MetricKind::{HandoverSuccess, Interference, Latency, PacketLoss, Throughput, Utilization};
use Symptom::{Metric, Outage};

/// Fault signature table. A row applies when all of its symptoms are present.
pub const SIGNATURES: &[FaultSignature] = &[
    FaultSignature { fault_type: FaultType::Hardware, symptoms: &[Outage] },
    FaultSignature { fault_type: FaultType::Hardware, symptoms: &[Metric(Latency), Metric(PacketLoss)] },
    FaultSignature {
        fault_type: FaultType::Hardware,
        symptoms: &[Metric(Latency), Metric(PacketLoss), Metric(Throughput)],
    },
    FaultSignature { fault_type: FaultType::Connectivity, symptoms: &[Metric(PacketLoss)] },
    FaultSignature {
        fault_type: FaultType::Connectivity,
        symptoms: &[Metric(PacketLoss), Metric(HandoverSuccess)],
    },
    FaultSignature { fault_type: FaultType::CapacityOverload, symptoms: &[Metric(Utilization)] },
    FaultSignature {
        fault_type: FaultType::CapacityOverload,
        symptoms: &[Metric(Utilization), Metric(Latency)],
    },
    FaultSignature { fault_type: FaultType::Interference, symptoms: &[Metric(Interference)] },
    FaultSignature {
        fault_type: FaultType::Interference,
        symptoms: &[Metric(Interference), Metric(Throughput)],
    },
    FaultSignature { fault_type: FaultType::Configuration, symptoms: &[Metric(HandoverSuccess)] },
    FaultSignature { fault_type: FaultType::PerformanceDegradation, symptoms: &[Metric(Throughput)] },
    FaultSignature { fault_type: FaultType::PerformanceDegradation, symptoms: &[Metric(Latency)] },
    FaultSignature {
        fault_type: FaultType::PerformanceDegradation,
        symptoms: &[Metric(Throughput), Metric(Latency)],
    },
];

/// Pick the most specific matching signature; ties go to the higher-priority type
pub fn classify(present: &BTreeSet<Symptom>) -> Option<FaultType> {
    SIGNATURES
        .iter()
        .filter(|sig| sig.matches(present))
        .max_by(|a, b| {
            a.specificity()
                .cmp(&b.specificity())
                .then_with(|| b.fault_type.priority().cmp(&a.fault_type.priority()))
        })
        .map(|sig| sig.fault_type)
}

/// Severity from the flag set. No flags means no fault.
pub fn severity_for(flags: &[SymptomFlag]) -> Option<Severity> {
    if flags.iter().any(|f| f.level == FlagLevel::Critical) {
        return Some(Severity::Critical);
    }
    let warnings: BTreeSet<Symptom> = flags
        .iter()
        .filter(|f| f.level == FlagLevel::Warning)
        .map(|f| f.symptom)
        .collect();
    match warnings.len() {
        0 => None,
        1 => Some(Severity::Medium),
        _ => Some(Severity::High),
    }
}

/// Stateless threshold detector
#[derive(Debug, Clone)]
pub struct Detector {
    thresholds: ThresholdConfig,
}

impl Detector {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    /// Every breached bound in the snapshot
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> Vec<SymptomFlag> {
        let mut flags = Vec::new();

        if snapshot.status == ResourceStatus::Failed {
            flags.push(SymptomFlag {
                symptom: Symptom::Outage,
                level: FlagLevel::Critical,
                value: None,
                bound: None,
            });
        }

        for (&kind, &value) in &snapshot.metrics {
            let bounds = self.thresholds.bounds(kind);
            let beyond = |bound: f64| match kind.direction() {
                BreachDirection::Above => value > bound,
                BreachDirection::Below => value < bound,
            };
            let flag = if beyond(bounds.critical) {
                Some((FlagLevel::Critical, bounds.critical))
            } else if beyond(bounds.warning) {
                Some((FlagLevel::Warning, bounds.warning))
            } else {
                None
            };
            if let Some((level, bound)) = flag {
                flags.push(SymptomFlag {
                    symptom: Symptom::Metric(kind),
                    level,
                    value: Some(value),
                    bound: Some(bound),
                });
            }
        }

        flags
    }

    /// Zero or one candidate fault for this snapshot
    pub fn detect(&self, snapshot: &MetricSnapshot, prior_status: ResourceStatus) -> Option<Fault> {
        let flags = self.evaluate(snapshot);
        let severity = severity_for(&flags)?;
        let present: BTreeSet<Symptom> = flags.iter().map(|f| f.symptom).collect();
        let fault_type = classify(&present)?;

        debug!(
            "{}: {} symptom(s) -> {} ({:?}), previously {:?}",
            snapshot.resource_id,
            flags.len(),
            fault_type,
            severity,
            prior_status
        );

        Some(Fault::new(
            fault_type,
            severity,
            snapshot.clone(),
            prior_status,
            flags,
        ))
    }

    /// Whether any of the given symptoms is still breached in the snapshot
    pub fn any_persisting(&self, snapshot: &MetricSnapshot, symptoms: &[SymptomFlag]) -> bool {
        let current: BTreeSet<Symptom> = self.evaluate(snapshot).iter().map(|f| f.symptom).collect();
        symptoms.iter().any(|f| current.contains(&f.symptom))
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(ThresholdConfig::default())
    }
}
