//! Simulated cell fleet.
//!
//! Stands in for both the telemetry collector and the element manager when no
//! real network is attached. Healthy cells drift around their baseline; every
//! poll may inject a fault into a healthy cell. A fault only clears when an
//! action that actually fixes that fault type is applied.

use async_trait::async_trait;
use cellmedic_common::config::SimulationConfig;
use cellmedic_common::{
    ActionRequest, ControlResponse, FaultType, MedicError, MetricKind, MetricSnapshot, Resource,
    ResourceControl, ResourceStatus, Severity, TelemetrySource,
};
use cellmedic_common::telemetry::MetricVector;
use rand::prelude::*;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use cellmedic_common::ActionType::{self, *};

/// Radio cell footprint. Smaller cells suffer more from the same fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Macro,
    Micro,
    Pico,
    Femto,
}

impl CellKind {
    const ALL: [CellKind; 4] = [CellKind::Macro, CellKind::Micro, CellKind::Pico, CellKind::Femto];

    fn sensitivity(&self) -> f64 {
        match self {
            CellKind::Macro => 0.8,
            CellKind::Micro => 0.9,
            CellKind::Pico => 1.0,
            CellKind::Femto => 1.1,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            CellKind::Macro => "sim/macro",
            CellKind::Micro => "sim/micro",
            CellKind::Pico => "sim/pico",
            CellKind::Femto => "sim/femto",
        }
    }
}

fn severity_factor(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 0.3,
        Severity::Medium => 0.6,
        Severity::High => 0.85,
        Severity::Critical => 1.0,
    }
}

/// Actions that clear a fault type in the simulator
pub fn effective_actions(fault_type: FaultType) -> &'static [ActionType] {
    match fault_type {
        FaultType::Hardware => &[Restart, Reconfigure],
        FaultType::Configuration => &[Reconfigure],
        FaultType::PerformanceDegradation => &[CapacityReallocate, Reconfigure],
        FaultType::Connectivity => &[Restart, RerouteTraffic],
        FaultType::CapacityOverload => &[RerouteTraffic, CapacityReallocate],
        FaultType::Interference => &[PowerAdjust, InterferenceMitigate],
    }
}

/// Where each metric ends up at full effective severity
fn degraded_targets(fault_type: FaultType) -> &'static [(MetricKind, f64)] {
    use MetricKind::*;
    match fault_type {
        FaultType::Hardware => &[(Throughput, 2.0), (Latency, 400.0), (PacketLoss, 20.0)],
        FaultType::Configuration => &[(HandoverSuccess, 60.0)],
        FaultType::PerformanceDegradation => &[(Throughput, 5.0), (Latency, 250.0)],
        FaultType::Connectivity => &[(PacketLoss, 20.0), (HandoverSuccess, 75.0)],
        FaultType::CapacityOverload => &[(Utilization, 160.0), (Latency, 180.0)],
        FaultType::Interference => &[(Interference, 1.0), (Throughput, 15.0)],
    }
}

#[derive(Debug, Clone, Copy)]
struct InjectedFault {
    fault_type: FaultType,
    severity: Severity,
}

#[derive(Debug, Clone)]
struct SimCell {
    kind: CellKind,
    status: ResourceStatus,
    baseline: MetricVector,
    metrics: MetricVector,
    fault: Option<InjectedFault>,
}

struct FleetState {
    cells: BTreeMap<String, SimCell>,
    rng: StdRng,
    fault_probability: f64,
    tick: u64,
}

fn healthy_metrics(rng: &mut StdRng) -> MetricVector {
    let mut m = MetricVector::new();
    m.insert(MetricKind::Throughput, rng.gen_range(45.0..55.0));
    m.insert(MetricKind::Latency, rng.gen_range(10.0..15.0));
    m.insert(MetricKind::PacketLoss, rng.gen_range(0.0..0.5));
    m.insert(MetricKind::Interference, rng.gen_range(0.05..0.15));
    m.insert(MetricKind::Utilization, rng.gen_range(30.0..50.0));
    m.insert(MetricKind::HandoverSuccess, 98.5);
    m
}

impl FleetState {
    /// Small random walk on healthy cells, kept inside healthy ranges
    fn drift(&mut self) {
        for cell in self.cells.values_mut().filter(|c| c.fault.is_none()) {
            for (kind, value) in cell.metrics.iter_mut() {
                let (step, lo, hi) = match kind {
                    MetricKind::Throughput => (2.0, 40.0, 60.0),
                    MetricKind::Latency => (1.0, 8.0, 20.0),
                    MetricKind::Utilization => (5.0, 20.0, 70.0),
                    _ => continue,
                };
                *value = (*value + self.rng.gen_range(-step..=step)).clamp(lo, hi);
            }
        }
    }

    fn inject(&mut self, id: &str, fault_type: FaultType, severity: Severity) -> bool {
        let Some(cell) = self.cells.get_mut(id) else {
            return false;
        };
        let effective = (severity_factor(severity) * cell.kind.sensitivity()).min(1.0);
        for &(kind, worst) in degraded_targets(fault_type) {
            let base = cell.baseline.get(&kind).copied().unwrap_or(0.0);
            let mut value = base + (worst - base) * effective;
            if kind == MetricKind::Utilization {
                value = value.min(100.0);
            }
            cell.metrics.insert(kind, value);
        }
        cell.status = match fault_type {
            FaultType::Hardware => ResourceStatus::Failed,
            _ => ResourceStatus::Degraded,
        };
        cell.fault = Some(InjectedFault { fault_type, severity });
        info!("Injected {:?} {} fault into {}", severity, fault_type, id);
        true
    }

    fn restore(&mut self, id: &str) {
        if let Some(cell) = self.cells.get_mut(id) {
            let mut metrics = cell.baseline.clone();
            for value in metrics.values_mut() {
                *value *= self.rng.gen_range(0.95..=1.05);
            }
            metrics.insert(MetricKind::HandoverSuccess, 98.5);
            cell.metrics = metrics;
            cell.status = ResourceStatus::Operational;
            cell.fault = None;
        }
    }

    fn maybe_inject(&mut self) {
        if self.fault_probability <= 0.0 {
            return;
        }
        let healthy: Vec<String> = self
            .cells
            .iter()
            .filter(|(_, c)| c.fault.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        for id in healthy {
            if self.rng.gen_bool(self.fault_probability) {
                let fault_type = *FaultType::ALL.choose(&mut self.rng).unwrap_or(&FaultType::Hardware);
                let severity = *[Severity::Medium, Severity::High, Severity::Critical]
                    .choose(&mut self.rng)
                    .unwrap_or(&Severity::Medium);
                self.inject(&id, fault_type, severity);
            }
        }
    }
}

/// In-process fleet implementing both engine ports
pub struct SimulatedFleet {
    state: Mutex<FleetState>,
    max_action_delay_ms: u64,
}

impl SimulatedFleet {
    pub fn new(config: &SimulationConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut cells = BTreeMap::new();
        for i in 0..config.cells {
            let kind = *CellKind::ALL.choose(&mut rng).unwrap_or(&CellKind::Macro);
            let baseline = healthy_metrics(&mut rng);
            cells.insert(
                format!("cell-{:03}", i),
                SimCell {
                    kind,
                    status: ResourceStatus::Operational,
                    metrics: baseline.clone(),
                    baseline,
                    fault: None,
                },
            );
        }
        Self {
            state: Mutex::new(FleetState {
                cells,
                rng,
                fault_probability: config.fault_probability,
                tick: 0,
            }),
            max_action_delay_ms: 250,
        }
    }

    /// Cap the simulated control latency
    pub fn with_max_action_delay(mut self, delay: Duration) -> Self {
        self.max_action_delay_ms = delay.as_millis() as u64;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn cell_ids(&self) -> Vec<String> {
        self.lock().cells.keys().cloned().collect()
    }

    pub fn inject(&self, id: &str, fault_type: FaultType, severity: Severity) -> cellmedic_common::Result<()> {
        if self.lock().inject(id, fault_type, severity) {
            Ok(())
        } else {
            Err(MedicError::UnknownResource(id.to_string()))
        }
    }

    pub fn injected_fault(&self, id: &str) -> Option<FaultType> {
        self.lock()
            .cells
            .get(id)
            .and_then(|c| c.fault)
            .map(|f| f.fault_type)
    }

    /// Take a cell out of the fleet, as if decommissioned
    pub fn remove_cell(&self, id: &str) -> bool {
        self.lock().cells.remove(id).is_some()
    }
}

#[async_trait]
impl TelemetrySource for SimulatedFleet {
    async fn poll(&self) -> cellmedic_common::Result<Vec<MetricSnapshot>> {
        let mut state = self.lock();
        state.tick += 1;
        state.drift();
        state.maybe_inject();
        debug!("Fleet tick {}: {} cells", state.tick, state.cells.len());

        Ok(state
            .cells
            .iter()
            .map(|(id, cell)| {
                let mut resource = Resource::new(id.clone(), cell.kind.tag()).with_status(cell.status);
                resource.metrics = cell.metrics.clone();
                resource.snapshot()
            })
            .collect())
    }
}

#[async_trait]
impl ResourceControl for SimulatedFleet {
    async fn execute(&self, request: &ActionRequest) -> cellmedic_common::Result<ControlResponse> {
        let delay = {
            let mut state = self.lock();
            if !state.cells.contains_key(&request.resource_id) {
                return Err(MedicError::UnknownResource(request.resource_id.clone()));
            }
            if self.max_action_delay_ms == 0 {
                0
            } else {
                state.rng.gen_range(0..=self.max_action_delay_ms)
            }
        };
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut state = self.lock();
        let fault = match state.cells.get(&request.resource_id) {
            Some(cell) => cell.fault,
            None => return Err(MedicError::UnknownResource(request.resource_id.clone())),
        };
        match fault {
            None => Ok(ControlResponse::Succeeded),
            Some(fault) if effective_actions(fault.fault_type).contains(&request.action_type) => {
                debug!(
                    "{} cleared {:?} {} on {}",
                    request.action_type, fault.severity, fault.fault_type, request.resource_id
                );
                state.restore(&request.resource_id);
                Ok(ControlResponse::Succeeded)
            }
            Some(_) => Ok(ControlResponse::Failed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellmedic_common::{Detector, Fault, Severity};
    use std::collections::BTreeMap;

    fn fleet(cells: usize, fault_probability: f64) -> SimulatedFleet {
        SimulatedFleet::new(&SimulationConfig {
            cells,
            fault_probability,
            seed: Some(7),
        })
        .with_max_action_delay(Duration::ZERO)
    }

    fn request(resource_id: &str, action_type: ActionType) -> ActionRequest {
        ActionRequest {
            action_id: "a1".into(),
            fault_id: "f1".into(),
            resource_id: resource_id.into(),
            action_type,
            parameters: BTreeMap::new(),
        }
    }

    async fn detect(fleet: &SimulatedFleet, id: &str) -> Option<Fault> {
        let snapshots = fleet.poll().await.unwrap();
        let snap = snapshots.iter().find(|s| s.resource_id == id)?;
        Detector::default().detect(snap, ResourceStatus::Operational)
    }

    #[tokio::test]
    async fn test_quiet_fleet_stays_healthy() {
        let fleet = fleet(10, 0.0);
        let detector = Detector::default();
        for _ in 0..20 {
            for snap in fleet.poll().await.unwrap() {
                assert!(detector.detect(&snap, ResourceStatus::Operational).is_none(), "{:?}", snap);
            }
        }
        assert_eq!(fleet.cell_ids().len(), 10);
    }

    #[tokio::test]
    async fn test_same_seed_same_fleet() {
        let a = fleet(5, 0.3).poll().await.unwrap();
        let b = fleet(5, 0.3).poll().await.unwrap();
        let metrics = |s: &[MetricSnapshot]| s.iter().map(|x| x.metrics.clone()).collect::<Vec<_>>();
        assert_eq!(metrics(&a), metrics(&b));
    }

    #[tokio::test]
    async fn test_injected_faults_are_detected_as_their_type() {
        for fault_type in FaultType::ALL {
            for severity in [Severity::Medium, Severity::High, Severity::Critical] {
                let fleet = fleet(1, 0.0);
                fleet.inject("cell-000", fault_type, severity).unwrap();
                let fault = detect(&fleet, "cell-000").await.unwrap();
                assert_eq!(fault.fault_type, fault_type, "{:?}", severity);
            }
        }
    }

    #[tokio::test]
    async fn test_effective_action_restores_cell() {
        let fleet = fleet(1, 0.0);
        fleet.inject("cell-000", FaultType::Hardware, Severity::Critical).unwrap();

        let wrong = fleet.execute(&request("cell-000", PowerAdjust)).await.unwrap();
        assert_eq!(wrong, ControlResponse::Failed);
        assert_eq!(fleet.injected_fault("cell-000"), Some(FaultType::Hardware));

        let right = fleet.execute(&request("cell-000", Restart)).await.unwrap();
        assert_eq!(right, ControlResponse::Succeeded);
        assert_eq!(fleet.injected_fault("cell-000"), None);
        assert!(detect(&fleet, "cell-000").await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_cell_rejected() {
        let fleet = fleet(2, 0.0);
        assert!(fleet.inject("cell-404", FaultType::Hardware, Severity::High).is_err());
        assert!(fleet.remove_cell("cell-001"));
        let err = fleet.execute(&request("cell-001", Restart)).await.unwrap_err();
        assert_eq!(err.code(), MedicError::UnknownResource(String::new()).code());
    }
}
