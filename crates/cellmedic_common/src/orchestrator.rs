//! Remediation loop.
//!
//! Drives detect -> diagnose -> heal -> verify -> learn across the fleet on a
//! fixed cadence. Each resource holds at most one live fault and each fault at
//! most one action in flight. Actions run as their own tasks and may span
//! cycles; their outcome is only trusted once the next fresh snapshot has been
//! checked.
//!
//! ```text
//!  poll ──► vanished? ──► abandon fault (resource unavailable)
//!    │
//!    ├─► no fault ──► detect ──► diagnose ──► launch action
//!    │
//!    ├─► verifying ──► verify ──┬─► resolved     (policy: success)
//!    │                          ├─► next action  (policy: failure)
//!    │                          └─► unresolved   (policy: failure)
//!    │
//!    └─► healing (pending) ──► launch unless a neighbor is busy
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{Config, EngineConfig};
use crate::control::{ActionRequest, ResourceControl};
use crate::detector::Detector;
use crate::diagnosis::{Diagnosis, DiagnosisEngine, KnowledgeBase};
use crate::executor::{ActionExecutor, ExecutionReport};
use crate::fault::{
    ActionStatus, ActionType, Fault, FaultStatus, HealingAction, UnresolvedReason,
};
use crate::neighbors::NeighborMap;
use crate::policy::{Outcome, PolicyStore};
use crate::telemetry::{MetricSnapshot, ResourceStatus, TelemetrySource};

/// Running counters for the life of the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub cycles: u64,
    pub poll_failures: u64,
    pub faults_opened: u64,
    pub faults_resolved: u64,
    pub faults_unresolved: u64,
    pub actions_launched: u64,
    pub actions_verified_ok: u64,
    pub actions_verified_failed: u64,
    pub action_timeouts: u64,
    pub action_failures: u64,
    pub resources_lost: u64,
    pub deferred_by_neighbor: u64,
}

impl EngineStats {
    /// Verified successes over verified attempts, in percent
    pub fn success_rate(&self) -> f64 {
        let verified = self.actions_verified_ok + self.actions_verified_failed;
        if verified == 0 {
            0.0
        } else {
            self.actions_verified_ok as f64 / verified as f64 * 100.0
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub resources_seen: usize,
    pub poll_failed: bool,
    /// Fault ids opened this cycle
    pub opened: Vec<String>,
    pub resolved: Vec<String>,
    pub unresolved: Vec<String>,
    pub launched: usize,
    pub deferred: usize,
}

impl CycleReport {
    pub fn is_quiet(&self) -> bool {
        self.opened.is_empty()
            && self.resolved.is_empty()
            && self.unresolved.is_empty()
            && self.launched == 0
            && self.deferred == 0
    }
}

struct InFlight {
    action_id: String,
    started_at: DateTime<Utc>,
    handle: JoinHandle<ExecutionReport>,
}

struct LastUnresolved {
    fault_id: String,
    closed_at: DateTime<Utc>,
}

/// Where a fault goes after diagnosis or a failed verification
enum NextStep {
    Use(ActionType),
    Rediagnosed(Diagnosis, ActionType),
    Exhausted(UnresolvedReason),
}

fn advance(fault: &mut Fault, next: FaultStatus) {
    if let Err(e) = fault.transition(next) {
        error!("{}", e);
    }
}

pub struct Orchestrator {
    config: EngineConfig,
    telemetry: Arc<dyn TelemetrySource>,
    detector: Detector,
    diagnosis: DiagnosisEngine,
    executor: ActionExecutor,
    policy: Arc<PolicyStore>,
    neighbors: NeighborMap,
    /// Live fault per resource id
    active: BTreeMap<String, Fault>,
    in_flight: HashMap<String, InFlight>,
    last_status: HashMap<String, ResourceStatus>,
    last_unresolved: HashMap<String, LastUnresolved>,
    history: VecDeque<Fault>,
    stats: EngineStats,
    cycle: u64,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        telemetry: Arc<dyn TelemetrySource>,
        control: Arc<dyn ResourceControl>,
        policy: Arc<PolicyStore>,
    ) -> Self {
        Self::with_knowledge(config, telemetry, control, policy, KnowledgeBase::standard())
    }

    pub fn with_knowledge(
        config: &Config,
        telemetry: Arc<dyn TelemetrySource>,
        control: Arc<dyn ResourceControl>,
        policy: Arc<PolicyStore>,
        knowledge: KnowledgeBase,
    ) -> Self {
        let detector = Detector::new(config.thresholds.clone());
        let executor = ActionExecutor::new(control, detector.clone(), config.engine.action_timeout());
        Self {
            config: config.engine.clone(),
            telemetry,
            diagnosis: DiagnosisEngine::new(knowledge, Arc::clone(&policy)),
            detector,
            executor,
            policy,
            neighbors: NeighborMap::from_config(&config.neighbors),
            active: BTreeMap::new(),
            in_flight: HashMap::new(),
            last_status: HashMap::new(),
            last_unresolved: HashMap::new(),
            history: VecDeque::new(),
            stats: EngineStats::default(),
            cycle: 0,
        }
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn policy(&self) -> Arc<PolicyStore> {
        Arc::clone(&self.policy)
    }

    pub fn active_fault(&self, resource_id: &str) -> Option<&Fault> {
        self.active.get(resource_id)
    }

    pub fn active_faults(&self) -> impl Iterator<Item = &Fault> {
        self.active.values()
    }

    /// Closed faults, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Fault> {
        self.history.iter()
    }

    /// Most recent fault for a resource, live or closed
    pub fn latest_fault(&self, resource_id: &str) -> Option<&Fault> {
        self.active
            .get(resource_id)
            .or_else(|| self.history.iter().rev().find(|f| f.resource_id == resource_id))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Poll until `shutdown` completes, then drain in-flight actions
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.cycle_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "Remediation loop running (every {}s, max {} attempts per fault)",
            self.config.cycle_interval_secs, self.config.max_retries
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.is_quiet() {
                        debug!("Cycle {}: {} resources, nothing to do", report.cycle, report.resources_seen);
                    } else {
                        info!(
                            "Cycle {}: {} opened, {} resolved, {} unresolved, {} launched, {} deferred",
                            report.cycle,
                            report.opened.len(),
                            report.resolved.len(),
                            report.unresolved.len(),
                            report.launched,
                            report.deferred
                        );
                    }
                }
            }
        }

        info!("Stopping: waiting for {} in-flight action(s)", self.in_flight.len());
        self.wait_for_actions().await;
    }

    /// One poll of the fleet
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        self.stats.cycles += 1;
        let mut report = CycleReport {
            cycle: self.cycle,
            ..Default::default()
        };

        // before polling, so the snapshots are newer than any finished action
        self.collect_finished().await;

        let snapshots = match self.telemetry.poll().await {
            Ok(s) => s,
            Err(e) => {
                warn!("Telemetry poll failed, skipping cycle {}: {}", self.cycle, e);
                self.stats.poll_failures += 1;
                report.poll_failed = true;
                return report;
            }
        };

        let present: BTreeMap<String, MetricSnapshot> = snapshots
            .into_iter()
            .map(|s| (s.resource_id.clone(), s))
            .collect();
        report.resources_seen = present.len();

        self.drop_vanished(&present, &mut report);

        for snapshot in present.values() {
            self.process_snapshot(snapshot, &mut report);
        }

        report
    }

    /// Block until every in-flight action has reported back
    pub async fn wait_for_actions(&mut self) {
        let ids: Vec<String> = self.in_flight.keys().cloned().collect();
        for id in ids {
            if let Some(flight) = self.in_flight.remove(&id) {
                let report = Self::join(flight).await;
                self.apply_report(&id, report);
            }
        }
    }

    async fn collect_finished(&mut self) {
        let finished: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in finished {
            if let Some(flight) = self.in_flight.remove(&id) {
                let report = Self::join(flight).await;
                self.apply_report(&id, report);
            }
        }
    }

    async fn join(flight: InFlight) -> ExecutionReport {
        match flight.handle.await {
            Ok(report) => report,
            Err(e) => ExecutionReport {
                action_id: flight.action_id,
                status: ActionStatus::Failed,
                detail: Some(format!("action task ended abnormally: {}", e)),
                started_at: flight.started_at,
                completed_at: Utc::now(),
                duration_ms: 0,
            },
        }
    }

    /// Healing -> Verifying once the executor has answered
    fn apply_report(&mut self, resource_id: &str, report: ExecutionReport) {
        let Some(fault) = self.active.get_mut(resource_id) else {
            return;
        };
        match report.status {
            ActionStatus::TimedOut => self.stats.action_timeouts += 1,
            ActionStatus::Failed => self.stats.action_failures += 1,
            _ => {}
        }
        if let Some(action) = fault.current_action_mut() {
            if action.id == report.action_id {
                action.status = report.status;
                action.completed_at = Some(report.completed_at);
                action.detail = report.detail;
            }
        }
        advance(fault, FaultStatus::Verifying);
    }

    fn drop_vanished(&mut self, present: &BTreeMap<String, MetricSnapshot>, report: &mut CycleReport) {
        let gone: Vec<String> = self
            .active
            .keys()
            .filter(|id| !present.contains_key(*id))
            .cloned()
            .collect();

        for id in gone {
            if let Some(flight) = self.in_flight.remove(&id) {
                flight.handle.abort();
            }
            if let Some(fault) = self.active.get_mut(&id) {
                if let Some(action) = fault.current_action_mut() {
                    if action.status.is_in_flight() {
                        action.status = ActionStatus::Failed;
                        action.completed_at = Some(Utc::now());
                        action.detail = Some("abandoned: resource unavailable".to_string());
                    }
                }
                warn!(
                    "{} dropped out of telemetry; fault {} abandoned ({})",
                    id,
                    fault.id,
                    UnresolvedReason::ResourceUnavailable
                );
                if let Err(e) = fault.abandon(UnresolvedReason::ResourceUnavailable) {
                    error!("{}", e);
                }
                report.unresolved.push(fault.id.clone());
            }
            self.stats.resources_lost += 1;
            self.close_fault(&id);
        }

        self.last_status.retain(|id, _| present.contains_key(id));
        self.last_unresolved.retain(|id, _| present.contains_key(id));
    }

    fn process_snapshot(&mut self, snapshot: &MetricSnapshot, report: &mut CycleReport) {
        let id = snapshot.resource_id.as_str();
        let prior = self
            .last_status
            .insert(id.to_string(), snapshot.status)
            .unwrap_or(ResourceStatus::Operational);

        match self.active.get(id).map(|f| f.status) {
            Some(FaultStatus::Verifying) => self.verify_fault(id, snapshot, report),
            Some(FaultStatus::Healing) => {
                if !self.in_flight.contains_key(id) {
                    self.try_launch(id, report);
                }
            }
            Some(status) => debug!("{}: fault in {:?}, new detections merged", id, status),
            None => self.maybe_open(snapshot, prior, report),
        }
    }

    fn maybe_open(&mut self, snapshot: &MetricSnapshot, prior: ResourceStatus, report: &mut CycleReport) {
        let id = snapshot.resource_id.as_str();
        let Some(mut fault) = self.detector.detect(snapshot, prior) else {
            // seen clean: the unresolved fault no longer gates new detections
            if let Some(last) = self.last_unresolved.remove(id) {
                debug!("{}: clean since fault {} closed, cooldown cleared", id, last.fault_id);
            }
            return;
        };

        if let Some(last) = self.last_unresolved.get(id) {
            let since = Utc::now().signed_duration_since(last.closed_at);
            if since < self.config.reopen_cooldown() {
                debug!(
                    "{}: still faulty but fault {} closed {}s ago, holding off",
                    id,
                    last.fault_id,
                    since.num_seconds()
                );
                return;
            }
        }
        if let Some(prev) = self.last_unresolved.remove(id) {
            if let Some(old) = self.history.iter_mut().rev().find(|f| f.id == prev.fault_id) {
                old.superseded_by = Some(fault.id.clone());
            }
            info!("{}: fault {} superseded by {}", id, prev.fault_id, fault.id);
        }

        info!(
            "Fault {} opened on {}: {} ({:?}, {} symptom(s))",
            fault.id,
            id,
            fault.fault_type,
            fault.severity,
            fault.symptoms.len()
        );
        self.stats.faults_opened += 1;
        report.opened.push(fault.id.clone());

        advance(&mut fault, FaultStatus::Diagnosing);
        fault.diagnosis = Some(self.diagnosis.diagnose(&fault));
        let step = self.plan_next(&fault);
        self.active.insert(id.to_string(), fault);
        self.apply_next(id, step, report);
    }

    fn verify_fault(&mut self, id: &str, snapshot: &MetricSnapshot, report: &mut CycleReport) {
        let Some(fault) = self.active.get(id) else {
            return;
        };
        let Some(action) = fault.current_action() else {
            return;
        };
        if let Some(done) = action.completed_at {
            if snapshot.timestamp < done {
                debug!("{}: snapshot predates action completion, verifying next cycle", id);
                return;
            }
        }

        let verdict = self.executor.verify(fault, snapshot);
        let recovered = verdict.is_recovered();
        let (fault_type, action_type, reported) = (fault.fault_type, action.action_type, action.status);

        self.policy.record(
            fault_type,
            action_type,
            if recovered { Outcome::Success } else { Outcome::Failure },
        );

        let Some(fault) = self.active.get_mut(id) else {
            return;
        };
        if let Some(action) = fault.current_action_mut() {
            action.verified = Some(recovered);
            if !recovered && action.status == ActionStatus::Succeeded {
                action.status = ActionStatus::Failed;
                action.detail = Some(format!("reported success, verification failed: {:?}", verdict));
            }
        }

        if recovered {
            if reported != ActionStatus::Succeeded {
                info!("{}: recovered although {} reported {:?}", id, action_type, reported);
            }
            info!("Fault {} on {} resolved by {}", fault.id, id, action_type);
            self.stats.actions_verified_ok += 1;
            report.resolved.push(fault.id.clone());
            advance(fault, FaultStatus::Resolved);
            self.close_fault(id);
        } else {
            if reported == ActionStatus::Succeeded {
                warn!(
                    "{}: {} reported success but verification failed: {:?}",
                    id, action_type, verdict
                );
            } else {
                info!("{}: {} did not clear the fault: {:?}", id, action_type, verdict);
            }
            self.stats.actions_verified_failed += 1;
            let step = match self.active.get(id) {
                Some(fault) => self.plan_next(fault),
                None => return,
            };
            self.apply_next(id, step, report);
        }
    }

    fn plan_next(&self, fault: &Fault) -> NextStep {
        if fault.attempts() >= self.config.max_retries {
            return NextStep::Exhausted(UnresolvedReason::RetriesExhausted);
        }
        if let Some(action) = fault
            .diagnosis
            .as_ref()
            .and_then(|d| self.first_eligible(fault, d))
        {
            return NextStep::Use(action);
        }
        let round = fault.diagnosis.as_ref().map(|d| d.round + 1).unwrap_or(0);
        let fresh = self.diagnosis.rediagnose(fault, &fault.failed_actions(), round);
        match self.first_eligible(fault, &fresh) {
            Some(action) => NextStep::Rediagnosed(fresh, action),
            None => NextStep::Exhausted(UnresolvedReason::NoCandidates),
        }
    }

    /// Highest-ranked candidate with attempts left
    fn first_eligible(&self, fault: &Fault, diagnosis: &Diagnosis) -> Option<ActionType> {
        diagnosis
            .candidates
            .iter()
            .map(|c| c.action_type)
            .find(|a| fault.attempts_of(*a) < self.config.attempts_per_action)
    }

    fn apply_next(&mut self, id: &str, step: NextStep, report: &mut CycleReport) {
        let Some(fault) = self.active.get_mut(id) else {
            return;
        };
        let action_type = match step {
            NextStep::Use(action_type) => action_type,
            NextStep::Rediagnosed(diagnosis, action_type) => {
                fault.diagnosis = Some(diagnosis);
                action_type
            }
            NextStep::Exhausted(reason) => {
                warn!(
                    "Fault {} on {} unresolved after {} attempt(s): {}",
                    fault.id,
                    id,
                    fault.attempts(),
                    reason
                );
                if let Err(e) = fault.abandon(reason) {
                    error!("{}", e);
                }
                report.unresolved.push(fault.id.clone());
                self.close_fault(id);
                return;
            }
        };

        let attempt = fault.attempts() + 1;
        let action = HealingAction::new(fault, action_type, attempt);
        fault.actions.push(action);
        advance(fault, FaultStatus::Healing);
        self.try_launch(id, report);
    }

    /// Start the fault's pending action unless a neighbor is mid-action
    fn try_launch(&mut self, id: &str, report: &mut CycleReport) {
        if let Some(neighbor) = self
            .neighbors
            .blocking_neighbor(id, |n| self.in_flight.contains_key(n))
        {
            debug!("{}: neighbor {} has an action in flight, deferring", id, neighbor);
            self.stats.deferred_by_neighbor += 1;
            report.deferred += 1;
            return;
        }

        let Some(fault) = self.active.get_mut(id) else {
            return;
        };
        let Some(action) = fault.current_action_mut() else {
            return;
        };
        if action.status != ActionStatus::Pending {
            return;
        }
        let started_at = Utc::now();
        action.status = ActionStatus::Executing;
        action.started_at = Some(started_at);
        let (action_id, action_type, attempt) = (action.id.clone(), action.action_type, action.attempt);

        info!(
            "Fault {} on {}: attempt {}/{} with {}",
            fault.id, id, attempt, self.config.max_retries, action_type
        );
        let request = ActionRequest::for_fault(fault, &action_id, action_type);
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.execute(request).await });

        self.in_flight.insert(
            id.to_string(),
            InFlight {
                action_id,
                started_at,
                handle,
            },
        );
        self.stats.actions_launched += 1;
        report.launched += 1;
    }

    fn close_fault(&mut self, id: &str) {
        let Some(fault) = self.active.remove(id) else {
            return;
        };
        match fault.status {
            FaultStatus::Resolved => self.stats.faults_resolved += 1,
            FaultStatus::Unresolved => {
                self.stats.faults_unresolved += 1;
                self.last_unresolved.insert(
                    id.to_string(),
                    LastUnresolved {
                        fault_id: fault.id.clone(),
                        closed_at: fault.closed_at.unwrap_or_else(Utc::now),
                    },
                );
            }
            other => error!("fault {} closed while {:?}", fault.id, other),
        }
        self.history.push_back(fault);
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }
    }
}
