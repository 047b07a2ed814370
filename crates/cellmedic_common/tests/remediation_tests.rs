//! Remediation loop tests.
//!
//! Scripted telemetry and a scripted control interface drive the orchestrator
//! cycle by cycle. `wait_for_actions` between cycles makes every action
//! finish before the next poll.

use std::sync::Arc;

use cellmedic_common::{
    ActionStatus, ActionType, Config, ControlResponse, FaultStatus, FaultType, MetricKind, Orchestrator,
    PolicyStore, Resource, ResourceControl, ResourceStatus, ScriptedControl, ScriptedResponse,
    ScriptedTelemetry, Severity, TelemetrySource, UnresolvedReason,
};

// ============================================================================
// Fixtures
// ============================================================================

fn healthy(id: &str) -> Resource {
    Resource::new(id, "vendor-a/macro")
        .with_metric(MetricKind::Throughput, 50.0)
        .with_metric(MetricKind::Latency, 40.0)
        .with_metric(MetricKind::PacketLoss, 1.0)
        .with_metric(MetricKind::Utilization, 55.0)
}

/// packet loss 18%, latency 400ms
fn hardware_fault(id: &str) -> Resource {
    healthy(id)
        .with_metric(MetricKind::PacketLoss, 18.0)
        .with_metric(MetricKind::Latency, 400.0)
}

struct Harness {
    orch: Orchestrator,
    telemetry: Arc<ScriptedTelemetry>,
    control: Arc<ScriptedControl>,
    policy: Arc<PolicyStore>,
}

impl Harness {
    fn new(config: Config) -> Self {
        let telemetry = Arc::new(ScriptedTelemetry::new());
        let control = Arc::new(ScriptedControl::new());
        let policy = Arc::new(PolicyStore::new(config.engine.neutral_prior));
        let orch = Orchestrator::new(
            &config,
            Arc::clone(&telemetry) as Arc<dyn TelemetrySource>,
            Arc::clone(&control) as Arc<dyn ResourceControl>,
            Arc::clone(&policy),
        );
        Self {
            orch,
            telemetry,
            control,
            policy,
        }
    }

    /// One cycle, then let launched actions finish
    async fn step(&mut self) -> cellmedic_common::CycleReport {
        let report = self.orch.run_cycle().await;
        self.orch.wait_for_actions().await;
        report
    }
}

fn default_config() -> Config {
    Config::default()
}

// ============================================================================
// Remediation lifecycle
// ============================================================================

/// Restart clears a hardware fault on the first attempt
#[tokio::test]
async fn test_restart_resolves_on_first_attempt() {
    let mut h = Harness::new(default_config());
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![healthy("R1")]);

    let first = h.step().await;
    assert_eq!(first.opened.len(), 1);
    assert_eq!(first.launched, 1);

    let fault = h.orch.active_fault("R1").unwrap();
    assert_eq!(fault.fault_type, FaultType::Hardware);
    assert_eq!(fault.severity, Severity::Critical);
    assert_eq!(fault.status, FaultStatus::Verifying);
    assert_eq!(
        fault.diagnosis.as_ref().unwrap().ranked_actions(),
        vec![ActionType::Restart, ActionType::Reconfigure]
    );

    let second = h.step().await;
    assert_eq!(second.resolved.len(), 1);
    assert!(h.orch.active_fault("R1").is_none());

    let fault = h.orch.latest_fault("R1").unwrap();
    assert_eq!(fault.status, FaultStatus::Resolved);
    assert_eq!(fault.attempts(), 1);
    assert_eq!(fault.actions[0].verified, Some(true));
    assert!(fault.closed_at.is_some());

    let record = h.policy.get(FaultType::Hardware, ActionType::Restart);
    assert_eq!((record.attempts, record.successes), (1, 1));
    assert_eq!(h.control.calls_for("R1"), vec![ActionType::Restart]);
}

/// Two failed restarts, then reconfigure succeeds on attempt 3
#[tokio::test]
async fn test_failed_restarts_fall_back_to_reconfigure() {
    let mut h = Harness::new(default_config());
    for _ in 0..3 {
        h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    }
    h.telemetry.push_cycle(vec![healthy("R1")]);

    for _ in 0..4 {
        h.step().await;
    }

    assert_eq!(
        h.control.calls_for("R1"),
        vec![ActionType::Restart, ActionType::Restart, ActionType::Reconfigure]
    );
    let fault = h.orch.latest_fault("R1").unwrap();
    assert_eq!(fault.status, FaultStatus::Resolved);
    assert_eq!(fault.attempts(), 3);
    assert_eq!(
        fault.actions.iter().map(|a| a.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let restart = h.policy.get(FaultType::Hardware, ActionType::Restart);
    assert_eq!((restart.attempts, restart.successes), (2, 0));
    let reconfigure = h.policy.get(FaultType::Hardware, ActionType::Reconfigure);
    assert_eq!((reconfigure.attempts, reconfigure.successes), (1, 1));
}

/// Three failures close the fault; no fourth attempt ever happens
#[tokio::test]
async fn test_retries_exhausted_leaves_fault_unresolved() {
    let mut h = Harness::new(default_config());
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);

    for _ in 0..8 {
        h.step().await;
    }

    assert_eq!(h.control.calls_for("R1").len(), 3);
    let fault = h.orch.latest_fault("R1").unwrap();
    assert_eq!(fault.status, FaultStatus::Unresolved);
    assert_eq!(fault.unresolved_reason, Some(UnresolvedReason::RetriesExhausted));
    assert!(fault.actions.iter().all(|a| a.verified == Some(false)));
    assert_eq!(h.orch.stats().faults_unresolved, 1);
    // the default cooldown keeps a still-broken cell from reopening at once
    assert_eq!(h.orch.stats().faults_opened, 1);
}

/// A resource that drops out mid-action is abandoned without learning
#[tokio::test]
async fn test_resource_vanishes_while_healing() {
    let mut h = Harness::new(default_config());
    h.control.script("R2", ScriptedResponse::Hang);
    h.telemetry.push_cycle(vec![healthy("R1"), hardware_fault("R2")]);
    h.telemetry.push_cycle(vec![healthy("R1")]);

    let first = h.orch.run_cycle().await;
    assert_eq!(first.launched, 1);
    assert_eq!(h.orch.active_fault("R2").unwrap().status, FaultStatus::Healing);
    assert_eq!(h.orch.in_flight_count(), 1);
    // let the action task reach the control interface
    tokio::task::yield_now().await;

    let second = h.orch.run_cycle().await;
    assert_eq!(second.unresolved.len(), 1);
    assert_eq!(h.orch.in_flight_count(), 0);

    let fault = h.orch.latest_fault("R2").unwrap();
    assert_eq!(fault.status, FaultStatus::Unresolved);
    assert_eq!(fault.unresolved_reason, Some(UnresolvedReason::ResourceUnavailable));
    assert_eq!(fault.actions[0].status, ActionStatus::Failed);
    assert_eq!(fault.actions[0].verified, None);

    for _ in 0..3 {
        h.step().await;
    }
    assert_eq!(h.control.calls_for("R2").len(), 1);
    assert!(h.policy.snapshot().is_empty());
    assert_eq!(h.orch.stats().resources_lost, 1);
}

// ============================================================================
// Invariants
// ============================================================================

#[tokio::test]
async fn test_one_live_fault_per_resource() {
    let mut h = Harness::new(default_config());
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![hardware_fault("R1").with_metric(MetricKind::Utilization, 99.0)]);
    h.telemetry.push_cycle(vec![healthy("R1")]);

    h.step().await;
    let id = h.orch.active_fault("R1").unwrap().id.clone();
    let second = h.step().await;
    assert!(second.opened.is_empty());
    assert_eq!(h.orch.active_fault("R1").unwrap().id, id);
    assert_eq!(h.orch.active_faults().count(), 1);

    h.step().await;
    assert_eq!(h.orch.stats().faults_opened, 1);
    assert_eq!(h.orch.stats().faults_resolved, 1);
}

#[tokio::test]
async fn test_verification_is_idempotent() {
    let mut h = Harness::new(default_config());
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![healthy("R1")]);

    for _ in 0..5 {
        h.step().await;
    }

    assert_eq!(h.control.calls_for("R1").len(), 1);
    assert_eq!(h.policy.get(FaultType::Hardware, ActionType::Restart).attempts, 1);
    assert_eq!(h.orch.latest_fault("R1").unwrap().actions.len(), 1);
}

/// Recovery seen in telemetry wins over a failed self-report
#[tokio::test]
async fn test_verification_overrides_reported_failure() {
    let mut h = Harness::new(default_config());
    h.control
        .script("R1", ScriptedResponse::Respond(ControlResponse::Failed));
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![healthy("R1")]);

    h.step().await;
    assert_eq!(
        h.orch.active_fault("R1").unwrap().current_action().unwrap().status,
        ActionStatus::Failed
    );
    h.step().await;

    assert_eq!(h.orch.latest_fault("R1").unwrap().status, FaultStatus::Resolved);
    let record = h.policy.get(FaultType::Hardware, ActionType::Restart);
    assert_eq!((record.attempts, record.successes), (1, 1));
}

/// A reported success with symptoms still present counts as a failure
#[tokio::test]
async fn test_reported_success_not_trusted() {
    let mut h = Harness::new(default_config());
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);

    h.step().await;
    h.step().await;

    let record = h.policy.get(FaultType::Hardware, ActionType::Restart);
    assert_eq!((record.attempts, record.successes), (1, 0));
    let fault = h.orch.active_fault("R1").unwrap();
    assert_eq!(fault.attempts(), 2);
    // the self-reported success is overwritten by the verdict
    assert_eq!(fault.actions[0].status, ActionStatus::Failed);
    assert_eq!(fault.actions[0].verified, Some(false));
    assert!(fault.actions[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("verification failed"));
}

/// A snapshot without the triggering metrics cannot confirm recovery
#[tokio::test]
async fn test_missing_metrics_do_not_resolve() {
    let mut h = Harness::new(default_config());
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![
        Resource::new("R1", "vendor-a/macro").with_metric(MetricKind::Throughput, 50.0),
    ]);

    h.step().await;
    let second = h.step().await;
    assert!(second.resolved.is_empty());

    let fault = h.orch.active_fault("R1").unwrap();
    assert_ne!(fault.status, FaultStatus::Resolved);
    assert_eq!(fault.actions[0].verified, Some(false));
    let record = h.policy.get(FaultType::Hardware, ActionType::Restart);
    assert_eq!(record.successes, 0);
    assert_eq!(h.orch.stats().actions_verified_ok, 0);
}

#[tokio::test]
async fn test_timeout_counts_as_failed_attempt() {
    let mut config = default_config();
    config.engine.action_timeout_ms = 50;
    let mut h = Harness::new(config);
    h.control.script("R1", ScriptedResponse::Hang);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![healthy("R1")]);

    h.step().await;
    let fault = h.orch.active_fault("R1").unwrap();
    assert_eq!(fault.current_action().unwrap().status, ActionStatus::TimedOut);
    assert_eq!(h.orch.stats().action_timeouts, 1);

    h.step().await;
    h.step().await;
    let fault = h.orch.latest_fault("R1").unwrap();
    assert_eq!(fault.status, FaultStatus::Resolved);
    assert_eq!(fault.attempts(), 2);
}

#[tokio::test]
async fn test_outage_opens_hardware_fault() {
    let mut h = Harness::new(default_config());
    h.telemetry.push_cycle(vec![healthy("R1")]);
    h.telemetry.push_cycle(vec![healthy("R1").with_status(ResourceStatus::Failed)]);
    h.telemetry.push_cycle(vec![healthy("R1").with_status(ResourceStatus::Degraded)]);
    h.telemetry.push_cycle(vec![healthy("R1")]);

    h.step().await;
    h.step().await;
    let fault = h.orch.active_fault("R1").unwrap();
    assert_eq!(fault.fault_type, FaultType::Hardware);
    assert_eq!(fault.prior_status, ResourceStatus::Operational);

    // degraded is not operational, so restart has not cleared it yet
    h.step().await;
    h.step().await;
    let fault = h.orch.latest_fault("R1").unwrap();
    assert_eq!(fault.status, FaultStatus::Resolved);
    assert_eq!(fault.attempts(), 2);
}

// ============================================================================
// Re-diagnosis, learning, cooldown, neighbors
// ============================================================================

#[tokio::test]
async fn test_rediagnosis_admits_fallback_then_runs_dry() {
    let mut config = default_config();
    config.engine.max_retries = 10;
    let mut h = Harness::new(config);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);

    for _ in 0..10 {
        h.step().await;
    }

    assert_eq!(
        h.control.calls_for("R1"),
        vec![
            ActionType::Restart,
            ActionType::Restart,
            ActionType::Reconfigure,
            ActionType::Reconfigure,
            ActionType::RerouteTraffic,
            ActionType::RerouteTraffic,
        ]
    );
    let fault = h.orch.latest_fault("R1").unwrap();
    assert_eq!(fault.status, FaultStatus::Unresolved);
    assert_eq!(fault.unresolved_reason, Some(UnresolvedReason::NoCandidates));
    assert_eq!(fault.diagnosis.as_ref().unwrap().round, 1);
}

#[tokio::test]
async fn test_learning_reorders_next_fault() {
    let mut h = Harness::new(default_config());
    for _ in 0..3 {
        h.telemetry.push_cycle(vec![hardware_fault("R1"), healthy("R3")]);
    }
    h.telemetry.push_cycle(vec![healthy("R1"), healthy("R3")]);
    h.telemetry.push_cycle(vec![healthy("R1"), hardware_fault("R3")]);

    for _ in 0..5 {
        h.step().await;
    }

    // restart is 0/2 and reconfigure 1/1 after the first fault
    let fault = h.orch.active_fault("R3").unwrap();
    assert_eq!(
        fault.diagnosis.as_ref().unwrap().top().unwrap().action_type,
        ActionType::Reconfigure
    );
    assert_eq!(h.control.calls_for("R3"), vec![ActionType::Reconfigure]);
}

#[tokio::test]
async fn test_reopen_supersedes_unresolved_fault() {
    let mut config = default_config();
    config.engine.max_retries = 1;
    config.engine.reopen_cooldown_secs = 0;
    let mut h = Harness::new(config);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);

    h.step().await;
    let first_id = h.orch.active_fault("R1").unwrap().id.clone();
    let closing = h.step().await;
    assert_eq!(closing.unresolved, vec![first_id.clone()]);
    assert!(closing.opened.is_empty());

    let reopening = h.step().await;
    assert_eq!(reopening.opened.len(), 1);
    let second_id = h.orch.active_fault("R1").unwrap().id.clone();
    assert_ne!(first_id, second_id);

    let old = h.orch.history().find(|f| f.id == first_id).unwrap();
    assert_eq!(old.superseded_by.as_deref(), Some(second_id.as_str()));
}

/// The cooldown holds only while the resource stays faulty
#[tokio::test]
async fn test_clean_snapshot_clears_reopen_cooldown() {
    let mut config = default_config();
    config.engine.max_retries = 1;
    let mut h = Harness::new(config);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);
    h.telemetry.push_cycle(vec![healthy("R1")]);
    h.telemetry.push_cycle(vec![healthy("R1").with_metric(MetricKind::Utilization, 99.0)]);

    h.step().await;
    let first_id = h.orch.active_fault("R1").unwrap().id.clone();
    let closing = h.step().await;
    assert_eq!(closing.unresolved, vec![first_id.clone()]);

    // still faulty inside the cooldown
    let held = h.step().await;
    assert!(held.opened.is_empty());

    h.step().await;
    let overload = h.step().await;
    assert_eq!(overload.opened.len(), 1);
    assert_eq!(h.orch.stats().faults_opened, 2);
    assert_eq!(
        h.orch.active_fault("R1").unwrap().fault_type,
        FaultType::CapacityOverload
    );

    let old = h.orch.history().find(|f| f.id == first_id).unwrap();
    assert!(old.superseded_by.is_none());
}

/// A resource that leaves telemetry does not keep its cooldown
#[tokio::test]
async fn test_vanished_resource_forgets_cooldown() {
    let mut config = default_config();
    config.engine.max_retries = 1;
    let mut h = Harness::new(config);
    h.telemetry.push_cycle(vec![hardware_fault("R1"), healthy("R2")]);
    h.telemetry.push_cycle(vec![hardware_fault("R1"), healthy("R2")]);
    h.telemetry.push_cycle(vec![healthy("R2")]);
    h.telemetry.push_cycle(vec![hardware_fault("R1"), healthy("R2")]);

    h.step().await;
    let closing = h.step().await;
    assert_eq!(closing.unresolved.len(), 1);

    let gone = h.step().await;
    assert_eq!(gone.resources_seen, 1);
    assert!(gone.unresolved.is_empty());

    let back = h.step().await;
    assert_eq!(back.opened.len(), 1);
    assert_eq!(h.orch.stats().faults_opened, 2);
}

#[tokio::test]
async fn test_neighbor_waits_for_other_action() {
    let mut config = default_config();
    config
        .neighbors
        .insert("R1".to_string(), vec!["R2".to_string()]);
    let mut h = Harness::new(config);
    h.telemetry.push_cycle(vec![hardware_fault("R1"), hardware_fault("R2")]);
    h.telemetry.push_cycle(vec![healthy("R1"), hardware_fault("R2")]);
    h.telemetry.push_cycle(vec![healthy("R1"), healthy("R2")]);

    let first = h.step().await;
    assert_eq!(first.launched, 1);
    assert_eq!(first.deferred, 1);
    assert!(h.control.calls_for("R2").is_empty());

    let second = h.step().await;
    assert_eq!(second.resolved.len(), 1);
    assert_eq!(second.launched, 1);
    assert_eq!(h.control.calls_for("R2"), vec![ActionType::Restart]);

    h.step().await;
    assert_eq!(h.orch.stats().faults_resolved, 2);
    assert_eq!(h.orch.latest_fault("R2").unwrap().attempts(), 1);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let mut config = default_config();
    config.engine.max_history = 2;
    let mut h = Harness::new(config);
    for _ in 0..3 {
        h.telemetry.push_cycle(vec![hardware_fault("R1")]);
        h.telemetry.push_cycle(vec![healthy("R1")]);
    }

    for _ in 0..6 {
        h.step().await;
    }

    assert_eq!(h.orch.stats().faults_resolved, 3);
    assert_eq!(h.orch.history().count(), 2);
}

#[tokio::test]
async fn test_run_until_drains_on_shutdown() {
    let mut config = default_config();
    config.engine.cycle_interval_secs = 1;
    let mut h = Harness::new(config);
    h.control.script(
        "R1",
        ScriptedResponse::Delayed(std::time::Duration::from_millis(200), ControlResponse::Succeeded),
    );
    h.telemetry.push_cycle(vec![hardware_fault("R1")]);

    h.orch
        .run_until(tokio::time::sleep(std::time::Duration::from_millis(50)))
        .await;

    assert_eq!(h.orch.stats().cycles, 1);
    assert_eq!(h.orch.in_flight_count(), 0);
    assert_eq!(
        h.orch.active_fault("R1").unwrap().status,
        FaultStatus::Verifying
    );
}
