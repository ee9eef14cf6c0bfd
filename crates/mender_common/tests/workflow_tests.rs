//! Deterministic workflow engine tests
//!
//! Every collaborator is a fake: no docker, no network, no model.

use mender_common::bus::RecordingSubscriber;
use mender_common::config::{MenderConfig, RetryStrategy, TargetConfig};
use mender_common::controller::{ControllerCall, ControllerOutcome, FakeController};
use mender_common::heuristic::HeuristicDiagnosticOracle;
use mender_common::lock::ActionLock;
use mender_common::oracle::{FakeDiagnosticOracle, FakePlanningOracle};
use mender_common::telemetry::FakeTelemetryGateway;
use mender_common::validation::{
    FakeProber, Prober, ValidationOracle, CHECK_GATEWAY_PROBE, CHECK_SYSTEM_HEALTH,
};
use mender_common::{
    ActionKind, ActionTaken, Collaborators, ContainerState, Diagnosis, DiagnosisStatus,
    DiagnosticOracle, EventBus, EventType, HttpOutcome, MitigationPlan, RunStatus, Severity,
    Symptom, SymptomKind, TargetHealth, TelemetrySnapshot, TerminalState, WorkflowEngine,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GATEWAY_PROBE_URL: &str = "http://localhost/api/products";

// ============================================================================
// Harness
// ============================================================================

fn t1_down() -> Diagnosis {
    Diagnosis::from_symptoms(
        vec![Symptom::new("t1", SymptomKind::ServiceDown, Severity::Critical, "container exited")],
        "t1 down",
    )
}

fn restart_t1() -> MitigationPlan {
    MitigationPlan::new("t1", ActionKind::Restart, "t1 crashed")
}

struct Setup {
    config: MenderConfig,
    telemetry: FakeTelemetryGateway,
    diagnostic: Arc<dyn DiagnosticOracle>,
    planner: FakePlanningOracle,
    controller: FakeController,
    prober: Arc<dyn Prober>,
}

impl Setup {
    fn new(max_retries: u32) -> Self {
        let mut config = MenderConfig::default();
        config.targets = vec![
            TargetConfig::service("t1", 7001, "t1", "/api/t1"),
            TargetConfig::gateway("gw"),
        ];
        config.workflow.max_retries = max_retries;
        config.workflow.settle_delay_secs = 0;

        Self {
            config,
            telemetry: FakeTelemetryGateway::new(TelemetrySnapshot::empty()),
            diagnostic: Arc::new(FakeDiagnosticOracle::new(t1_down())),
            planner: FakePlanningOracle::new(Some(restart_t1())),
            controller: FakeController::new(),
            prober: Arc::new(FakeProber::new()),
        }
    }

    /// Validation fails on the gateway probe only
    fn failing_validation(mut self) -> Self {
        self.prober = Arc::new(FakeProber::new().with_response(GATEWAY_PROBE_URL, HttpOutcome::Status(502)));
        self
    }

    fn build(self) -> Harness {
        let telemetry = Arc::new(self.telemetry);
        let planner = Arc::new(self.planner);
        let controller = Arc::new(self.controller);
        let recorder = Arc::new(RecordingSubscriber::new());

        let bus = Arc::new(EventBus::new());
        bus.subscribe(recorder.clone());

        let validator = Arc::new(ValidationOracle::new(
            self.prober,
            self.config.targets.clone(),
            self.config.validation.clone(),
            self.config.workflow.settle_delay(),
        ));
        let engine = WorkflowEngine::new(
            &self.config,
            Collaborators {
                telemetry: telemetry.clone(),
                diagnostic: self.diagnostic,
                planner: planner.clone(),
                controller: controller.clone(),
                validator,
            },
            bus,
        );

        Harness {
            telemetry,
            planner,
            controller,
            recorder,
            engine,
        }
    }
}

struct Harness {
    telemetry: Arc<FakeTelemetryGateway>,
    planner: Arc<FakePlanningOracle>,
    controller: Arc<FakeController>,
    recorder: Arc<RecordingSubscriber>,
    engine: WorkflowEngine,
}

impl Harness {
    fn lock_events(&self) -> Vec<(EventType, Option<u32>)> {
        self.recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e.event_type, EventType::LockAcquired | EventType::LockReleased))
            .map(|e| (e.event_type, e.attempt))
            .collect()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_no_symptoms_short_circuits_healthy() {
    let mut setup = Setup::new(3);
    setup.diagnostic = Arc::new(FakeDiagnosticOracle::new(Diagnosis::healthy("all good")));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert_eq!(report.status, RunStatus::Healthy);
    assert_eq!(report.attempts, 0);
    assert!(report.actions_log.is_empty());
    assert!(h.controller.calls().is_empty());
    assert_eq!(h.planner.plan_count(), 0);
    assert_eq!(h.recorder.count(EventType::LockAcquired), 0);
}

#[tokio::test]
async fn test_restart_then_healthy_verification() {
    let h = Setup::new(3).build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert_eq!(report.status, RunStatus::Healthy);
    assert_eq!(report.attempts, 1);
    assert_eq!(h.controller.calls(), vec![ControllerCall::Restart("t1".into())]);
    assert_eq!(report.actions_log.len(), 1);
    assert!(report.actions_log[0].contains("restart_container t1 -> success"));
    assert_eq!(report.root_cause.as_deref(), Some("t1 crashed"));
    assert_eq!(h.recorder.count(EventType::TnrCommit), 1);
    assert_eq!(h.recorder.count(EventType::TnrRollback), 0);

    // Plan context carries fresh logs for the affected target
    assert_eq!(h.telemetry.log_requests(), vec![vec!["t1".to_string()]]);
    assert_eq!(h.planner.plan_contexts()[0].attempt, 1);
}

#[tokio::test]
async fn test_update_config_generates_content_and_rolls_back() {
    let mut setup = Setup::new(2).failing_validation();
    setup.config.workflow.retry_strategy = RetryStrategy::ReusePlan;
    setup.diagnostic = Arc::new(FakeDiagnosticOracle::new(Diagnosis::from_symptoms(
        vec![Symptom::new("gw", SymptomKind::ConfigError, Severity::High, "502 on every route")],
        "gateway misrouted",
    )));
    setup.planner = FakePlanningOracle::new(Some(MitigationPlan::new(
        "gw",
        ActionKind::UpdateConfig,
        "wrong upstream ports",
    )))
    .with_generated_config("events {}\nhttp {}");
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    let calls = h.controller.calls();
    assert_eq!(
        calls[0],
        ControllerCall::ApplyConfig {
            target: "gw".into(),
            content: "events {}\nhttp {}".into()
        }
    );
    assert_eq!(calls[1], ControllerCall::RollbackConfig("gw".into()));
    // Budget left after attempt 1, so the same plan is mitigated again
    assert!(matches!(calls[2], ControllerCall::ApplyConfig { .. }));
    assert_eq!(h.planner.config_count(), 2);
    assert_eq!(h.planner.plan_count(), 1);
    assert_eq!(h.telemetry.capture_count(), 1);

    let verdict = report.last_verdict.as_ref().unwrap();
    assert_eq!(verdict.failed_checks(), vec![CHECK_GATEWAY_PROBE]);
    assert_eq!(report.terminal, TerminalState::DoneCircuitOpen);
}

#[tokio::test]
async fn test_circuit_opens_after_budget() {
    let h = Setup::new(2).failing_validation().build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneCircuitOpen);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.status, RunStatus::Degraded);
    assert_eq!(h.recorder.count(EventType::CircuitBreaker), 1);
    assert_eq!(h.controller.restart_count(), 2);
    assert_eq!(h.controller.rollback_count(), 2);
    // Default strategy re-triages and re-plans before each retry
    assert_eq!(h.telemetry.capture_count(), 2);
    assert_eq!(h.planner.plan_count(), 2);
    assert_eq!(report.actions_log.len(), 4);
    assert!(report.actions_log[1].starts_with("Attempt 1: rollback t1"));
}

#[tokio::test]
async fn test_unreachable_target_still_diagnosed() {
    let config = Setup::new(3).config;
    let mut snapshot = TelemetrySnapshot::empty();
    snapshot
        .health
        .push(TargetHealth::unreachable("t1", "connection refused"));
    snapshot
        .health
        .push(TargetHealth::observe("gw", ContainerState::Running, None));

    let mut setup = Setup::new(3);
    setup.telemetry = FakeTelemetryGateway::new(snapshot);
    setup.diagnostic = Arc::new(HeuristicDiagnosticOracle::new(&config));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert_eq!(report.attempts, 1);
    let diagnosis_summary = report.diagnosis_summary.unwrap();
    assert!(diagnosis_summary.contains("service_down on t1"));
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_retry_bound_holds_for_any_budget() {
    for max in 1..=4 {
        let h = Setup::new(max).failing_validation().build();
        let report = h.engine.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.attempts, max);
        assert_eq!(report.terminal, TerminalState::DoneCircuitOpen);
        assert_eq!(h.recorder.count(EventType::CircuitBreaker), 1);
    }
}

#[tokio::test]
async fn test_lock_pairs_do_not_interleave() {
    let h = Setup::new(3).failing_validation().build();
    h.engine.run(&CancellationToken::new()).await.unwrap();

    let expected: Vec<(EventType, Option<u32>)> = (1..=3)
        .flat_map(|n| [(EventType::LockAcquired, Some(n)), (EventType::LockReleased, Some(n))])
        .collect();
    assert_eq!(h.lock_events(), expected);
    assert!(!h.engine.lock().is_locked());
}

#[tokio::test]
async fn test_attempts_increase_by_one() {
    let h = Setup::new(3).failing_validation().build();
    h.engine.run(&CancellationToken::new()).await.unwrap();

    let attempts: Vec<u32> = h
        .recorder
        .events()
        .into_iter()
        .filter(|e| e.event_type == EventType::TnrApply)
        .filter_map(|e| e.attempt)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_baseline_set_once() {
    let first = TelemetrySnapshot::empty();
    let mut second = TelemetrySnapshot::empty();
    second.captured_at = first.captured_at + chrono::Duration::seconds(30);

    let mut setup = Setup::new(2).failing_validation();
    setup.telemetry = FakeTelemetryGateway::sequence(vec![first.clone(), second]);
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(h.telemetry.capture_count(), 2);
    assert_eq!(report.baseline_captured_at, Some(first.captured_at));
}

#[tokio::test]
async fn test_event_run_ids_match_report() {
    let h = Setup::new(1).build();
    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    let events = h.recorder.events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.run_id == report.run_id));
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_unknown_target_fails_attempt_not_run() {
    let mut setup = Setup::new(1).failing_validation();
    setup.planner = FakePlanningOracle::new(Some(MitigationPlan::new("ghost", ActionKind::Restart, "?")));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.results[0].action_taken, ActionTaken::Unknown);
    assert!(!report.results[0].success);
    // Nothing was restarted; undo falls back to the gateway
    assert_eq!(h.controller.calls(), vec![ControllerCall::RollbackConfig("gw".into())]);
    assert_eq!(report.terminal, TerminalState::DoneCircuitOpen);
}

#[tokio::test]
async fn test_scale_is_not_executed() {
    let mut setup = Setup::new(1);
    setup.planner = FakePlanningOracle::new(Some(MitigationPlan::new("t1", ActionKind::Scale, "load")));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.results[0].action_taken, ActionTaken::ScaleService);
    assert!(report.results[0].message.contains("not supported"));
    assert!(h.controller.calls().is_empty());
    // Validation still decides the outcome
    assert_eq!(report.terminal, TerminalState::DoneHealthy);
}

#[tokio::test]
async fn test_controller_error_becomes_failed_result() {
    let mut setup = Setup::new(1);
    setup.controller = FakeController::failing("docker socket unavailable");
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert!(!report.results[0].success);
    assert!(report.results[0].message.contains("docker socket unavailable"));
    assert!(h.recorder.count(EventType::Oracle) >= 3);
}

#[tokio::test]
async fn test_reported_failure_still_verified() {
    let mut setup = Setup::new(1);
    setup.controller = FakeController::new().restart_outcome("t1", ControllerOutcome::failed("restart refused"));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    // Self-reported failure is not trusted; the healthy verdict wins
    assert!(!report.results[0].success);
    assert_eq!(report.terminal, TerminalState::DoneHealthy);
}

#[tokio::test(start_paused = true)]
async fn test_slow_controller_times_out() {
    let mut setup = Setup::new(1);
    setup.config.workflow.call_timeout_secs = 1;
    setup.controller = FakeController::new().with_delay(Duration::from_secs(60));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert!(report.results[0].message.contains("timed out after 1s"));
}

/// Answers HTTP but never finishes inspecting a container
struct StuckInspectProber;

#[async_trait]
impl Prober for StuckInspectProber {
    async fn container_state(&self, _target: &str) -> ContainerState {
        std::future::pending().await
    }

    async fn http_get(&self, _url: &str, _timeout: Duration) -> HttpOutcome {
        HttpOutcome::Status(200)
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_validation_fails_checks_and_undoes() {
    let mut setup = Setup::new(1);
    setup.config.workflow.call_timeout_secs = 5;
    setup.prober = Arc::new(StuckInspectProber);
    let h = setup.build();

    let report = tokio::time::timeout(Duration::from_secs(3600), h.engine.run(&CancellationToken::new()))
        .await
        .expect("run must not block on a hung container inspection")
        .unwrap();

    assert_eq!(report.terminal, TerminalState::DoneCircuitOpen);
    let verdict = report.last_verdict.as_ref().unwrap();
    assert_eq!(verdict.failed_checks(), vec![CHECK_SYSTEM_HEALTH]);
    assert!(verdict.checks[0].detail.contains("timed out after 5s"));
    assert_eq!(h.recorder.count(EventType::TnrRollback), 1);
    assert_eq!(h.controller.rollback_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_reaches_hung_validation() {
    let mut setup = Setup::new(1);
    setup.config.workflow.call_timeout_secs = 3600;
    setup.prober = Arc::new(StuckInspectProber);
    let h = setup.build();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let report = h.engine.run(&cancel).await.unwrap();

    assert_eq!(report.terminal, TerminalState::Cancelled);
    assert_eq!(h.recorder.count(EventType::Oracle), 0);
}

#[tokio::test]
async fn test_diagnostic_failure_degrades_without_action() {
    let mut setup = Setup::new(3);
    setup.diagnostic = Arc::new(FakeDiagnosticOracle::failing("model offline"));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert_eq!(report.status, RunStatus::Degraded);
    assert!(h.controller.calls().is_empty());
    assert_eq!(h.recorder.count(EventType::Error), 1);
}

#[tokio::test]
async fn test_telemetry_failure_degrades_without_action() {
    let mut setup = Setup::new(3);
    setup.telemetry = FakeTelemetryGateway::failing("prometheus offline");
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert_eq!(report.status, RunStatus::Degraded);
    assert!(report.baseline_captured_at.is_none());
}

#[tokio::test]
async fn test_clean_retriage_after_failed_verdict_is_unconfirmed() {
    let mut setup = Setup::new(2).failing_validation();
    setup.diagnostic = Arc::new(FakeDiagnosticOracle::sequence(vec![
        t1_down(),
        Diagnosis::healthy("all good"),
    ]));
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    // Re-triage saw nothing to fix, but the failed verdict was never superseded
    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert_eq!(report.attempts, 1);
    assert!(!report.last_verdict.as_ref().unwrap().is_healthy());
    assert_eq!(report.status, RunStatus::Degraded);
    assert!(report.unconfirmed.as_deref().unwrap().contains(CHECK_GATEWAY_PROBE));
    assert!(!report.is_healthy());
    assert_eq!(h.recorder.count(EventType::Error), 1);
}

#[tokio::test]
async fn test_verified_run_is_confirmed() {
    let h = Setup::new(1).build();
    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert!(report.unconfirmed.is_none());
    assert!(report.is_healthy());
}

#[tokio::test]
async fn test_no_plan_terminates_healthy() {
    let mut setup = Setup::new(3);
    setup.planner = FakePlanningOracle::new(None);
    let h = setup.build();

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert_eq!(report.attempts, 0);
    assert!(h.controller.calls().is_empty());
}

#[tokio::test]
async fn test_subscriber_failure_does_not_abort_run() {
    let h = Setup::new(1).build();
    h.engine
        .bus()
        .subscribe_fn("broken", |_| Err(anyhow::anyhow!("dashboard offline")));

    let report = h.engine.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.terminal, TerminalState::DoneHealthy);
    assert!(h.recorder.count(EventType::TnrCommit) == 1);
}

#[tokio::test]
async fn test_zero_budget_rejected() {
    let h = Setup::new(3).build();
    let engine = h.engine.with_max_retries(0);
    assert!(engine.run(&CancellationToken::new()).await.is_err());
}

// ============================================================================
// Cancellation and shared lock
// ============================================================================

#[tokio::test]
async fn test_cancel_before_start() {
    let h = Setup::new(3).build();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.engine.run(&cancel).await.unwrap();

    assert_eq!(report.terminal, TerminalState::Cancelled);
    assert_eq!(h.telemetry.capture_count(), 0);
    assert_eq!(h.recorder.event_types(), vec![EventType::Cancelled]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_settle_delay() {
    let mut setup = Setup::new(3);
    setup.config.workflow.settle_delay_secs = 3;
    let h = setup.build();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let report = h.engine.run(&cancel).await.unwrap();

    assert_eq!(report.terminal, TerminalState::Cancelled);
    assert_eq!(report.attempts, 1);
    assert_eq!(h.recorder.count(EventType::Cancelled), 1);
    assert_eq!(h.recorder.count(EventType::Oracle), 0);
    // The in-flight mitigation completed and released the lock
    assert_eq!(h.controller.restart_count(), 1);
    assert_eq!(h.recorder.count(EventType::LockReleased), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engines_sharing_lock_serialize_mitigation() {
    let lock = ActionLock::new();
    let shared_bus_recorder = Arc::new(RecordingSubscriber::new());

    let mut engines = Vec::new();
    for _ in 0..2 {
        let mut setup = Setup::new(1);
        setup.controller = FakeController::new().with_delay(Duration::from_secs(2));
        let h = setup.build();
        h.engine.bus().subscribe(shared_bus_recorder.clone());
        engines.push(h.engine.with_lock(lock.clone()));
    }

    let cancel = CancellationToken::new();
    let (a, b) = tokio::join!(engines[0].run(&cancel), engines[1].run(&cancel));
    assert!(a.unwrap().is_healthy());
    assert!(b.unwrap().is_healthy());

    let lock_events: Vec<EventType> = shared_bus_recorder
        .event_types()
        .into_iter()
        .filter(|t| matches!(t, EventType::LockAcquired | EventType::LockReleased))
        .collect();
    assert_eq!(
        lock_events,
        vec![
            EventType::LockAcquired,
            EventType::LockReleased,
            EventType::LockAcquired,
            EventType::LockReleased
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_call_keeps_lock_until_it_returns() {
    let lock = ActionLock::new();

    let mut slow = Setup::new(1).failing_validation();
    slow.config.workflow.call_timeout_secs = 1;
    slow.controller = FakeController::new().with_delay(Duration::from_secs(10));
    let slow = slow.build();
    let slow_engine = slow.engine.with_lock(lock.clone());

    let fast = Setup::new(1).build();
    let fast_controller = fast.controller.clone();
    let fast_engine = fast.engine.with_lock(lock.clone());

    let start = tokio::time::Instant::now();
    let cancel = CancellationToken::new();
    let (slow_report, fast_finished) = tokio::join!(slow_engine.run(&cancel), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let report = fast_engine.run(&cancel).await.unwrap();
        (report, start.elapsed())
    });
    let slow_report = slow_report.unwrap();

    // The slow restart timed out, but its lock was not given up early
    assert!(slow_report.results[0].message.contains("timed out after 1s"));
    assert!(slow_report.results[1].message.contains("Action lock still held"));
    assert_eq!(slow.controller.calls(), vec![ControllerCall::Restart("t1".into())]);
    assert_eq!(slow_report.terminal, TerminalState::DoneCircuitOpen);

    // The other engine could only mutate after the slow restart returned
    let (fast_report, fast_elapsed) = fast_finished;
    assert!(fast_report.is_healthy());
    assert_eq!(fast_controller.restart_count(), 1);
    assert!(fast_elapsed >= Duration::from_secs(10));
    assert!(!lock.is_locked());
}

#[tokio::test]
async fn test_heuristic_diagnosis_status_matches_severity() {
    let config = Setup::new(1).config;
    let oracle = HeuristicDiagnosticOracle::new(&config);
    let mut snapshot = TelemetrySnapshot::empty();
    snapshot
        .health
        .push(TargetHealth::observe("t1", ContainerState::NotFound, None));

    let diagnosis = oracle.diagnose(&snapshot).await.unwrap();
    assert_eq!(diagnosis.overall_status, DiagnosisStatus::Critical);
}
