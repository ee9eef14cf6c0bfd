//! Workflow Engine - triage, plan, mitigate, verify, undo
//!
//! ```text
//! TRIAGE --no symptoms--> DONE_HEALTHY
//! TRIAGE --symptoms--> PLAN --None--> DONE_HEALTHY
//! PLAN --> MITIGATE --> VERIFY --healthy--> DONE_HEALTHY
//! VERIFY --degraded--> UNDO --budget left--> TRIAGE (replan) | MITIGATE (reuse_plan)
//! UNDO --budget spent--> DONE_CIRCUIT_OPEN
//! any phase boundary --cancelled--> CANCELLED
//! ```
//!
//! Every collaborator call is bounded by `call_timeout`. Collaborator errors
//! never escape a phase: they become failed results, a degraded diagnosis or
//! failed checks. Only broken engine invariants are returned as `Err`.
//!
//! Mutating controller calls run in their own task, which owns the action
//! guard. A timeout stops the engine waiting, not the call, and the lock
//! stays held until the call returns.

use crate::bus::EventBus;
use crate::circuit::CircuitBreaker;
use crate::config::{MenderConfig, RetryStrategy, WorkflowConfig};
use crate::controller::{ControllerOutcome, TargetController};
use crate::error::{MenderError, Result};
use crate::events::{Actor, EventType, Phase, WorkflowEvent};
use crate::lock::{ActionGuard, ActionLock};
use crate::model::{
    ActionKind, ActionTaken, Diagnosis, MitigationPlan, MitigationResult, RunStatus,
    TelemetrySnapshot, ValidationVerdict,
};
use crate::oracle::{DiagnosticOracle, PlanContext, PlanningOracle};
use crate::telemetry::TelemetryGateway;
use crate::validation::ValidationOracle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Run state
// ============================================================================

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    DoneHealthy,
    DoneCircuitOpen,
    Cancelled,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoneHealthy => write!(f, "DONE_HEALTHY"),
            Self::DoneCircuitOpen => write!(f, "DONE_CIRCUIT_OPEN"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Mutable record of one run, owned by the engine for the run's lifetime
#[derive(Debug)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub diagnosis: Option<Diagnosis>,
    pub plan: Option<MitigationPlan>,
    pub last_result: Option<MitigationResult>,
    pub attempt_count: u32,
    pub max_retries: u32,
    /// Set on the first successful capture, never replaced
    pub pre_fix_snapshot: Option<Arc<TelemetrySnapshot>>,
    pub actions_log: Vec<String>,
    pub results: Vec<MitigationResult>,
    pub overall_status: RunStatus,
    pub last_verdict: Option<ValidationVerdict>,
    /// Set when the run ends DONE_HEALTHY while the last verdict failed
    pub unconfirmed: Option<String>,
    breaker: CircuitBreaker,
    context: PlanContext,
    /// Valid target of the current attempt, if it had one
    attempted_target: Option<String>,
}

impl WorkflowRun {
    fn new(max_retries: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            diagnosis: None,
            plan: None,
            last_result: None,
            attempt_count: 0,
            max_retries,
            pre_fix_snapshot: None,
            actions_log: Vec::new(),
            results: Vec::new(),
            overall_status: RunStatus::Unknown,
            last_verdict: None,
            unconfirmed: None,
            breaker: CircuitBreaker::new(max_retries),
            context: PlanContext::default(),
            attempted_target: None,
        }
    }

    fn record(&mut self, result: MitigationResult) {
        self.actions_log.push(format!(
            "Attempt {}: {} {} -> {} ({})",
            self.attempt_count,
            result.action_taken,
            if result.target.is_empty() { "-" } else { result.target.as_str() },
            if result.success { "success" } else { "failed" },
            result.message
        ));
        self.results.push(result.clone());
        self.last_result = Some(result);
    }

    fn into_report(self, terminal: TerminalState) -> RunReport {
        RunReport {
            run_id: self.run_id,
            terminal,
            status: self.overall_status,
            attempts: self.attempt_count,
            max_retries: self.max_retries,
            root_cause: self.plan.as_ref().map(|p| p.root_cause.clone()),
            plan: self.plan,
            diagnosis_summary: self.diagnosis.map(|d| d.summary),
            actions_log: self.actions_log,
            results: self.results,
            last_verdict: self.last_verdict,
            unconfirmed: self.unconfirmed,
            baseline_captured_at: self.pre_fix_snapshot.map(|s| s.captured_at),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Final summary of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub terminal: TerminalState,
    pub status: RunStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub root_cause: Option<String>,
    pub plan: Option<MitigationPlan>,
    pub diagnosis_summary: Option<String>,
    pub actions_log: Vec<String>,
    pub results: Vec<MitigationResult>,
    pub last_verdict: Option<ValidationVerdict>,
    /// Why a DONE_HEALTHY run could not confirm health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unconfirmed: Option<String>,
    pub baseline_captured_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// DONE_HEALTHY with no failed verdict left standing
    pub fn is_healthy(&self) -> bool {
        self.terminal == TerminalState::DoneHealthy && self.unconfirmed.is_none()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Injected collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub telemetry: Arc<dyn TelemetryGateway>,
    pub diagnostic: Arc<dyn DiagnosticOracle>,
    pub planner: Arc<dyn PlanningOracle>,
    pub controller: Arc<dyn TargetController>,
    pub validator: Arc<ValidationOracle>,
}

enum Step {
    Triage,
    Plan,
    Mitigate,
    Verify,
    Undo,
}

enum Transition {
    Next(Step),
    Done(TerminalState),
}

pub struct WorkflowEngine {
    parts: Collaborators,
    bus: Arc<EventBus>,
    lock: ActionLock,
    settings: WorkflowConfig,
    managed: Vec<String>,
    gateway: Option<String>,
}

impl WorkflowEngine {
    pub fn new(config: &MenderConfig, parts: Collaborators, bus: Arc<EventBus>) -> Self {
        Self {
            parts,
            bus,
            lock: ActionLock::new(),
            settings: config.workflow.clone(),
            managed: config.target_names(),
            gateway: config.gateway_target().map(|t| t.name.clone()),
        }
    }

    /// Share the action lock with other engines on the same target set
    pub fn with_lock(mut self, lock: ActionLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.settings.max_retries = max_retries;
        self
    }

    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.settings.retry_strategy = strategy;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn lock(&self) -> &ActionLock {
        &self.lock
    }

    /// Drive one run to a terminal state
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        if self.settings.max_retries == 0 {
            return Err(MenderError::Config("max_retries must be > 0".into()));
        }

        let mut run = WorkflowRun::new(self.settings.max_retries);
        info!(
            "Workflow run {} started (max_retries={}, strategy={:?})",
            run.run_id, run.max_retries, self.settings.retry_strategy
        );

        let mut step = Step::Triage;
        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(run));
            }

            let transition = match step {
                Step::Triage => self.triage(&mut run).await,
                Step::Plan => self.plan(&mut run).await?,
                Step::Mitigate => self.mitigate(&mut run).await?,
                Step::Verify => match self.verify(&mut run, cancel).await {
                    Some(t) => t,
                    None => return Ok(self.cancelled(run)),
                },
                Step::Undo => self.undo(&mut run).await,
            };

            match transition {
                Transition::Next(next) => step = next,
                Transition::Done(terminal) => {
                    if terminal == TerminalState::DoneHealthy {
                        self.check_unconfirmed(&mut run);
                    }
                    info!(
                        "Workflow run {} finished: {} (status={}, attempts={}/{})",
                        run.run_id, terminal, run.overall_status, run.attempt_count, run.max_retries
                    );
                    return Ok(run.into_report(terminal));
                }
            }
        }
    }

    /// Capture and diagnose without acting
    pub async fn triage_only(&self) -> (Option<TelemetrySnapshot>, Diagnosis) {
        let snapshot = self
            .bounded("telemetry capture", MenderError::Telemetry, self.parts.telemetry.capture())
            .await;
        match snapshot {
            Ok(snapshot) => {
                let diagnosis = self
                    .bounded("diagnosis", MenderError::Oracle, self.parts.diagnostic.diagnose(&snapshot))
                    .await
                    .unwrap_or_else(|e| Diagnosis::degraded_unknown(format!("Diagnosis unavailable: {}", e)));
                (Some(snapshot), diagnosis)
            }
            Err(e) => (None, Diagnosis::degraded_unknown(format!("Telemetry unavailable: {}", e))),
        }
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn triage(&self, run: &mut WorkflowRun) -> Transition {
        info!("[{}] TRIAGE", run.run_id);
        self.emit(
            run,
            Phase::Triage,
            Actor::TriageAgent,
            EventType::Action,
            format!("Capturing telemetry from {} managed targets", self.managed.len()),
        );

        let diagnosis = match self
            .bounded("telemetry capture", MenderError::Telemetry, self.parts.telemetry.capture())
            .await
        {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                let failing = snapshot.unhealthy_targets().len();
                self.emit(
                    run,
                    Phase::Triage,
                    Actor::TriageAgent,
                    EventType::Telemetry,
                    format!(
                        "Telemetry captured: {} targets, {} failing health, {} metric series",
                        snapshot.health.len(),
                        failing,
                        snapshot.metrics.len()
                    ),
                );
                if run.pre_fix_snapshot.is_none() {
                    run.pre_fix_snapshot = Some(Arc::clone(&snapshot));
                }

                match self
                    .bounded("diagnosis", MenderError::Oracle, self.parts.diagnostic.diagnose(&snapshot))
                    .await
                {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Diagnostic oracle failed: {}", e);
                        self.emit(run, Phase::Triage, Actor::TriageAgent, EventType::Error, format!("Diagnosis failed: {}", e));
                        Diagnosis::degraded_unknown(format!("Diagnosis unavailable: {}", e))
                    }
                }
            }
            Err(e) => {
                warn!("Telemetry capture failed: {}", e);
                self.emit(run, Phase::Triage, Actor::TriageAgent, EventType::Error, format!("Telemetry capture failed: {}", e));
                Diagnosis::degraded_unknown(format!("Telemetry unavailable: {}", e))
            }
        };

        for symptom in &diagnosis.symptoms {
            self.emit(
                run,
                Phase::Triage,
                Actor::TriageAgent,
                EventType::Reasoning,
                format!("[{}] {} on {}: {}", symptom.severity, symptom.kind, symptom.target, symptom.evidence),
            );
        }
        self.emit(
            run,
            Phase::Triage,
            Actor::TriageAgent,
            EventType::Conclusion,
            format!("Diagnosis: {:?} - {}", diagnosis.overall_status, diagnosis.summary),
        );

        run.overall_status = diagnosis.overall_status.into();
        let has_symptoms = diagnosis.has_symptoms();
        run.diagnosis = Some(diagnosis);

        if has_symptoms {
            Transition::Next(Step::Plan)
        } else {
            self.emit(run, Phase::Done, Actor::Engine, EventType::Conclusion, "No symptoms detected, nothing to do");
            Transition::Done(TerminalState::DoneHealthy)
        }
    }

    async fn plan(&self, run: &mut WorkflowRun) -> Result<Transition> {
        info!("[{}] PLAN", run.run_id);
        let diagnosis = run
            .diagnosis
            .clone()
            .ok_or_else(|| MenderError::Invariant("plan requested without a diagnosis".into()))?;
        if !diagnosis.has_symptoms() {
            return Err(MenderError::Invariant("plan requested for a diagnosis without symptoms".into()));
        }

        let affected = diagnosis.affected_targets();
        self.emit(
            run,
            Phase::Plan,
            Actor::PlannerAgent,
            EventType::Action,
            format!("Collecting fresh logs for {}", affected.join(", ")),
        );
        let logs = match self
            .bounded("log collection", MenderError::Telemetry, self.parts.telemetry.logs_for(&affected))
            .await
        {
            Ok(logs) => logs,
            Err(e) => {
                warn!("Log collection failed: {}", e);
                Default::default()
            }
        };

        let context = PlanContext::new(logs, run.attempt_count + 1).with_previous(run.results.clone());
        let plan = self
            .bounded("planning", MenderError::Oracle, self.parts.planner.plan(&diagnosis, &context))
            .await;
        run.context = context;

        match plan {
            Ok(Some(plan)) => {
                self.emit(
                    run,
                    Phase::Plan,
                    Actor::PlannerAgent,
                    EventType::Reasoning,
                    format!("Root cause: {}", plan.root_cause),
                );
                self.emit(
                    run,
                    Phase::Plan,
                    Actor::PlannerAgent,
                    EventType::Conclusion,
                    format!("Plan: {} on {}", plan.action, plan.target),
                );
                run.plan = Some(plan);
                Ok(Transition::Next(Step::Mitigate))
            }
            Ok(None) => {
                self.emit(run, Phase::Plan, Actor::PlannerAgent, EventType::Conclusion, "No action needed");
                Ok(Transition::Done(TerminalState::DoneHealthy))
            }
            Err(e) => {
                warn!("Planning oracle failed: {}", e);
                self.emit(run, Phase::Plan, Actor::PlannerAgent, EventType::Error, format!("Planning failed, no action taken: {}", e));
                Ok(Transition::Done(TerminalState::DoneHealthy))
            }
        }
    }

    async fn mitigate(&self, run: &mut WorkflowRun) -> Result<Transition> {
        let plan = run
            .plan
            .clone()
            .ok_or_else(|| MenderError::Invariant("mitigation requested without a plan".into()))?;
        let attempt = run.breaker.begin_attempt()?;
        run.attempt_count = attempt;
        info!("[{}] MITIGATE attempt {}/{}", run.run_id, attempt, run.max_retries);

        let guard = self.lock.acquire().await;
        self.emit(
            run,
            Phase::Mitigate,
            Actor::MitigationAgent,
            EventType::LockAcquired,
            format!("Action lock acquired (attempt {}/{})", attempt, run.max_retries),
        );
        let baseline = run
            .pre_fix_snapshot
            .as_ref()
            .map(|s| s.captured_at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "none".to_string());
        self.emit(
            run,
            Phase::Mitigate,
            Actor::MitigationAgent,
            EventType::TnrBackup,
            format!("Pre-fix baseline from {}, controller snapshots before mutating", baseline),
        );

        let valid = self.managed.iter().any(|t| *t == plan.target);
        run.attempted_target = valid.then(|| plan.target.clone());
        let (result, guard) = if valid {
            self.dispatch(&plan, &run.context, guard).await
        } else {
            let result = MitigationResult::failed(
                ActionTaken::Unknown,
                &plan.target,
                format!("Unknown target '{}', not a managed target", plan.target),
            );
            (result, Some(guard))
        };

        self.emit(
            run,
            Phase::Mitigate,
            Actor::MitigationAgent,
            EventType::TnrApply,
            format!("{} on {}: {}", result.action_taken, plan.target, result.message),
        );
        let outcome_type = if result.success {
            EventType::Conclusion
        } else {
            EventType::Error
        };
        self.emit(
            run,
            Phase::Mitigate,
            Actor::MitigationAgent,
            outcome_type,
            if result.success {
                "Mitigation applied, awaiting verification".to_string()
            } else {
                format!("Mitigation failed: {}", result.message)
            },
        );
        run.record(result);

        match guard {
            Some(guard) => {
                self.emit(run, Phase::Mitigate, Actor::MitigationAgent, EventType::LockReleased, "Action lock released");
                drop(guard);
            }
            None => self.emit(
                run,
                Phase::Mitigate,
                Actor::MitigationAgent,
                EventType::LockReleased,
                "Action lock handed to the unfinished call, released when it returns",
            ),
        }

        Ok(Transition::Next(Step::Verify))
    }

    async fn dispatch(
        &self,
        plan: &MitigationPlan,
        context: &PlanContext,
        guard: ActionGuard,
    ) -> (MitigationResult, Option<ActionGuard>) {
        let controller = Arc::clone(&self.parts.controller);
        let target = plan.target.clone();
        let (outcome, guard) = match plan.action {
            ActionKind::Restart => {
                self.mutate("restart", guard, async move { controller.restart(&target).await })
                    .await
            }
            ActionKind::UpdateConfig => {
                let content = match &plan.config_content {
                    Some(content) => content.clone(),
                    None => match self
                        .bounded("config generation", MenderError::Oracle, self.parts.planner.generate_config(plan, context))
                        .await
                    {
                        Ok(content) => content,
                        Err(e) => {
                            let result = MitigationResult::failed(
                                ActionTaken::UpdateConfig,
                                &plan.target,
                                format!("Config generation failed: {}", e),
                            );
                            return (result, Some(guard));
                        }
                    },
                };
                self.mutate("apply config", guard, async move {
                    controller.apply_config(&target, &content).await
                })
                .await
            }
            ActionKind::RollbackConfig => {
                self.mutate("rollback config", guard, async move {
                    controller.rollback_config(&target).await
                })
                .await
            }
            ActionKind::Scale => {
                let result = MitigationResult::failed(
                    ActionTaken::ScaleService,
                    &plan.target,
                    "scale_service is not supported",
                );
                return (result, Some(guard));
            }
        };

        (to_result(plan.action.into(), &plan.target, outcome), guard)
    }

    async fn verify(&self, run: &mut WorkflowRun, cancel: &CancellationToken) -> Option<Transition> {
        info!("[{}] VERIFY attempt {}", run.run_id, run.attempt_count);
        self.emit(
            run,
            Phase::Verify,
            Actor::ValidationOracle,
            EventType::Action,
            "Running validation battery",
        );

        let verdict = self
            .parts
            .validator
            .validate(cancel, self.settings.call_timeout())
            .await?;
        for check in &verdict.checks {
            self.emit(
                run,
                Phase::Verify,
                Actor::ValidationOracle,
                EventType::Oracle,
                format!(
                    "{}: {} ({})",
                    check.name,
                    if check.passed { "PASS" } else { "FAIL" },
                    check.detail
                ),
            );
        }

        run.overall_status = verdict.overall_status.into();
        let healthy = verdict.is_healthy();
        let failed = verdict.failed_checks().join(", ");
        run.last_verdict = Some(verdict);

        if healthy {
            self.emit(
                run,
                Phase::Verify,
                Actor::ValidationOracle,
                EventType::TnrCommit,
                format!("All checks passed, committing attempt {}", run.attempt_count),
            );
            Some(Transition::Done(TerminalState::DoneHealthy))
        } else {
            self.emit(
                run,
                Phase::Verify,
                Actor::ValidationOracle,
                EventType::TnrRollback,
                format!("Failed checks: {}, rolling back attempt {}", failed, run.attempt_count),
            );
            Some(Transition::Next(Step::Undo))
        }
    }

    async fn undo(&self, run: &mut WorkflowRun) -> Transition {
        info!("[{}] UNDO attempt {}", run.run_id, run.attempt_count);
        let target = run.attempted_target.clone().or_else(|| self.gateway.clone());

        let result = match &target {
            Some(target) => match self.lock.acquire_timeout(self.settings.call_timeout()).await {
                Some(guard) => {
                    let controller = Arc::clone(&self.parts.controller);
                    let rollback_target = target.clone();
                    let (outcome, _guard) = self
                        .mutate("rollback", guard, async move {
                            controller.rollback_config(&rollback_target).await
                        })
                        .await;
                    to_result(ActionTaken::Rollback, target, outcome)
                }
                None => MitigationResult::failed(
                    ActionTaken::Rollback,
                    target,
                    format!(
                        "Action lock still held after {}s, rollback not issued",
                        self.settings.call_timeout_secs
                    ),
                ),
            },
            None => MitigationResult::failed(ActionTaken::Rollback, "", "No rollback target"),
        };
        self.emit(
            run,
            Phase::Undo,
            Actor::UndoAgent,
            if result.success { EventType::Action } else { EventType::Error },
            format!("Rollback of {}: {}", result.target, result.message),
        );
        run.record(result);

        if run.breaker.record_failure() {
            error!(
                "[{}] Circuit breaker open after {}/{} attempts",
                run.run_id, run.attempt_count, run.max_retries
            );
            self.emit(
                run,
                Phase::Done,
                Actor::Engine,
                EventType::CircuitBreaker,
                format!(
                    "Circuit breaker open: {} attempts exhausted, manual intervention required",
                    run.attempt_count
                ),
            );
            return Transition::Done(TerminalState::DoneCircuitOpen);
        }

        let next = match (self.settings.retry_strategy, run.plan.is_some()) {
            (RetryStrategy::ReusePlan, true) => Step::Mitigate,
            _ => Step::Triage,
        };
        self.emit(
            run,
            Phase::Undo,
            Actor::UndoAgent,
            EventType::Reasoning,
            format!(
                "Attempt {}/{} failed, {}",
                run.attempt_count,
                run.max_retries,
                match next {
                    Step::Mitigate => "retrying the same plan",
                    _ => "re-triaging from fresh telemetry",
                }
            ),
        );
        Transition::Next(next)
    }

    /// A re-triage after a failed verdict can end the run without acting.
    /// The failed verdict still stands, so health is not confirmed.
    fn check_unconfirmed(&self, run: &mut WorkflowRun) {
        let (note, status) = match &run.last_verdict {
            Some(verdict) if !verdict.is_healthy() => (
                format!(
                    "Last validation failed ({}) and no further mitigation ran",
                    verdict.failed_checks().join(", ")
                ),
                verdict.overall_status,
            ),
            _ => return,
        };
        run.overall_status = status.into();
        warn!("[{}] Health unconfirmed: {}", run.run_id, note);
        self.emit(run, Phase::Done, Actor::Engine, EventType::Error, format!("Health unconfirmed: {}", note));
        run.unconfirmed = Some(note);
    }

    fn cancelled(&self, run: WorkflowRun) -> RunReport {
        info!("[{}] Workflow cancelled", run.run_id);
        self.emit(&run, Phase::Done, Actor::Engine, EventType::Cancelled, "Workflow cancelled");
        run.into_report(TerminalState::Cancelled)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn emit(&self, run: &WorkflowRun, phase: Phase, actor: Actor, event_type: EventType, message: impl Into<String>) {
        let mut event = WorkflowEvent::new(run.run_id, phase, actor, event_type, message);
        if run.attempt_count > 0 && matches!(phase, Phase::Mitigate | Phase::Verify | Phase::Undo) {
            event = event.with_attempt(run.attempt_count);
        }
        self.bus.publish(&event);
    }

    /// Run a mutating call in a task that owns `guard`. The guard comes back
    /// only when the call finished within `call_timeout`; otherwise the task
    /// keeps it until the call returns.
    async fn mutate<F>(
        &self,
        operation: &str,
        guard: ActionGuard,
        call: F,
    ) -> (Result<ControllerOutcome>, Option<ActionGuard>)
    where
        F: Future<Output = anyhow::Result<ControllerOutcome>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let outcome = call.await;
            (outcome, guard)
        });
        match tokio::time::timeout(self.settings.call_timeout(), task).await {
            Ok(Ok((Ok(outcome), guard))) => (Ok(outcome), Some(guard)),
            Ok(Ok((Err(e), guard))) => (
                Err(MenderError::Controller(format!("{} failed: {:#}", operation, e))),
                Some(guard),
            ),
            Ok(Err(e)) => (
                Err(MenderError::Controller(format!("{} aborted: {}", operation, e))),
                None,
            ),
            Err(_) => {
                warn!("{} still running after {}s, action lock stays held", operation, self.settings.call_timeout_secs);
                (
                    Err(MenderError::Timeout {
                        operation: operation.to_string(),
                        secs: self.settings.call_timeout_secs,
                    }),
                    None,
                )
            }
        }
    }

    async fn bounded<T, F>(&self, operation: &str, wrap: fn(String) -> MenderError, fut: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.settings.call_timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(wrap(format!("{} failed: {:#}", operation, e))),
            Err(_) => Err(MenderError::Timeout {
                operation: operation.to_string(),
                secs: self.settings.call_timeout_secs,
            }),
        }
    }
}

fn to_result(action: ActionTaken, target: &str, outcome: Result<ControllerOutcome>) -> MitigationResult {
    match outcome {
        Ok(outcome) => MitigationResult::new(outcome.success, action, target, outcome.message),
        Err(e) => {
            warn!("Controller call on {} failed: {}", target, e);
            MitigationResult::failed(action, target, e.to_string())
        }
    }
}
