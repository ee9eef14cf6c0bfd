//! Validation Oracle - post-mitigation health battery
//!
//! After a settle delay, three independent checks run in fixed order:
//!
//! 1. System Health Check: every managed container running, every health
//!    endpoint answering 200
//! 2. Gateway Probe: one read request through the front door
//! 3. Direct Target Probes: every business service health endpoint
//!
//! The verdict is healthy only when all three pass. Each check is bounded by
//! a timeout; a check that does not finish in time fails.

use crate::config::{TargetConfig, ValidationConfig, WorkflowConfig};
use crate::model::{CheckResult, ContainerState, HttpOutcome, TargetHealth, ValidationVerdict};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CHECK_SYSTEM_HEALTH: &str = "System Health Check";
pub const CHECK_GATEWAY_PROBE: &str = "Gateway Probe";
pub const CHECK_DIRECT_PROBES: &str = "Direct Target Probes";

/// Low-level probing used by the validation oracle
#[async_trait]
pub trait Prober: Send + Sync {
    async fn container_state(&self, target: &str) -> ContainerState;

    /// GET with a hard timeout. Transport failures become `Unreachable`.
    async fn http_get(&self, url: &str, timeout: Duration) -> HttpOutcome;
}

/// Runs the fixed validation battery
pub struct ValidationOracle {
    prober: Arc<dyn Prober>,
    targets: Vec<TargetConfig>,
    settings: ValidationConfig,
    settle_delay: Duration,
    check_timeout: Duration,
}

impl ValidationOracle {
    pub fn new(
        prober: Arc<dyn Prober>,
        targets: Vec<TargetConfig>,
        settings: ValidationConfig,
        settle_delay: Duration,
    ) -> Self {
        Self {
            prober,
            targets,
            settings,
            settle_delay,
            check_timeout: WorkflowConfig::default().call_timeout(),
        }
    }

    /// Bound used by `run_checks`
    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    /// Wait for the settle delay, then run all checks, each bounded by `limit`.
    ///
    /// Returns `None` if cancelled while settling or checking.
    pub async fn validate(&self, cancel: &CancellationToken, limit: Duration) -> Option<ValidationVerdict> {
        if !self.settle_delay.is_zero() {
            debug!("Settling for {:?} before validation", self.settle_delay);
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.settle_delay) => {}
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => None,
            verdict = self.checks_within(limit) => Some(verdict),
        }
    }

    /// Run the battery immediately, without settling
    pub async fn run_checks(&self) -> ValidationVerdict {
        self.checks_within(self.check_timeout).await
    }

    async fn checks_within(&self, limit: Duration) -> ValidationVerdict {
        let checks = vec![
            within(CHECK_SYSTEM_HEALTH, limit, self.system_health_check()).await,
            within(CHECK_GATEWAY_PROBE, limit, self.gateway_probe()).await,
            within(CHECK_DIRECT_PROBES, limit, self.direct_probes()).await,
        ];
        let verdict = ValidationVerdict::from_checks(checks);
        info!(
            "Validation: {}/{} checks passed",
            verdict.passed_count(),
            verdict.checks.len()
        );
        verdict
    }

    pub async fn system_health_check(&self) -> CheckResult {
        let direct = Duration::from_secs(self.settings.direct_timeout_secs);
        let mut failures = Vec::new();

        for target in &self.targets {
            let state = self.prober.container_state(&target.name).await;
            let http = match (&target.health_url, state.is_running()) {
                (Some(url), true) => Some(self.prober.http_get(url, direct).await),
                _ => None,
            };
            let health = TargetHealth::observe(&target.name, state, http);
            if !health.state.is_ok() {
                failures.push(health.line());
            }
        }

        if failures.is_empty() {
            CheckResult {
                name: CHECK_SYSTEM_HEALTH.to_string(),
                passed: true,
                detail: format!("{} targets healthy", self.targets.len()),
            }
        } else {
            CheckResult {
                name: CHECK_SYSTEM_HEALTH.to_string(),
                passed: false,
                detail: failures.join("; "),
            }
        }
    }

    pub async fn gateway_probe(&self) -> CheckResult {
        let url = &self.settings.gateway_probe_url;
        let timeout = Duration::from_secs(self.settings.gateway_timeout_secs);
        let outcome = self.prober.http_get(url, timeout).await;
        let detail = match &outcome {
            HttpOutcome::Status(code) => format!("GET {} -> HTTP {}", url, code),
            HttpOutcome::Unreachable(err) => format!("GET {} -> {}", url, err),
        };
        CheckResult {
            name: CHECK_GATEWAY_PROBE.to_string(),
            passed: outcome.is_ok(),
            detail,
        }
    }

    pub async fn direct_probes(&self) -> CheckResult {
        let timeout = Duration::from_secs(self.settings.direct_timeout_secs);
        let mut lines = Vec::new();
        let mut all_ok = true;

        for target in self.targets.iter().filter(|t| t.is_service()) {
            let Some(url) = &target.health_url else {
                continue;
            };
            match self.prober.http_get(url, timeout).await {
                HttpOutcome::Status(200) => lines.push(format!("{}: 200", target.name)),
                HttpOutcome::Status(code) => {
                    all_ok = false;
                    lines.push(format!("{}: {}", target.name, code));
                }
                HttpOutcome::Unreachable(err) => {
                    all_ok = false;
                    lines.push(format!("{}: {}", target.name, err));
                }
            }
        }

        CheckResult {
            name: CHECK_DIRECT_PROBES.to_string(),
            passed: all_ok,
            detail: lines.join(", "),
        }
    }
}

async fn within<F>(name: &str, limit: Duration, check: F) -> CheckResult
where
    F: Future<Output = CheckResult>,
{
    match tokio::time::timeout(limit, check).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} did not finish within {}s", name, limit.as_secs());
            CheckResult {
                name: name.to_string(),
                passed: false,
                detail: format!("timed out after {}s", limit.as_secs()),
            }
        }
    }
}

// ============================================================================
// Fake Prober (Testing)
// ============================================================================

/// Prober with fixed answers. Unknown targets are running, unknown URLs answer 200.
pub struct FakeProber {
    states: HashMap<String, ContainerState>,
    responses: HashMap<String, HttpOutcome>,
    http_calls: Arc<Mutex<Vec<String>>>,
}

impl FakeProber {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            responses: HashMap::new(),
            http_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_state(mut self, target: &str, state: ContainerState) -> Self {
        self.states.insert(target.to_string(), state);
        self
    }

    pub fn with_response(mut self, url: &str, outcome: HttpOutcome) -> Self {
        self.responses.insert(url.to_string(), outcome);
        self
    }

    /// URLs requested so far, in order
    pub fn http_calls(&self) -> Vec<String> {
        self.http_calls.lock().unwrap().clone()
    }
}

impl Default for FakeProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn container_state(&self, target: &str) -> ContainerState {
        self.states
            .get(target)
            .copied()
            .unwrap_or(ContainerState::Running)
    }

    async fn http_get(&self, url: &str, _timeout: Duration) -> HttpOutcome {
        self.http_calls.lock().unwrap().push(url.to_string());
        self.responses
            .get(url)
            .cloned()
            .unwrap_or(HttpOutcome::Status(200))
    }
}
