//! Workflow data model
//!
//! Telemetry snapshots, diagnoses, plans, mitigation results and validation
//! verdicts. Every enum here is closed and matched exhaustively by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Telemetry
// ============================================================================

/// Container lifecycle state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Restarting,
    Stopped,
    Exited,
    NotFound,
    Unknown,
}

impl ContainerState {
    /// Parse a runtime status string (`docker inspect` `.State.Status`)
    pub fn parse(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "created" | "paused" | "stopped" => Self::Stopped,
            "exited" | "dead" | "removing" => Self::Exited,
            "not_found" | "" => Self::NotFound,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
            Self::NotFound => write!(f, "not_found"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Outcome of one HTTP health request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum HttpOutcome {
    Status(u16),
    Unreachable(String),
}

impl HttpOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Status(200))
    }
}

/// Health classification of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Running and health endpoint answered 200
    Healthy,
    /// Running, no health endpoint to ask
    Running,
    /// Running but health endpoint answered non-200
    Unhealthy,
    /// Health endpoint could not be reached
    Unreachable,
    /// Container is not running
    Stopped,
    NotFound,
}

impl HealthState {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Healthy | Self::Running)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
            Self::Unreachable => write!(f, "UNREACHABLE"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::NotFound => write!(f, "NOT_FOUND"),
        }
    }
}

/// Health entry for one managed target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target: String,
    pub container: ContainerState,
    pub http_status: Option<u16>,
    pub state: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TargetHealth {
    /// Classify a target from its container state and optional HTTP probe.
    ///
    /// The HTTP probe only matters when the container is running.
    pub fn observe(target: &str, container: ContainerState, http: Option<HttpOutcome>) -> Self {
        let (state, http_status, detail) = match container {
            ContainerState::NotFound => (HealthState::NotFound, None, None),
            ContainerState::Running => match http {
                None => (HealthState::Running, None, None),
                Some(HttpOutcome::Status(200)) => (HealthState::Healthy, Some(200), None),
                Some(HttpOutcome::Status(code)) => (HealthState::Unhealthy, Some(code), None),
                Some(HttpOutcome::Unreachable(err)) => (HealthState::Unreachable, None, Some(err)),
            },
            other => (
                HealthState::Stopped,
                None,
                Some(format!("container {}", other)),
            ),
        };

        Self {
            target: target.to_string(),
            container,
            http_status,
            state,
            detail,
        }
    }

    /// Entry for a target whose state could not be determined at all
    pub fn unreachable(target: &str, reason: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            container: ContainerState::Unknown,
            http_status: None,
            state: HealthState::Unreachable,
            detail: Some(reason.into()),
        }
    }

    /// One-line rendering, e.g. `order-service: HEALTHY (HTTP 200)`
    pub fn line(&self) -> String {
        let mut line = format!("{}: {}", self.target, self.state);
        if let Some(code) = self.http_status {
            line.push_str(&format!(" (HTTP {})", code));
        }
        if let Some(detail) = &self.detail {
            line.push_str(&format!(" ({})", detail));
        }
        line
    }
}

/// Per-service metrics summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceMetrics {
    pub service: String,
    /// Scrape target up/down, None when the metrics backend had no series
    pub up: Option<bool>,
    /// Requests per second over the last minute
    pub request_rate: f64,
    /// Share of 4xx/5xx responses, percent. None without traffic.
    pub error_rate_pct: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

impl ServiceMetrics {
    pub fn has_traffic(&self) -> bool {
        self.request_rate > 0.0
    }
}

/// Container resource usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub target: String,
    pub cpu_pct: f64,
    pub memory_pct: f64,
}

/// Immutable bundle of telemetry captured at one point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub captured_at: DateTime<Utc>,
    pub health: Vec<TargetHealth>,
    pub metrics: Vec<ServiceMetrics>,
    /// Human-readable metrics summary (also carries query errors)
    pub metrics_raw: String,
    /// Trace summaries keyed by service
    pub traces: BTreeMap<String, String>,
    /// Log tails keyed by target
    pub logs: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Vec<ResourceUsage>,
    /// Request through the front-door gateway, if one was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_probe: Option<HttpOutcome>,
}

impl TelemetrySnapshot {
    pub fn empty() -> Self {
        Self {
            captured_at: Utc::now(),
            health: Vec::new(),
            metrics: Vec::new(),
            metrics_raw: String::new(),
            traces: BTreeMap::new(),
            logs: BTreeMap::new(),
            resources: Vec::new(),
            gateway_probe: None,
        }
    }

    pub fn health_for(&self, target: &str) -> Option<&TargetHealth> {
        self.health.iter().find(|h| h.target == target)
    }

    pub fn metrics_for(&self, service: &str) -> Option<&ServiceMetrics> {
        self.metrics.iter().find(|m| m.service == service)
    }

    pub fn unhealthy_targets(&self) -> Vec<&TargetHealth> {
        self.health.iter().filter(|h| !h.state.is_ok()).collect()
    }

    /// Multi-line health report, one target per line
    pub fn health_report(&self) -> String {
        self.health
            .iter()
            .map(|h| h.line())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Diagnosis
// ============================================================================

/// Kind of observed abnormality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymptomKind {
    HighErrorRate,
    HighLatency,
    ServiceDown,
    ResourceExhaustion,
    ConnectivityError,
    ConfigError,
}

impl fmt::Display for SymptomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighErrorRate => write!(f, "high_error_rate"),
            Self::HighLatency => write!(f, "high_latency"),
            Self::ServiceDown => write!(f, "service_down"),
            Self::ResourceExhaustion => write!(f, "resource_exhaustion"),
            Self::ConnectivityError => write!(f, "connectivity_error"),
            Self::ConfigError => write!(f, "config_error"),
        }
    }
}

/// Symptom severity, ordered low < medium < high < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "LOW")]
    Low,
    #[serde(alias = "MEDIUM")]
    Medium,
    #[serde(alias = "HIGH")]
    High,
    #[serde(alias = "CRITICAL")]
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One observed abnormality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symptom {
    pub target: String,
    pub kind: SymptomKind,
    pub severity: Severity,
    pub evidence: String,
    #[serde(default)]
    pub affected_endpoints: BTreeSet<String>,
}

impl Symptom {
    pub fn new(target: &str, kind: SymptomKind, severity: Severity, evidence: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            kind,
            severity,
            evidence: evidence.into(),
            affected_endpoints: BTreeSet::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.affected_endpoints.insert(endpoint.to_string());
        self
    }
}

/// Overall status reported by a diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Result of one triage pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    #[serde(default)]
    pub symptoms: Vec<Symptom>,
    pub overall_status: DiagnosisStatus,
    pub summary: String,
}

impl Diagnosis {
    /// The valid default: no symptoms, healthy
    pub fn healthy(summary: impl Into<String>) -> Self {
        Self {
            symptoms: Vec::new(),
            overall_status: DiagnosisStatus::Healthy,
            summary: summary.into(),
        }
    }

    /// Diagnosis recorded when the oracle itself failed.
    ///
    /// Carries no symptoms so the engine takes the no-plan branch.
    pub fn degraded_unknown(reason: impl Into<String>) -> Self {
        Self {
            symptoms: Vec::new(),
            overall_status: DiagnosisStatus::Degraded,
            summary: reason.into(),
        }
    }

    pub fn from_symptoms(symptoms: Vec<Symptom>, summary: impl Into<String>) -> Self {
        let overall_status = match symptoms.iter().map(|s| s.severity).max() {
            None => DiagnosisStatus::Healthy,
            Some(Severity::Critical) => DiagnosisStatus::Critical,
            Some(_) => DiagnosisStatus::Degraded,
        };
        Self {
            symptoms,
            overall_status,
            summary: summary.into(),
        }
    }

    pub fn has_symptoms(&self) -> bool {
        !self.symptoms.is_empty()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.symptoms.iter().map(|s| s.severity).max()
    }

    /// Distinct targets named by symptoms, in first-reported order
    pub fn affected_targets(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.symptoms
            .iter()
            .filter(|s| seen.insert(s.target.clone()))
            .map(|s| s.target.clone())
            .collect()
    }
}

// ============================================================================
// Planning and mitigation
// ============================================================================

/// Mutating action a plan may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "restart_container", alias = "restart")]
    Restart,
    #[serde(rename = "update_config")]
    UpdateConfig,
    #[serde(rename = "rollback_config")]
    RollbackConfig,
    /// Reserved, never executed by the engine
    #[serde(rename = "scale_service", alias = "scale")]
    Scale,
}

impl ActionKind {
    /// Whether the action mutates target configuration
    pub fn touches_config(&self) -> bool {
        matches!(self, Self::UpdateConfig | Self::RollbackConfig)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restart => write!(f, "restart_container"),
            Self::UpdateConfig => write!(f, "update_config"),
            Self::RollbackConfig => write!(f, "rollback_config"),
            Self::Scale => write!(f, "scale_service"),
        }
    }
}

/// Single mitigation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationPlan {
    pub root_cause: String,
    pub target: String,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_content: Option<String>,
    pub reasoning: String,
    pub estimated_impact: String,
}

impl MitigationPlan {
    pub fn new(target: &str, action: ActionKind, root_cause: impl Into<String>) -> Self {
        Self {
            root_cause: root_cause.into(),
            target: target.to_string(),
            action,
            config_content: None,
            reasoning: String::new(),
            estimated_impact: String::new(),
        }
    }

    pub fn with_config(mut self, content: impl Into<String>) -> Self {
        self.config_content = Some(content.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        self.estimated_impact = impact.into();
        self
    }
}

/// What a mitigation attempt actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    RestartContainer,
    UpdateConfig,
    RollbackConfig,
    ScaleService,
    None,
    Rollback,
    Unknown,
}

impl From<ActionKind> for ActionTaken {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Restart => Self::RestartContainer,
            ActionKind::UpdateConfig => Self::UpdateConfig,
            ActionKind::RollbackConfig => Self::RollbackConfig,
            ActionKind::Scale => Self::ScaleService,
        }
    }
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RestartContainer => write!(f, "restart_container"),
            Self::UpdateConfig => write!(f, "update_config"),
            Self::RollbackConfig => write!(f, "rollback_config"),
            Self::ScaleService => write!(f, "scale_service"),
            Self::None => write!(f, "none"),
            Self::Rollback => write!(f, "rollback"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of one mitigation or rollback call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MitigationResult {
    pub success: bool,
    pub action_taken: ActionTaken,
    pub message: String,
    pub target: String,
}

impl MitigationResult {
    pub fn new(success: bool, action_taken: ActionTaken, target: &str, message: impl Into<String>) -> Self {
        Self {
            success,
            action_taken,
            message: message.into(),
            target: target.to_string(),
        }
    }

    pub fn failed(action_taken: ActionTaken, target: &str, message: impl Into<String>) -> Self {
        Self::new(false, action_taken, target, message)
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Healthy,
    Degraded,
}

/// One named validation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub detail: String,
}

/// Verdict of the validation battery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub checks: Vec<CheckResult>,
    pub overall_status: VerdictStatus,
}

impl ValidationVerdict {
    /// Healthy iff every check passed. An empty battery is not healthy.
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let healthy = !checks.is_empty() && checks.iter().all(|c| c.passed);
        Self {
            checks,
            overall_status: if healthy {
                VerdictStatus::Healthy
            } else {
                VerdictStatus::Degraded
            },
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall_status == VerdictStatus::Healthy
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }
}

// ============================================================================
// Run status
// ============================================================================

/// Overall status tracked on a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

impl From<DiagnosisStatus> for RunStatus {
    fn from(status: DiagnosisStatus) -> Self {
        match status {
            DiagnosisStatus::Healthy => Self::Healthy,
            DiagnosisStatus::Degraded => Self::Degraded,
            DiagnosisStatus::Critical => Self::Critical,
        }
    }
}

impl From<VerdictStatus> for RunStatus {
    fn from(status: VerdictStatus) -> Self {
        match status {
            VerdictStatus::Healthy => Self::Healthy,
            VerdictStatus::Degraded => Self::Degraded,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Critical => write!(f, "critical"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
