//! Configuration management for Mender.
//!
//! Loads settings from /etc/mender/config.toml (or `MENDER_CONFIG`) or uses
//! defaults describing the demo cluster: three business services behind one
//! gateway.

use crate::error::{MenderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/mender/config.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "MENDER_CONFIG";

/// How the engine continues after a rollback with budget left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Re-triage from fresh telemetry and ask for a new plan
    Replan,
    /// Re-execute the existing plan
    ReusePlan,
}

/// Workflow engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Mitigation attempts before the circuit breaker opens
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause before validation so mutated targets can settle
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Upper bound for any single collaborator call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_retry_strategy")]
    pub retry_strategy: RetryStrategy,
}

fn default_max_retries() -> u32 {
    3
}

fn default_settle_delay() -> u64 {
    3
}

fn default_call_timeout() -> u64 {
    30
}

fn default_retry_strategy() -> RetryStrategy {
    RetryStrategy::Replan
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            settle_delay_secs: default_settle_delay(),
            call_timeout_secs: default_call_timeout(),
            retry_strategy: default_retry_strategy(),
        }
    }
}

impl WorkflowConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Validation oracle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Representative read endpoint reached through the gateway
    #[serde(default = "default_gateway_probe_url")]
    pub gateway_probe_url: String,

    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,

    /// Timeout for each direct target probe
    #[serde(default = "default_direct_timeout")]
    pub direct_timeout_secs: u64,
}

fn default_gateway_probe_url() -> String {
    "http://localhost/api/products".to_string()
}

fn default_gateway_timeout() -> u64 {
    5
}

fn default_direct_timeout() -> u64 {
    3
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            gateway_probe_url: default_gateway_probe_url(),
            gateway_timeout_secs: default_gateway_timeout(),
            direct_timeout_secs: default_direct_timeout(),
        }
    }
}

/// Telemetry backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    #[serde(default = "default_jaeger_url")]
    pub jaeger_url: String,

    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: u32,

    /// Traces fetched per service (recent and error each)
    #[serde(default = "default_trace_limit")]
    pub trace_limit: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_jaeger_url() -> String {
    "http://localhost:16686".to_string()
}

fn default_log_tail_lines() -> u32 {
    15
}

fn default_trace_limit() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            prometheus_url: default_prometheus_url(),
            jaeger_url: default_jaeger_url(),
            log_tail_lines: default_log_tail_lines(),
            trace_limit: default_trace_limit(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Which oracle implementation diagnoses and plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    Heuristic,
    Ollama,
}

/// Oracle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_oracle_backend")]
    pub backend: OracleBackend,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,

    /// Error rate (percent) above which a service with traffic is symptomatic
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold_pct: f64,

    /// p99 latency above which a service with traffic is symptomatic
    #[serde(default = "default_p99_threshold")]
    pub p99_latency_threshold_ms: f64,

    /// CPU or memory usage above which a container is exhausted
    #[serde(default = "default_resource_threshold")]
    pub resource_threshold_pct: f64,
}

fn default_oracle_backend() -> OracleBackend {
    OracleBackend::Heuristic
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_oracle_timeout() -> u64 {
    60
}

fn default_error_rate_threshold() -> f64 {
    5.0
}

fn default_p99_threshold() -> f64 {
    2_000.0
}

fn default_resource_threshold() -> f64 {
    90.0
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: default_oracle_backend(),
            ollama_url: default_ollama_url(),
            model: default_model(),
            timeout_secs: default_oracle_timeout(),
            error_rate_threshold_pct: default_error_rate_threshold(),
            p99_latency_threshold_ms: default_p99_threshold(),
            resource_threshold_pct: default_resource_threshold(),
        }
    }
}

/// Gateway config deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_config_path")]
    pub config_path: String,

    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,

    #[serde(default = "default_test_command")]
    pub test_command: String,

    #[serde(default = "default_reload_command")]
    pub reload_command: String,

    /// Port the gateway listens on inside the container
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

fn default_config_path() -> String {
    "/etc/nginx/nginx.conf".to_string()
}

fn default_backup_suffix() -> String {
    ".bak".to_string()
}

fn default_test_command() -> String {
    "nginx -t".to_string()
}

fn default_reload_command() -> String {
    "nginx -s reload".to_string()
}

fn default_listen_port() -> u16 {
    80
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            backup_suffix: default_backup_suffix(),
            test_command: default_test_command(),
            reload_command: default_reload_command(),
            listen_port: default_listen_port(),
        }
    }
}

impl GatewayConfig {
    pub fn backup_path(&self) -> String {
        format!("{}{}", self.config_path, self.backup_suffix)
    }
}

/// Daemon loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between workflow runs
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Dashboard base URL receiving events at /api/agent-log
    #[serde(default)]
    pub dashboard_url: Option<String>,

    /// JSONL file receiving every event
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

fn default_interval() -> u64 {
    60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            dashboard_url: None,
            event_log: None,
        }
    }
}

/// Role of a managed target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetRole {
    /// Business service with a health endpoint
    Service,
    /// Front-door routing target
    Gateway,
    Infra,
}

/// One managed target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Container name
    pub name: String,

    #[serde(default = "default_role")]
    pub role: TargetRole,

    #[serde(default)]
    pub health_url: Option<String>,

    /// Prometheus metric prefix, e.g. "order" for order_requests_total
    #[serde(default)]
    pub metrics_prefix: Option<String>,

    /// Gateway route forwarded to this service, e.g. "/api/orders"
    #[serde(default)]
    pub route: Option<String>,

    /// Upstream address as seen from the gateway, e.g. "order-service:5001"
    #[serde(default)]
    pub upstream: Option<String>,
}

fn default_role() -> TargetRole {
    TargetRole::Service
}

impl TargetConfig {
    pub fn service(name: &str, port: u16, prefix: &str, route: &str) -> Self {
        Self {
            name: name.to_string(),
            role: TargetRole::Service,
            health_url: Some(format!("http://localhost:{}/health", port)),
            metrics_prefix: Some(prefix.to_string()),
            route: Some(route.to_string()),
            upstream: Some(format!("{}:{}", name, port)),
        }
    }

    pub fn gateway(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role: TargetRole::Gateway,
            health_url: None,
            metrics_prefix: None,
            route: None,
            upstream: None,
        }
    }

    pub fn is_service(&self) -> bool {
        self.role == TargetRole::Service
    }
}

fn default_targets() -> Vec<TargetConfig> {
    vec![
        TargetConfig::service("order-service", 5001, "order", "/api/orders"),
        TargetConfig::service("product-service", 5002, "product", "/api/products"),
        TargetConfig::service("payment-service", 5003, "payment", "/api/payments"),
        TargetConfig::gateway("api-gateway"),
    ]
}

/// Full configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenderConfig {
    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default = "default_targets")]
    pub targets: Vec<TargetConfig>,
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            validation: ValidationConfig::default(),
            telemetry: TelemetryConfig::default(),
            oracle: OracleConfig::default(),
            gateway: GatewayConfig::default(),
            daemon: DaemonConfig::default(),
            targets: default_targets(),
        }
    }
}

impl MenderConfig {
    /// Load config from an explicit path, `MENDER_CONFIG`, the system path,
    /// or fall back to defaults. An explicit path that cannot be read is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = if let Some(path) = explicit {
            Self::load_from_path(path)?
        } else if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            Self::load_from_path(Path::new(&env_path))?
        } else if Path::new(CONFIG_PATH).exists() {
            Self::load_from_path(Path::new(CONFIG_PATH))?
        } else {
            warn!("Config not found at {}, using defaults", CONFIG_PATH);
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MenderError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MenderError::Config(e.to_string()))
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_retries == 0 {
            return Err(MenderError::Config("workflow.max_retries must be > 0".into()));
        }
        if self.targets.is_empty() {
            return Err(MenderError::Config("at least one target is required".into()));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(MenderError::Config("target name must not be empty".into()));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(MenderError::Config(format!(
                    "duplicate target '{}'",
                    target.name
                )));
            }
        }

        let gateways = self
            .targets
            .iter()
            .filter(|t| t.role == TargetRole::Gateway)
            .count();
        if gateways != 1 {
            return Err(MenderError::Config(format!(
                "exactly one gateway target is required, found {}",
                gateways
            )));
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.target(name).is_some()
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }

    /// The front-door routing target
    pub fn gateway_target(&self) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.role == TargetRole::Gateway)
    }

    /// Business services, in configuration order
    pub fn services(&self) -> impl Iterator<Item = &TargetConfig> {
        self.targets.iter().filter(|t| t.is_service())
    }
}
