//! Rule-based oracles
//!
//! Deterministic diagnosis and planning used when no model is configured,
//! and as the fallback for the LLM-backed oracle.
//!
//! Diagnosis rules:
//! - zero traffic is normal, never a symptom on its own
//! - failed health or a DOWN scrape target is `service_down`
//! - error rate above threshold is `high_error_rate`, only with traffic
//! - p99 above threshold is `high_latency`, only with traffic
//! - a failing gateway while every upstream is healthy is a gateway
//!   `config_error` (5xx) or `connectivity_error` (unreachable)
//!
//! Planning picks the most severe symptom and the least risky action:
//! restart before config changes. Scaling is never proposed.

use crate::config::{MenderConfig, OracleConfig, TargetConfig, TargetRole};
use crate::model::{
    ActionKind, Diagnosis, HealthState, HttpOutcome, MitigationPlan, Severity, Symptom,
    SymptomKind, TelemetrySnapshot,
};
use crate::oracle::{DiagnosticOracle, PlanContext, PlanningOracle};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Write;

// ============================================================================
// Diagnosis
// ============================================================================

pub struct HeuristicDiagnosticOracle {
    thresholds: OracleConfig,
    targets: Vec<TargetConfig>,
}

impl HeuristicDiagnosticOracle {
    pub fn new(config: &MenderConfig) -> Self {
        Self {
            thresholds: config.oracle.clone(),
            targets: config.targets.clone(),
        }
    }

    fn route_of(&self, target: &str) -> Option<&str> {
        self.targets
            .iter()
            .find(|t| t.name == target)
            .and_then(|t| t.route.as_deref())
    }

    fn tag(&self, symptom: Symptom) -> Symptom {
        match self.route_of(&symptom.target).map(str::to_string) {
            Some(route) => symptom.with_endpoint(&route),
            None => symptom,
        }
    }

    /// Apply the rules to a snapshot
    pub fn evaluate(&self, snapshot: &TelemetrySnapshot) -> Diagnosis {
        let mut symptoms = Vec::new();
        let mut down: HashSet<String> = HashSet::new();

        for health in &snapshot.health {
            if health.state.is_ok() {
                continue;
            }
            let severity = match health.state {
                HealthState::Stopped | HealthState::NotFound => Severity::Critical,
                _ => Severity::High,
            };
            down.insert(health.target.clone());
            symptoms.push(self.tag(Symptom::new(
                &health.target,
                SymptomKind::ServiceDown,
                severity,
                health.line(),
            )));
        }

        for m in &snapshot.metrics {
            if m.up == Some(false) && !down.contains(&m.service) {
                down.insert(m.service.clone());
                symptoms.push(self.tag(Symptom::new(
                    &m.service,
                    SymptomKind::ServiceDown,
                    Severity::High,
                    "Prometheus scrape target DOWN",
                )));
            }
            if !m.has_traffic() {
                continue;
            }
            if let Some(rate) = m.error_rate_pct {
                if rate > self.thresholds.error_rate_threshold_pct {
                    let severity = if rate >= 50.0 {
                        Severity::Critical
                    } else if rate >= 20.0 {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    symptoms.push(self.tag(Symptom::new(
                        &m.service,
                        SymptomKind::HighErrorRate,
                        severity,
                        format!("error rate {:.1}% at {:.2} req/s", rate, m.request_rate),
                    )));
                }
            }
            if let Some(p99) = m.p99_ms {
                let limit = self.thresholds.p99_latency_threshold_ms;
                if p99 > limit {
                    let severity = if p99 > limit * 2.0 {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    symptoms.push(self.tag(Symptom::new(
                        &m.service,
                        SymptomKind::HighLatency,
                        severity,
                        format!("p99 {:.0}ms exceeds {:.0}ms", p99, limit),
                    )));
                }
            }
        }

        for r in &snapshot.resources {
            let limit = self.thresholds.resource_threshold_pct;
            if r.cpu_pct > limit || r.memory_pct > limit {
                symptoms.push(self.tag(Symptom::new(
                    &r.target,
                    SymptomKind::ResourceExhaustion,
                    Severity::Medium,
                    format!("cpu {:.1}%, memory {:.1}%", r.cpu_pct, r.memory_pct),
                )));
            }
        }

        if let Some(symptom) = self.gateway_symptom(snapshot, &down) {
            symptoms.push(symptom);
        }

        let summary = if symptoms.is_empty() {
            format!("All {} targets healthy", self.targets.len())
        } else {
            let kinds: Vec<String> = symptoms
                .iter()
                .map(|s| format!("{} on {}", s.kind, s.target))
                .collect();
            format!("{} symptom(s): {}", symptoms.len(), kinds.join(", "))
        };
        Diagnosis::from_symptoms(symptoms, summary)
    }

    fn gateway_symptom(&self, snapshot: &TelemetrySnapshot, down: &HashSet<String>) -> Option<Symptom> {
        let gateway = self.targets.iter().find(|t| t.role == TargetRole::Gateway)?;
        let probe = snapshot.gateway_probe.as_ref()?;
        if probe.is_ok() || !down.is_empty() {
            // Failing upstreams already explain a failing gateway
            return None;
        }

        let symptom = match probe {
            HttpOutcome::Status(code) if *code >= 500 => Symptom::new(
                &gateway.name,
                SymptomKind::ConfigError,
                Severity::High,
                format!("gateway answered HTTP {} while every upstream is healthy", code),
            ),
            HttpOutcome::Status(code) => Symptom::new(
                &gateway.name,
                SymptomKind::ConfigError,
                Severity::Medium,
                format!("gateway answered HTTP {}", code),
            ),
            HttpOutcome::Unreachable(err) => Symptom::new(
                &gateway.name,
                SymptomKind::ConnectivityError,
                Severity::High,
                format!("gateway unreachable: {}", err),
            ),
        };
        Some(symptom)
    }
}

#[async_trait]
impl DiagnosticOracle for HeuristicDiagnosticOracle {
    async fn diagnose(&self, snapshot: &TelemetrySnapshot) -> Result<Diagnosis> {
        Ok(self.evaluate(snapshot))
    }
}

// ============================================================================
// Planning
// ============================================================================

pub struct HeuristicPlanningOracle {
    targets: Vec<TargetConfig>,
    listen_port: u16,
}

impl HeuristicPlanningOracle {
    pub fn new(config: &MenderConfig) -> Self {
        Self {
            targets: config.targets.clone(),
            listen_port: config.gateway.listen_port,
        }
    }

    fn is_gateway(&self, target: &str) -> bool {
        self.targets
            .iter()
            .any(|t| t.name == target && t.role == TargetRole::Gateway)
    }

    /// Build a plan for the most severe symptom, first reported on ties
    pub fn choose(&self, diagnosis: &Diagnosis) -> Option<MitigationPlan> {
        let worst = diagnosis
            .symptoms
            .iter()
            .fold(None::<&Symptom>, |best, s| match best {
                Some(b) if b.severity >= s.severity => Some(b),
                _ => Some(s),
            })?;

        let plan = match worst.kind {
            SymptomKind::ConfigError if self.is_gateway(&worst.target) => MitigationPlan::new(
                &worst.target,
                ActionKind::UpdateConfig,
                format!("Gateway routing misconfigured: {}", worst.evidence),
            )
            .with_config(render_gateway_config(&self.targets, self.listen_port))
            .with_reasoning("Upstreams answer their health checks directly, so the fault is in the gateway config")
            .with_impact("Gateway reload, in-flight requests may be retried"),
            SymptomKind::ConfigError => MitigationPlan::new(
                &worst.target,
                ActionKind::Restart,
                format!("Configuration fault on {}: {}", worst.target, worst.evidence),
            )
            .with_reasoning("No config template for this target, restart reloads its config")
            .with_impact("Brief outage of one target"),
            kind => MitigationPlan::new(
                &worst.target,
                ActionKind::Restart,
                format!("{} on {}: {}", kind, worst.target, worst.evidence),
            )
            .with_reasoning("Restart is the least risky action for a single misbehaving target")
            .with_impact("Brief outage of one target"),
        };
        Some(plan)
    }
}

#[async_trait]
impl PlanningOracle for HeuristicPlanningOracle {
    async fn plan(&self, diagnosis: &Diagnosis, _context: &PlanContext) -> Result<Option<MitigationPlan>> {
        Ok(self.choose(diagnosis))
    }

    async fn generate_config(&self, plan: &MitigationPlan, _context: &PlanContext) -> Result<String> {
        if !self.is_gateway(&plan.target) {
            bail!("no config template for {}", plan.target);
        }
        Ok(render_gateway_config(&self.targets, self.listen_port))
    }
}

/// Render a complete nginx config routing every service that has a route and
/// an upstream. Also exposes stub_status at /nginx_status.
pub fn render_gateway_config(targets: &[TargetConfig], listen_port: u16) -> String {
    let routed: Vec<(&TargetConfig, &str, &str)> = targets
        .iter()
        .filter(|t| t.is_service())
        .filter_map(|t| Some((t, t.route.as_deref()?, t.upstream.as_deref()?)))
        .collect();

    let mut out = String::new();
    out.push_str("worker_processes auto;\n\nevents {\n    worker_connections 1024;\n}\n\nhttp {\n");
    for (target, _, upstream) in &routed {
        let _ = write!(
            out,
            "    upstream {} {{\n        server {};\n    }}\n\n",
            upstream_name(&target.name),
            upstream
        );
    }
    let _ = write!(
        out,
        "    server {{\n        listen {} default_server;\n        server_name localhost;\n\n",
        listen_port
    );
    for (target, route, _) in &routed {
        let backend_path = route.strip_prefix("/api").unwrap_or(*route);
        let _ = write!(
            out,
            "        location {} {{\n            proxy_pass http://{}{};\n            proxy_connect_timeout 3s;\n            proxy_read_timeout 3s;\n        }}\n\n",
            route,
            upstream_name(&target.name),
            backend_path
        );
    }
    out.push_str("        location /nginx_status {\n            stub_status on;\n            allow all;\n        }\n\n");
    out.push_str("        location / {\n            return 200 '{\"message\": \"API Gateway\"}';\n            add_header Content-Type application/json;\n        }\n");
    out.push_str("    }\n}\n");
    out
}

fn upstream_name(target: &str) -> String {
    target.replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerState, DiagnosisStatus, ServiceMetrics, TargetHealth};

    fn healthy_snapshot(config: &MenderConfig) -> TelemetrySnapshot {
        let mut snap = TelemetrySnapshot::empty();
        for t in &config.targets {
            let http = t.health_url.as_ref().map(|_| HttpOutcome::Status(200));
            snap.health.push(TargetHealth::observe(&t.name, ContainerState::Running, http));
        }
        snap
    }

    fn metrics(service: &str, rate: f64, err: Option<f64>, p99: Option<f64>) -> ServiceMetrics {
        ServiceMetrics {
            service: service.to_string(),
            up: Some(true),
            request_rate: rate,
            error_rate_pct: err,
            p99_ms: p99,
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_cluster_has_no_symptoms() {
        let config = MenderConfig::default();
        let oracle = HeuristicDiagnosticOracle::new(&config);
        let d = oracle.evaluate(&healthy_snapshot(&config));
        assert!(!d.has_symptoms());
        assert_eq!(d.overall_status, DiagnosisStatus::Healthy);
    }

    #[test]
    fn test_zero_traffic_is_normal() {
        let config = MenderConfig::default();
        let oracle = HeuristicDiagnosticOracle::new(&config);
        let mut snap = healthy_snapshot(&config);
        // No traffic: a stale error ratio must not count
        snap.metrics.push(metrics("order-service", 0.0, Some(100.0), Some(9_000.0)));
        assert!(!oracle.evaluate(&snap).has_symptoms());
    }

    #[test]
    fn test_error_rate_and_latency_with_traffic() {
        let config = MenderConfig::default();
        let oracle = HeuristicDiagnosticOracle::new(&config);
        let mut snap = healthy_snapshot(&config);
        snap.metrics.push(metrics("payment-service", 4.0, Some(30.0), Some(2_500.0)));

        let d = oracle.evaluate(&snap);
        let kinds: Vec<SymptomKind> = d.symptoms.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SymptomKind::HighErrorRate, SymptomKind::HighLatency]);
        assert_eq!(d.symptoms[0].severity, Severity::High);
        assert!(d.symptoms[0].affected_endpoints.contains("/api/payments"));
    }

    #[test]
    fn test_error_rate_at_threshold_is_not_symptom() {
        let config = MenderConfig::default();
        let oracle = HeuristicDiagnosticOracle::new(&config);
        let mut snap = healthy_snapshot(&config);
        snap.metrics.push(metrics("order-service", 2.0, Some(5.0), None));
        assert!(!oracle.evaluate(&snap).has_symptoms());
    }

    #[test]
    fn test_stopped_service_is_critical() {
        let config = MenderConfig::default();
        let oracle = HeuristicDiagnosticOracle::new(&config);
        let mut snap = healthy_snapshot(&config);
        snap.health[0] = TargetHealth::observe("order-service", ContainerState::Exited, None);
        // Upstream down explains the gateway failure
        snap.gateway_probe = Some(HttpOutcome::Status(502));

        let d = oracle.evaluate(&snap);
        assert_eq!(d.symptoms.len(), 1);
        assert_eq!(d.symptoms[0].kind, SymptomKind::ServiceDown);
        assert_eq!(d.overall_status, DiagnosisStatus::Critical);
    }

    #[test]
    fn test_gateway_5xx_with_healthy_upstreams_is_config_error() {
        let config = MenderConfig::default();
        let oracle = HeuristicDiagnosticOracle::new(&config);
        let mut snap = healthy_snapshot(&config);
        snap.gateway_probe = Some(HttpOutcome::Status(502));

        let d = oracle.evaluate(&snap);
        assert_eq!(d.symptoms.len(), 1);
        assert_eq!(d.symptoms[0].target, "api-gateway");
        assert_eq!(d.symptoms[0].kind, SymptomKind::ConfigError);
    }

    #[test]
    fn test_planner_prefers_restart_for_most_severe() {
        let config = MenderConfig::default();
        let planner = HeuristicPlanningOracle::new(&config);
        let d = Diagnosis::from_symptoms(
            vec![
                Symptom::new("product-service", SymptomKind::HighLatency, Severity::Medium, "slow"),
                Symptom::new("order-service", SymptomKind::ServiceDown, Severity::Critical, "exited"),
            ],
            "",
        );
        let plan = planner.choose(&d).unwrap();
        assert_eq!(plan.target, "order-service");
        assert_eq!(plan.action, ActionKind::Restart);
    }

    #[tokio::test]
    async fn test_planner_updates_gateway_config() {
        let config = MenderConfig::default();
        let planner = HeuristicPlanningOracle::new(&config);
        let d = Diagnosis::from_symptoms(
            vec![Symptom::new("api-gateway", SymptomKind::ConfigError, Severity::High, "502")],
            "",
        );
        let plan = planner.plan(&d, &PlanContext::default()).await.unwrap().unwrap();
        assert_eq!(plan.action, ActionKind::UpdateConfig);
        let content = plan.config_content.unwrap();
        assert!(content.contains("server order-service:5001;"));
        assert!(content.contains("location /api/payments"));

        let generated = planner.generate_config(&plan_for("order-service"), &PlanContext::default()).await;
        assert!(generated.is_err());
    }

    fn plan_for(target: &str) -> MitigationPlan {
        MitigationPlan::new(target, ActionKind::UpdateConfig, "x")
    }

    #[test]
    fn test_render_gateway_config() {
        let config = MenderConfig::default();
        let content = render_gateway_config(&config.targets, 80);
        assert!(content.contains("upstream product_service {"));
        assert!(content.contains("proxy_pass http://product_service/products;"));
        assert!(content.contains("listen 80 default_server;"));
        assert!(content.contains("location /nginx_status"));
        assert_eq!(content.matches('{').count(), content.matches('}').count());
    }
}
