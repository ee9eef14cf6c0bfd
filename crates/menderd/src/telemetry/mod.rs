//! HTTP/docker Telemetry Gateway
//!
//! Health comes from `docker inspect` plus each target's health endpoint,
//! probed concurrently. Metrics come from Prometheus, traces from Jaeger,
//! logs and resource usage from the docker CLI. A failing source never fails
//! the capture: it shows up as an unreachable health entry or an error note.

pub mod jaeger;
pub mod prometheus;

use crate::docker::DockerCli;
use crate::prober::http_probe;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use mender_common::config::{MenderConfig, TargetConfig, TelemetryConfig};
use mender_common::model::{ContainerState, ServiceMetrics, TargetHealth, TelemetrySnapshot};
use mender_common::telemetry::TelemetryGateway;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use jaeger::JaegerClient;
use prometheus::{render_metrics, PrometheusClient};

pub struct HttpTelemetryGateway {
    docker: DockerCli,
    http: reqwest::Client,
    prometheus: PrometheusClient,
    jaeger: JaegerClient,
    targets: Vec<TargetConfig>,
    settings: TelemetryConfig,
    gateway_probe_url: String,
    probe_timeout: Duration,
}

impl HttpTelemetryGateway {
    pub fn new(config: &MenderConfig, docker: DockerCli, http: reqwest::Client) -> Self {
        let settings = config.telemetry.clone();
        Self {
            prometheus: PrometheusClient::new(http.clone(), &settings.prometheus_url),
            jaeger: JaegerClient::new(http.clone(), &settings.jaeger_url, settings.trace_limit),
            docker,
            http,
            targets: config.targets.clone(),
            gateway_probe_url: config.validation.gateway_probe_url.clone(),
            probe_timeout: Duration::from_secs(config.validation.gateway_timeout_secs),
            settings,
        }
    }

    /// Container state and health endpoint for every target, concurrently.
    /// Results keep configuration order.
    async fn capture_health(&self) -> Vec<TargetHealth> {
        let mut set = JoinSet::new();
        for (idx, target) in self.targets.iter().cloned().enumerate() {
            let docker = self.docker.clone();
            let http = self.http.clone();
            let timeout = self.probe_timeout;
            set.spawn(async move { (idx, probe_target(&docker, &http, &target, timeout).await) });
        }

        let mut found: Vec<Option<TargetHealth>> = vec![None; self.targets.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, health)) => found[idx] = Some(health),
                Err(e) => warn!("Health probe task failed: {}", e),
            }
        }

        found
            .into_iter()
            .zip(&self.targets)
            .map(|(health, target)| {
                health.unwrap_or_else(|| TargetHealth::unreachable(&target.name, "probe task failed"))
            })
            .collect()
    }

    async fn capture_metrics(&self) -> (Vec<ServiceMetrics>, String) {
        let mut notes = Vec::new();
        let up = match self.prometheus.up_by_job().await {
            Ok(up) => up,
            Err(e) => {
                notes.push(format!("up query failed: {:#}", e));
                Default::default()
            }
        };

        let mut metrics = Vec::new();
        for target in self.targets.iter().filter(|t| t.is_service()) {
            let Some(prefix) = &target.metrics_prefix else {
                continue;
            };
            let (mut m, mut service_notes) = self.prometheus.service_metrics(&target.name, prefix).await;
            m.up = up.get(&target.name).or_else(|| up.get(prefix)).copied();
            notes.append(&mut service_notes);
            metrics.push(m);
        }

        let raw = render_metrics(&metrics, &notes);
        (metrics, raw)
    }
}

async fn probe_target(
    docker: &DockerCli,
    http: &reqwest::Client,
    target: &TargetConfig,
    timeout: Duration,
) -> TargetHealth {
    let state = match docker.state(&target.name).await {
        Ok(state) => state,
        Err(e) => return TargetHealth::unreachable(&target.name, format!("{:#}", e)),
    };
    let http_outcome = match (&target.health_url, state) {
        (Some(url), ContainerState::Running) => Some(http_probe(http, url, timeout).await),
        _ => None,
    };
    TargetHealth::observe(&target.name, state, http_outcome)
}

#[async_trait]
impl TelemetryGateway for HttpTelemetryGateway {
    async fn capture(&self) -> Result<TelemetrySnapshot> {
        debug!("Capturing telemetry for {} targets", self.targets.len());
        let captured_at = Utc::now();

        let (health, (metrics, mut metrics_raw), gateway_probe) = tokio::join!(
            self.capture_health(),
            self.capture_metrics(),
            http_probe(&self.http, &self.gateway_probe_url, self.probe_timeout),
        );

        let mut traces = BTreeMap::new();
        for target in self.targets.iter().filter(|t| t.is_service()) {
            traces.insert(target.name.clone(), self.jaeger.service_traces(&target.name).await);
        }

        let names = self
            .targets
            .iter()
            .map(|t| t.name.clone())
            .collect::<Vec<_>>();
        let logs = self.logs_for(&names).await?;

        let resources = match self.docker.stats(&names).await {
            Ok(r) => r,
            Err(e) => {
                metrics_raw.push_str(&format!("  ! resource usage unavailable: {:#}\n", e));
                Vec::new()
            }
        };

        Ok(TelemetrySnapshot {
            captured_at,
            health,
            metrics,
            metrics_raw,
            traces,
            logs,
            resources,
            gateway_probe: Some(gateway_probe),
        })
    }

    async fn logs_for(&self, targets: &[String]) -> Result<BTreeMap<String, String>> {
        let mut logs = BTreeMap::new();
        for target in targets {
            let tail = match self.docker.logs(target, self.settings.log_tail_lines).await {
                Ok(tail) => tail,
                Err(e) => format!("Error reading logs: {:#}", e),
            };
            logs.insert(target.clone(), tail);
        }
        Ok(logs)
    }
}
