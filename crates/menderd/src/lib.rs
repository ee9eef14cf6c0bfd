//! Mender Daemon - concrete backends for the remediation engine
//!
//! Docker CLI control, Prometheus/Jaeger telemetry, HTTP probing and the
//! optional Ollama oracles. `build_collaborators` wires them from config.

pub mod controller;
pub mod dashboard;
pub mod docker;
pub mod ollama;
pub mod prober;
pub mod telemetry;

use anyhow::{Context, Result};
use mender_common::config::{MenderConfig, OracleBackend};
use mender_common::heuristic::{HeuristicDiagnosticOracle, HeuristicPlanningOracle};
use mender_common::oracle::{DiagnosticOracle, PlanningOracle};
use mender_common::{Collaborators, EventBus, ValidationOracle, WorkflowEngine};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use controller::DockerController;
use docker::DockerCli;
use ollama::{OllamaClient, OllamaDiagnosticOracle, OllamaPlanningOracle};
use prober::DockerHttpProber;
use telemetry::HttpTelemetryGateway;

/// Diagnostic and planning oracles for the configured backend
pub fn build_oracles(config: &MenderConfig) -> (Arc<dyn DiagnosticOracle>, Arc<dyn PlanningOracle>) {
    match config.oracle.backend {
        OracleBackend::Heuristic => (
            Arc::new(HeuristicDiagnosticOracle::new(config)),
            Arc::new(HeuristicPlanningOracle::new(config)),
        ),
        OracleBackend::Ollama => {
            let client = Arc::new(OllamaClient::new(&config.oracle));
            info!("Using Ollama model {} at {}", config.oracle.model, config.oracle.ollama_url);
            (
                Arc::new(OllamaDiagnosticOracle::new(config, client.clone())),
                Arc::new(OllamaPlanningOracle::new(config, client)),
            )
        }
    }
}

/// Validation oracle probing through docker and HTTP
pub fn build_validator(config: &MenderConfig, docker: DockerCli, http: reqwest::Client) -> ValidationOracle {
    ValidationOracle::new(
        Arc::new(DockerHttpProber::new(docker, http)),
        config.targets.clone(),
        config.validation.clone(),
        config.workflow.settle_delay(),
    )
    .with_check_timeout(config.workflow.call_timeout())
}

/// Real collaborators for the configured target set
pub fn build_collaborators(config: &MenderConfig) -> Result<Collaborators> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.telemetry.request_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;
    let docker = DockerCli::new();
    let (diagnostic, planner) = build_oracles(config);

    Ok(Collaborators {
        telemetry: Arc::new(HttpTelemetryGateway::new(config, docker.clone(), http.clone())),
        diagnostic,
        planner,
        controller: Arc::new(DockerController::new(config, docker.clone())),
        validator: Arc::new(build_validator(config, docker, http)),
    })
}

pub fn build_engine(config: &MenderConfig, bus: Arc<EventBus>) -> Result<WorkflowEngine> {
    Ok(WorkflowEngine::new(config, build_collaborators(config)?, bus))
}
