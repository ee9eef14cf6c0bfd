//! Docker + HTTP prober backing the validation oracle

use crate::docker::DockerCli;
use async_trait::async_trait;
use mender_common::model::{ContainerState, HttpOutcome};
use mender_common::validation::Prober;
use std::time::Duration;
use tracing::warn;

/// GET a URL with a hard timeout. Never fails: transport errors become
/// `Unreachable` with a short reason.
pub async fn http_probe(client: &reqwest::Client, url: &str, timeout: Duration) -> HttpOutcome {
    match client.get(url).timeout(timeout).send().await {
        Ok(resp) => HttpOutcome::Status(resp.status().as_u16()),
        Err(e) if e.is_timeout() => {
            HttpOutcome::Unreachable(format!("timeout after {}s", timeout.as_secs()))
        }
        Err(e) if e.is_connect() => HttpOutcome::Unreachable("connection refused".to_string()),
        Err(e) => HttpOutcome::Unreachable(e.to_string().chars().take(80).collect()),
    }
}

pub struct DockerHttpProber {
    docker: DockerCli,
    http: reqwest::Client,
}

impl DockerHttpProber {
    pub fn new(docker: DockerCli, http: reqwest::Client) -> Self {
        Self { docker, http }
    }
}

#[async_trait]
impl Prober for DockerHttpProber {
    async fn container_state(&self, target: &str) -> ContainerState {
        match self.docker.state(target).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Cannot inspect {}: {:#}", target, e);
                ContainerState::Unknown
            }
        }
    }

    async fn http_get(&self, url: &str, timeout: Duration) -> HttpOutcome {
        http_probe(&self.http, url, timeout).await
    }
}
