//! Docker target controller
//!
//! Restarts containers and deploys gateway config through `docker exec`:
//! backup copy, base64 write, syntax test, reload. A failed syntax test
//! restores the backup before reporting failure.

use crate::docker::DockerCli;
use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mender_common::config::{GatewayConfig, MenderConfig};
use mender_common::controller::{ControllerOutcome, TargetController};
use tracing::{info, warn};

pub struct DockerController {
    docker: DockerCli,
    gateway_target: Option<String>,
    gateway: GatewayConfig,
}

impl DockerController {
    pub fn new(config: &MenderConfig, docker: DockerCli) -> Self {
        Self {
            docker,
            gateway_target: config.gateway_target().map(|t| t.name.clone()),
            gateway: config.gateway.clone(),
        }
    }

    fn manages_config(&self, target: &str) -> bool {
        self.gateway_target.as_deref() == Some(target)
    }

    async fn exec_command(&self, target: &str, command: &str) -> Result<crate::docker::ExecOutput> {
        let args: Vec<&str> = command.split_whitespace().collect();
        self.docker.exec(target, &args).await
    }
}

#[async_trait]
impl TargetController for DockerController {
    async fn restart(&self, target: &str) -> Result<ControllerOutcome> {
        info!("Restarting container {}", target);
        let out = self.docker.restart(target).await?;
        if out.success() {
            Ok(ControllerOutcome::ok(format!("Restarted {}", target)))
        } else {
            Ok(ControllerOutcome::failed(format!(
                "Restart of {} failed: {}",
                target,
                out.diagnostics()
            )))
        }
    }

    async fn apply_config(&self, target: &str, content: &str) -> Result<ControllerOutcome> {
        if !self.manages_config(target) {
            return Ok(ControllerOutcome::failed(format!(
                "Config deployment is not supported for {}",
                target
            )));
        }
        let path = &self.gateway.config_path;
        let backup = self.gateway.backup_path();

        let out = self
            .docker
            .exec_sh(target, &format!("cp {} {}", path, backup))
            .await?;
        if !out.success() {
            return Ok(ControllerOutcome::failed(format!("Backup failed: {}", out.diagnostics())));
        }

        let encoded = STANDARD.encode(content.as_bytes());
        let out = self
            .docker
            .exec_sh(target, &format!("echo {} | base64 -d > {}", encoded, path))
            .await?;
        if !out.success() {
            return Ok(ControllerOutcome::failed(format!("Write failed: {}", out.diagnostics())));
        }

        let test = self.exec_command(target, &self.gateway.test_command).await?;
        if !test.success() {
            warn!("Config test failed on {}, restoring backup", target);
            self.docker
                .exec_sh(target, &format!("cp {} {}", backup, path))
                .await?;
            return Ok(ControllerOutcome::failed(format!(
                "Config test failed, previous config restored: {}",
                test.diagnostics()
            )));
        }

        let reload = self.exec_command(target, &self.gateway.reload_command).await?;
        if !reload.success() {
            return Ok(ControllerOutcome::failed(format!(
                "Reload failed: {}",
                reload.diagnostics()
            )));
        }

        info!("Applied new config to {}", target);
        Ok(ControllerOutcome::ok(format!(
            "Config applied to {} and reloaded (backup at {})",
            target, backup
        )))
    }

    async fn rollback_config(&self, target: &str) -> Result<ControllerOutcome> {
        if !self.manages_config(target) {
            return Ok(ControllerOutcome::failed(format!("No config backup for {}", target)));
        }
        let path = &self.gateway.config_path;
        let backup = self.gateway.backup_path();

        let exists = self.docker.exec(target, &["test", "-f", &backup]).await?;
        if !exists.success() {
            return Ok(ControllerOutcome::failed(format!("No backup found at {}", backup)));
        }

        let out = self
            .docker
            .exec_sh(target, &format!("cp {} {}", backup, path))
            .await?;
        if !out.success() {
            return Ok(ControllerOutcome::failed(format!("Restore failed: {}", out.diagnostics())));
        }

        let restart = self.docker.restart(target).await?;
        if !restart.success() {
            return Ok(ControllerOutcome::failed(format!(
                "Config restored but restart failed: {}",
                restart.diagnostics()
            )));
        }
        info!("Rolled back config of {}", target);
        Ok(ControllerOutcome::ok(format!(
            "Config of {} restored from backup and restarted",
            target
        )))
    }
}
