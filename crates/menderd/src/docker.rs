//! Docker CLI wrapper
//!
//! All container access goes through the `docker` binary so the daemon needs
//! no API client, only the socket permissions the CLI already has.

use anyhow::{Context, Result};
use mender_common::model::{ContainerState, ResourceUsage};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Output of `docker exec`
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stderr if present, else stdout, trimmed
    pub fn diagnostics(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<ExecOutput> {
        debug!("{} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {}", self.binary))?;

        Ok(ExecOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Container lifecycle state. A missing container is `NotFound`.
    pub async fn state(&self, container: &str) -> Result<ContainerState> {
        let out = self
            .run(&["inspect", "--format", "{{.State.Status}}", container])
            .await?;
        if !out.success() {
            if out.stderr.contains("No such") {
                return Ok(ContainerState::NotFound);
            }
            anyhow::bail!("docker inspect {}: {}", container, out.diagnostics());
        }
        Ok(ContainerState::parse(&out.stdout))
    }

    pub async fn restart(&self, container: &str) -> Result<ExecOutput> {
        self.run(&["restart", container]).await
    }

    /// Run a command inside a container
    pub async fn exec(&self, container: &str, command: &[&str]) -> Result<ExecOutput> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(command);
        self.run(&args).await
    }

    /// Run a shell snippet inside a container
    pub async fn exec_sh(&self, container: &str, script: &str) -> Result<ExecOutput> {
        self.exec(container, &["sh", "-c", script]).await
    }

    /// Last `tail` lines of combined stdout/stderr
    pub async fn logs(&self, container: &str, tail: u32) -> Result<String> {
        let tail = tail.to_string();
        let out = self.run(&["logs", "--tail", &tail, container]).await?;
        if !out.success() {
            anyhow::bail!("docker logs {}: {}", container, out.diagnostics());
        }
        // docker writes container stderr to our stderr
        Ok(format!("{}{}", out.stdout, out.stderr).trim().to_string())
    }

    /// One-shot resource usage for the given containers
    pub async fn stats(&self, containers: &[String]) -> Result<Vec<ResourceUsage>> {
        let mut args = vec![
            "stats",
            "--no-stream",
            "--format",
            "{{.Name}}\t{{.CPUPerc}}\t{{.MemPerc}}",
        ];
        args.extend(containers.iter().map(String::as_str));
        let out = self.run(&args).await?;
        if !out.success() {
            anyhow::bail!("docker stats: {}", out.diagnostics());
        }
        Ok(parse_stats(&out.stdout))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `docker stats` lines of the form `name\t12.5%\t40.1%`
pub fn parse_stats(output: &str) -> Vec<ResourceUsage> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let name = parts.next()?.trim();
            let cpu = parse_percent(parts.next()?)?;
            let mem = parse_percent(parts.next()?)?;
            if name.is_empty() {
                return None;
            }
            Some(ResourceUsage {
                target: name.to_string(),
                cpu_pct: cpu,
                memory_pct: mem,
            })
        })
        .collect()
}

fn parse_percent(field: &str) -> Option<f64> {
    field.trim().trim_end_matches('%').parse().ok()
}
