//! Target Controller trait abstraction
//!
//! Lifecycle and config deployment against managed targets. Implementations
//! own their backup discipline: `apply_config` snapshots before writing,
//! `rollback_config` restores the most recent snapshot.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of one controller operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerOutcome {
    pub success: bool,
    pub message: String,
}

impl ControllerOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Mutating operations on managed targets.
///
/// An `Ok` outcome with `success == false` is an expected operational failure.
/// `Err` is reserved for the controller being unusable (daemon socket gone).
#[async_trait]
pub trait TargetController: Send + Sync {
    async fn restart(&self, target: &str) -> Result<ControllerOutcome>;

    /// Snapshot prior config, write, syntax-test, reload. A failed syntax test
    /// reverts to the snapshot and reports failure.
    async fn apply_config(&self, target: &str, content: &str) -> Result<ControllerOutcome>;

    /// Restore the most recent snapshot. Fails when no backup exists.
    async fn rollback_config(&self, target: &str) -> Result<ControllerOutcome>;
}

// ============================================================================
// Fake Controller (Testing)
// ============================================================================

/// One recorded controller call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Restart(String),
    ApplyConfig { target: String, content: String },
    RollbackConfig(String),
}

impl ControllerCall {
    pub fn target(&self) -> &str {
        match self {
            Self::Restart(t) | Self::RollbackConfig(t) => t,
            Self::ApplyConfig { target, .. } => target,
        }
    }
}

/// Fake controller that records every call.
///
/// All operations succeed unless overridden per target. Rollback mirrors the
/// real backup rule: it fails unless `apply_config` succeeded on the target
/// first, or `with_existing_backup` was set.
pub struct FakeController {
    restart_outcomes: HashMap<String, ControllerOutcome>,
    apply_outcomes: HashMap<String, ControllerOutcome>,
    existing_backups: Arc<Mutex<Vec<String>>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<ControllerCall>>>,
}

impl FakeController {
    pub fn new() -> Self {
        Self {
            restart_outcomes: HashMap::new(),
            apply_outcomes: HashMap::new(),
            existing_backups: Arc::new(Mutex::new(Vec::new())),
            fail_with: None,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Controller whose every call returns `Err`
    pub fn failing(message: &str) -> Self {
        let mut fake = Self::new();
        fake.fail_with = Some(message.to_string());
        fake
    }

    pub fn restart_outcome(mut self, target: &str, outcome: ControllerOutcome) -> Self {
        self.restart_outcomes.insert(target.to_string(), outcome);
        self
    }

    pub fn apply_outcome(mut self, target: &str, outcome: ControllerOutcome) -> Self {
        self.apply_outcomes.insert(target.to_string(), outcome);
        self
    }

    /// Pretend a backup already exists for the target
    pub fn with_existing_backup(self, target: &str) -> Self {
        self.existing_backups.lock().unwrap().push(target.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn restart_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ControllerCall::Restart(_)))
            .count()
    }

    pub fn rollback_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ControllerCall::RollbackConfig(_)))
            .count()
    }

    async fn record(&self, call: ControllerCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_with {
            Some(msg) => Err(anyhow!("{}", msg)),
            None => Ok(()),
        }
    }
}

impl Default for FakeController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetController for FakeController {
    async fn restart(&self, target: &str) -> Result<ControllerOutcome> {
        self.record(ControllerCall::Restart(target.to_string())).await?;
        Ok(self
            .restart_outcomes
            .get(target)
            .cloned()
            .unwrap_or_else(|| ControllerOutcome::ok(format!("Restarted {}", target))))
    }

    async fn apply_config(&self, target: &str, content: &str) -> Result<ControllerOutcome> {
        self.record(ControllerCall::ApplyConfig {
            target: target.to_string(),
            content: content.to_string(),
        })
        .await?;

        let outcome = self
            .apply_outcomes
            .get(target)
            .cloned()
            .unwrap_or_else(|| ControllerOutcome::ok(format!("Config applied to {}", target)));
        if outcome.success {
            self.existing_backups.lock().unwrap().push(target.to_string());
        }
        Ok(outcome)
    }

    async fn rollback_config(&self, target: &str) -> Result<ControllerOutcome> {
        self.record(ControllerCall::RollbackConfig(target.to_string()))
            .await?;
        let has_backup = self
            .existing_backups
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == target);
        if has_backup {
            Ok(ControllerOutcome::ok(format!("Config of {} restored from backup", target)))
        } else {
            Ok(ControllerOutcome::failed(format!("No backup found for {}", target)))
        }
    }
}
