//! Telemetry Gateway trait abstraction
//!
//! The engine only sees `TelemetryGateway`. The daemon crate provides the
//! HTTP/docker implementation; tests use `FakeTelemetryGateway`.

use crate::model::TelemetrySnapshot;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Telemetry Gateway Trait
// ============================================================================

/// Source of health, metrics, trace and log data.
///
/// `capture` must not fail because one source is down: unreachable targets
/// become `unreachable` health entries and failed queries become error notes
/// in the raw sections. An `Err` means the gateway itself is unusable.
#[async_trait]
pub trait TelemetryGateway: Send + Sync {
    /// Capture a full snapshot
    async fn capture(&self) -> Result<TelemetrySnapshot>;

    /// Fresh log tails for the given targets
    async fn logs_for(&self, targets: &[String]) -> Result<BTreeMap<String, String>>;
}

// ============================================================================
// Fake Telemetry Gateway (Testing)
// ============================================================================

/// Fake gateway returning pre-configured snapshots in order.
///
/// Once the queue holds a single snapshot it is returned for every further
/// capture.
pub struct FakeTelemetryGateway {
    snapshots: Mutex<VecDeque<TelemetrySnapshot>>,
    logs: BTreeMap<String, String>,
    fail_with: Option<String>,
    delay: Option<Duration>,
    capture_count: Arc<Mutex<usize>>,
    log_requests: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeTelemetryGateway {
    pub fn new(snapshot: TelemetrySnapshot) -> Self {
        Self::sequence(vec![snapshot])
    }

    /// Snapshots returned by successive captures
    pub fn sequence(snapshots: Vec<TelemetrySnapshot>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            logs: BTreeMap::new(),
            fail_with: None,
            delay: None,
            capture_count: Arc::new(Mutex::new(0)),
            log_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Gateway whose every call fails
    pub fn failing(message: &str) -> Self {
        let mut fake = Self::sequence(Vec::new());
        fake.fail_with = Some(message.to_string());
        fake
    }

    pub fn with_log(mut self, target: &str, tail: &str) -> Self {
        self.logs.insert(target.to_string(), tail.to_string());
        self
    }

    /// Sleep before answering each capture
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn capture_count(&self) -> usize {
        *self.capture_count.lock().unwrap()
    }

    /// Target lists passed to `logs_for`, in call order
    pub fn log_requests(&self) -> Vec<Vec<String>> {
        self.log_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryGateway for FakeTelemetryGateway {
    async fn capture(&self) -> Result<TelemetrySnapshot> {
        *self.capture_count.lock().unwrap() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(msg) = &self.fail_with {
            return Err(anyhow!("{}", msg));
        }

        let mut queue = self.snapshots.lock().unwrap();
        let snapshot = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(snapshot.unwrap_or_else(TelemetrySnapshot::empty))
    }

    async fn logs_for(&self, targets: &[String]) -> Result<BTreeMap<String, String>> {
        self.log_requests.lock().unwrap().push(targets.to_vec());
        if let Some(msg) = &self.fail_with {
            return Err(anyhow!("{}", msg));
        }
        Ok(targets
            .iter()
            .map(|t| {
                let tail = self.logs.get(t).cloned().unwrap_or_default();
                (t.clone(), tail)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerState, TargetHealth};

    fn snapshot_with(target: &str, state: ContainerState) -> TelemetrySnapshot {
        let mut snap = TelemetrySnapshot::empty();
        snap.health.push(TargetHealth::observe(target, state, None));
        snap
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let fake = FakeTelemetryGateway::sequence(vec![
            snapshot_with("a", ContainerState::Exited),
            snapshot_with("a", ContainerState::Running),
        ]);

        let first = fake.capture().await.unwrap();
        let second = fake.capture().await.unwrap();
        let third = fake.capture().await.unwrap();

        assert_eq!(first.health[0].container, ContainerState::Exited);
        assert_eq!(second.health[0].container, ContainerState::Running);
        assert_eq!(third.health[0].container, ContainerState::Running);
        assert_eq!(fake.capture_count(), 3);
    }

    #[tokio::test]
    async fn test_logs_for_records_requests() {
        let fake = FakeTelemetryGateway::new(TelemetrySnapshot::empty())
            .with_log("order-service", "ERROR db timeout");

        let logs = fake
            .logs_for(&["order-service".to_string(), "api-gateway".to_string()])
            .await
            .unwrap();

        assert_eq!(logs["order-service"], "ERROR db timeout");
        assert_eq!(logs["api-gateway"], "");
        assert_eq!(fake.log_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_gateway() {
        let fake = FakeTelemetryGateway::failing("prometheus offline");
        assert!(fake.capture().await.is_err());
        assert_eq!(fake.capture_count(), 1);
    }
}
