//! Event bus - synchronous fan-out of workflow events
//!
//! `publish` delivers to every registered subscriber in registration order.
//! A subscriber that errors or panics is logged and skipped; the rest still
//! receive the event. No persistence: with no subscribers, events are dropped.

use crate::events::{EventType, WorkflowEvent};
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiver of workflow events
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs when delivery fails
    fn name(&self) -> &str;

    fn on_event(&self, event: &WorkflowEvent) -> Result<()>;
}

/// Explicitly constructed event bus, shared by `Arc`
pub struct EventBus {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn EventSubscriber>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.push((id, subscriber));
        id
    }

    /// Subscribe a closure
    pub fn subscribe_fn<F>(&self, name: &str, f: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnSubscriber {
            name: name.to_string(),
            f,
        }))
    }

    /// Remove a subscriber. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver an event to all current subscribers.
    ///
    /// Returns the number of subscribers that accepted the event.
    pub fn publish(&self, event: &WorkflowEvent) -> usize {
        // Snapshot so subscribers may (un)subscribe from inside a callback
        let subs: Vec<Arc<dyn EventSubscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, s)| Arc::clone(s))
            .collect();

        let mut delivered = 0;
        for sub in subs {
            match catch_unwind(AssertUnwindSafe(|| sub.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!("Event subscriber '{}' failed: {:#}", sub.name(), e);
                }
                Err(_) => {
                    warn!("Event subscriber '{}' panicked", sub.name());
                }
            }
        }
        delivered
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

struct FnSubscriber<F> {
    name: String,
    f: F,
}

impl<F> EventSubscriber for FnSubscriber<F>
where
    F: Fn(&WorkflowEvent) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &WorkflowEvent) -> Result<()> {
        (self.f)(event)
    }
}

// ============================================================================
// Built-in subscribers
// ============================================================================

/// Mirrors events into the tracing log
pub struct TracingSubscriber;

impl EventSubscriber for TracingSubscriber {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_event(&self, event: &WorkflowEvent) -> Result<()> {
        match event.event_type {
            EventType::Error | EventType::CircuitBreaker => {
                warn!(target: "mender::events", run = %event.run_id, "[{}] {}: {}", event.phase, event.actor, event.message)
            }
            _ => {
                info!(target: "mender::events", run = %event.run_id, "[{}] {}: {}", event.phase, event.actor, event.message)
            }
        }
        Ok(())
    }
}

/// Forwards events into a tokio channel for async consumers
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelSubscriber {
    pub fn new(tx: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        Self { tx }
    }

    /// Create a subscriber together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSubscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        "channel"
    }

    fn on_event(&self, event: &WorkflowEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow!("event receiver dropped"))
    }
}

/// Append-only JSONL event log
pub struct JsonlSubscriber {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSubscriber {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSubscriber for JsonlSubscriber {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn on_event(&self, event: &WorkflowEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Keeps every event in memory, for tests and run reports
#[derive(Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_event(&self, event: &WorkflowEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("recording lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Actor, Phase};
    use uuid::Uuid;

    fn event(msg: &str) -> WorkflowEvent {
        WorkflowEvent::new(Uuid::nil(), Phase::Triage, Actor::TriageAgent, EventType::Action, msg)
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&event("dropped")), 0);
    }

    #[test]
    fn test_failing_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let before = Arc::new(RecordingSubscriber::new());
        let after = Arc::new(RecordingSubscriber::new());

        bus.subscribe(before.clone());
        bus.subscribe_fn("broken", |_| Err(anyhow!("dashboard offline")));
        bus.subscribe_fn("panicky", |_| panic!("boom"));
        bus.subscribe(after.clone());

        let delivered = bus.publish(&event("hello"));
        assert_eq!(delivered, 2);
        assert_eq!(before.events().len(), 1);
        assert_eq!(after.events().len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let rec = Arc::new(RecordingSubscriber::new());
        let id = bus.subscribe(rec.clone());

        bus.publish(&event("one"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&event("two"));

        assert_eq!(rec.events().len(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_delivery_order_preserved() {
        let bus = EventBus::new();
        let rec = Arc::new(RecordingSubscriber::new());
        bus.subscribe(rec.clone());

        for i in 0..20 {
            bus.publish(&event(&format!("e{}", i)));
        }

        let messages: Vec<String> = rec.events().into_iter().map(|e| e.message).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("e{}", i)).collect();
        assert_eq!(messages, expected);
    }

    #[tokio::test]
    async fn test_channel_subscriber() {
        let bus = EventBus::new();
        let (sub, mut rx) = ChannelSubscriber::channel();
        bus.subscribe(Arc::new(sub));

        bus.publish(&event("streamed"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "streamed");

        drop(rx);
        assert_eq!(bus.publish(&event("nobody listening")), 0);
    }

    #[test]
    fn test_jsonl_subscriber_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let sub = JsonlSubscriber::open(&path).unwrap();

        sub.on_event(&event("first")).unwrap();
        sub.on_event(&event("second")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: WorkflowEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.message, "second");
    }
}
