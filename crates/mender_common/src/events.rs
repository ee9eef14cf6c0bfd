//! Workflow progress events.
//!
//! Structured events emitted at every phase transition. The JSON shape is the
//! stable contract for dashboards and log shippers:
//!
//! ```json
//! {"timestamp":"...","run_id":"...","phase":"mitigate","actor":"mitigation_agent",
//!  "message":"A-Lock acquired (attempt 1/3)","event_type":"lock_acquired","attempt":1}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow phase an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Triage,
    Plan,
    Mitigate,
    Verify,
    Undo,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Triage => write!(f, "triage"),
            Self::Plan => write!(f, "plan"),
            Self::Mitigate => write!(f, "mitigate"),
            Self::Verify => write!(f, "verify"),
            Self::Undo => write!(f, "undo"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Component that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    TriageAgent,
    PlannerAgent,
    MitigationAgent,
    ValidationOracle,
    UndoAgent,
    Engine,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TriageAgent => write!(f, "TriageAgent"),
            Self::PlannerAgent => write!(f, "PlannerAgent"),
            Self::MitigationAgent => write!(f, "MitigationAgent"),
            Self::ValidationOracle => write!(f, "ValidationOracle"),
            Self::UndoAgent => write!(f, "UndoAgent"),
            Self::Engine => write!(f, "Engine"),
        }
    }
}

/// Type of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Action,
    Telemetry,
    Reasoning,
    Conclusion,
    LockAcquired,
    LockReleased,
    TnrBackup,
    TnrApply,
    TnrCommit,
    TnrRollback,
    Oracle,
    CircuitBreaker,
    Error,
    /// Terminal event of a run stopped by external cancellation
    Cancelled,
}

/// Progress event during a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub phase: Phase,
    pub actor: Actor,
    pub message: String,
    pub event_type: EventType,
    /// Mitigation attempt the event belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl WorkflowEvent {
    pub fn new(
        run_id: Uuid,
        phase: Phase,
        actor: Actor,
        event_type: EventType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            phase,
            actor,
            message: message.into(),
            event_type,
            attempt: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Format for terminal display
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.phase,
            self.actor,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::LockAcquired).unwrap();
        assert_eq!(json, r#""lock_acquired""#);
        let json = serde_json::to_string(&EventType::TnrRollback).unwrap();
        assert_eq!(json, r#""tnr_rollback""#);
        let json = serde_json::to_string(&EventType::CircuitBreaker).unwrap();
        assert_eq!(json, r#""circuit_breaker""#);
    }

    #[test]
    fn test_event_json_shape() {
        let event = WorkflowEvent::new(
            Uuid::nil(),
            Phase::Mitigate,
            Actor::MitigationAgent,
            EventType::TnrBackup,
            "backup",
        );
        let value = serde_json::to_value(&event).unwrap();
        for key in ["timestamp", "run_id", "phase", "actor", "message", "event_type"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert!(value.get("attempt").is_none());
        assert_eq!(value["phase"], "mitigate");
        assert_eq!(value["actor"], "mitigation_agent");

        let value = serde_json::to_value(event.with_attempt(2)).unwrap();
        assert_eq!(value["attempt"], 2);
    }

    #[test]
    fn test_format_line() {
        let event = WorkflowEvent::new(
            Uuid::nil(),
            Phase::Verify,
            Actor::ValidationOracle,
            EventType::Oracle,
            "Gateway Probe: PASS",
        );
        let line = event.format_line();
        assert!(line.contains("[verify] ValidationOracle: Gateway Probe: PASS"));
    }
}
