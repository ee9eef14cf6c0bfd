//! Dashboard event forwarder
//!
//! Drains the bus channel and POSTs each event to `{url}/api/agent-log`.
//! The dashboard is best effort: delivery failures are logged at debug level
//! and never reach the engine.

use mender_common::events::{Actor, EventType, Phase, WorkflowEvent};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Body accepted by the dashboard's agent-log endpoint
#[derive(Debug, Serialize)]
pub struct AgentLogEntry {
    pub agent: Actor,
    pub message: String,
    pub phase: Phase,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

impl From<&WorkflowEvent> for AgentLogEntry {
    fn from(event: &WorkflowEvent) -> Self {
        Self {
            agent: event.actor,
            message: event.message.clone(),
            phase: event.phase,
            event_type: event.event_type,
            run_id: event.run_id,
            attempt: event.attempt,
        }
    }
}

/// Spawn the forwarding task. Ends when the channel closes or on cancellation.
pub fn spawn_forwarder(
    base_url: &str,
    mut rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let endpoint = format!("{}/api/agent-log", base_url.trim_end_matches('/'));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap_or_default();
    info!("Forwarding events to {}", endpoint);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            let entry = AgentLogEntry::from(&event);
            if let Err(e) = http.post(&endpoint).json(&entry).send().await {
                debug!("Dashboard unreachable: {}", e);
            }
        }
        debug!("Dashboard forwarder stopped");
    })
}
