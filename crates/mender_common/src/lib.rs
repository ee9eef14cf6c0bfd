//! Mender Common - remediation workflow core
//!
//! Data model, event bus, collaborator traits and the workflow engine.
//! Concrete backends (docker, Prometheus, Ollama) live in `menderd`.

pub mod bus;
pub mod circuit;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod heuristic;
pub mod lock;
pub mod model;
pub mod oracle;
pub mod telemetry;
pub mod validation;

pub use bus::{EventBus, EventSubscriber, SubscriptionId};
pub use config::MenderConfig;
pub use controller::{ControllerOutcome, TargetController};
pub use engine::{Collaborators, RunReport, TerminalState, WorkflowEngine};
pub use error::{MenderError, Result};
pub use events::{Actor, EventType, Phase, WorkflowEvent};
pub use model::*;
pub use oracle::{DiagnosticOracle, PlanContext, PlanningOracle};
pub use telemetry::TelemetryGateway;
pub use validation::{Prober, ValidationOracle};
