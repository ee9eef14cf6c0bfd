//! Error types for Mender.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MenderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// Broken engine invariant. Indicates a programming error, not a runtime condition.
    #[error("Engine invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MenderError {
    pub fn code(&self) -> i32 {
        match self {
            MenderError::Config(_) => -32010,
            MenderError::Telemetry(_) => -32011,
            MenderError::Oracle(_) => -32012,
            MenderError::Controller(_) => -32013,
            MenderError::Timeout { .. } => -32014,
            MenderError::Invariant(_) => -32603,
            MenderError::Io(_) => -32006,
            MenderError::Json(_) => -32700,
            MenderError::Toml(_) => -32701,
        }
    }

    /// Whether the run can absorb this error at a phase boundary
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MenderError::Invariant(_) | MenderError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, MenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = vec![
            MenderError::Config("x".into()),
            MenderError::Telemetry("x".into()),
            MenderError::Oracle("x".into()),
            MenderError::Controller("x".into()),
            MenderError::Timeout { operation: "x".into(), secs: 1 },
            MenderError::Invariant("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 6);
    }

    #[test]
    fn test_invariant_not_recoverable() {
        assert!(!MenderError::Invariant("plan without diagnosis".into()).is_recoverable());
        assert!(MenderError::Controller("restart failed".into()).is_recoverable());
    }

    #[test]
    fn test_timeout_display() {
        let err = MenderError::Timeout { operation: "telemetry capture".into(), secs: 30 };
        assert_eq!(err.to_string(), "telemetry capture timed out after 30s");
    }
}
