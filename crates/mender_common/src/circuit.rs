//! Retry budget circuit breaker for one workflow run

use crate::error::{MenderError, Result};

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Attempts may still be made
    Closed,
    /// Budget exhausted without recovery, terminal
    Open,
}

/// Counts mitigation attempts against a fixed budget.
///
/// Unlike a long-lived service breaker there is no half-open state: a run's
/// breaker opens once and stays open.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    attempts: u32,
    max_attempts: u32,
}

impl CircuitBreaker {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: CircuitState::Closed,
            attempts: 0,
            max_attempts,
        }
    }

    /// Start a new attempt, returning its 1-based number.
    ///
    /// Starting an attempt past the budget is an engine bug.
    pub fn begin_attempt(&mut self) -> Result<u32> {
        if self.state == CircuitState::Open || self.attempts >= self.max_attempts {
            return Err(MenderError::Invariant(format!(
                "attempt {} exceeds retry budget {}",
                self.attempts + 1,
                self.max_attempts
            )));
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// Record a failed attempt. Returns true if the circuit just opened.
    pub fn record_failure(&mut self) -> bool {
        if self.state == CircuitState::Closed && self.attempts >= self.max_attempts {
            self.state = CircuitState::Open;
            return true;
        }
        false
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn has_budget(&self) -> bool {
        !self.is_open() && self.attempts < self.max_attempts
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_opens_after_budget() {
        let mut cb = CircuitBreaker::new(3);
        assert_eq!(cb.state(), CircuitState::Closed);

        for expected in 1..=3 {
            assert_eq!(cb.begin_attempt().unwrap(), expected);
            let opened = cb.record_failure();
            assert_eq!(opened, expected == 3);
        }

        assert!(cb.is_open());
        assert!(!cb.has_budget());
        // Opening is reported once
        assert!(!cb.record_failure());
    }

    #[test]
    fn test_attempt_past_budget_is_invariant_violation() {
        let mut cb = CircuitBreaker::new(1);
        cb.begin_attempt().unwrap();
        assert!(matches!(cb.begin_attempt(), Err(MenderError::Invariant(_))));
        assert_eq!(cb.attempts(), 1);
    }

    #[test]
    fn test_budget_remaining() {
        let mut cb = CircuitBreaker::new(2);
        cb.begin_attempt().unwrap();
        assert!(!cb.record_failure());
        assert!(cb.has_budget());
        assert_eq!(cb.max_attempts(), 2);
    }
}
