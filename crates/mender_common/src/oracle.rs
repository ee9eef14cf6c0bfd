//! Diagnostic and Planning Oracle traits
//!
//! Oracles turn structured telemetry into structured decisions. How they
//! decide (rules, LLM) is opaque to the engine.

use crate::model::{Diagnosis, MitigationPlan, MitigationResult, TelemetrySnapshot};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Context handed to the planning oracle
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    /// Fresh log tails for the affected targets
    pub logs: BTreeMap<String, String>,
    /// Attempt about to be made, starting at 1
    pub attempt: u32,
    /// Results of earlier attempts in this run
    pub previous_results: Vec<MitigationResult>,
}

impl PlanContext {
    pub fn new(logs: BTreeMap<String, String>, attempt: u32) -> Self {
        Self {
            logs,
            attempt,
            previous_results: Vec::new(),
        }
    }

    pub fn with_previous(mut self, results: Vec<MitigationResult>) -> Self {
        self.previous_results = results;
        self
    }
}

/// Telemetry snapshot in, symptom list out
#[async_trait]
pub trait DiagnosticOracle: Send + Sync {
    async fn diagnose(&self, snapshot: &TelemetrySnapshot) -> Result<Diagnosis>;
}

/// Symptoms in, one mitigation plan out
#[async_trait]
pub trait PlanningOracle: Send + Sync {
    /// Called only with a non-empty symptom list. `None` means no action needed.
    async fn plan(&self, diagnosis: &Diagnosis, context: &PlanContext) -> Result<Option<MitigationPlan>>;

    /// Produce config text for an `update_config` plan that carries none
    async fn generate_config(&self, plan: &MitigationPlan, context: &PlanContext) -> Result<String>;
}

// ============================================================================
// Fakes (Testing)
// ============================================================================

/// Returns queued diagnoses in order, repeating the last one
pub struct FakeDiagnosticOracle {
    diagnoses: Mutex<VecDeque<Diagnosis>>,
    fail_with: Option<String>,
    call_count: Arc<Mutex<usize>>,
}

impl FakeDiagnosticOracle {
    pub fn new(diagnosis: Diagnosis) -> Self {
        Self::sequence(vec![diagnosis])
    }

    pub fn sequence(diagnoses: Vec<Diagnosis>) -> Self {
        Self {
            diagnoses: Mutex::new(diagnoses.into()),
            fail_with: None,
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut fake = Self::sequence(Vec::new());
        fake.fail_with = Some(message.to_string());
        fake
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl DiagnosticOracle for FakeDiagnosticOracle {
    async fn diagnose(&self, _snapshot: &TelemetrySnapshot) -> Result<Diagnosis> {
        *self.call_count.lock().unwrap() += 1;
        if let Some(msg) = &self.fail_with {
            return Err(anyhow!("{}", msg));
        }
        let mut queue = self.diagnoses.lock().unwrap();
        let diagnosis = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(diagnosis.unwrap_or_else(|| Diagnosis::healthy("no diagnosis configured")))
    }
}

/// Returns queued plans in order, repeating the last one
pub struct FakePlanningOracle {
    plans: Mutex<VecDeque<Option<MitigationPlan>>>,
    config: Option<String>,
    fail_with: Option<String>,
    plan_calls: Arc<Mutex<Vec<PlanContext>>>,
    config_calls: Arc<Mutex<usize>>,
}

impl FakePlanningOracle {
    pub fn new(plan: Option<MitigationPlan>) -> Self {
        Self::sequence(vec![plan])
    }

    pub fn sequence(plans: Vec<Option<MitigationPlan>>) -> Self {
        Self {
            plans: Mutex::new(plans.into()),
            config: None,
            fail_with: None,
            plan_calls: Arc::new(Mutex::new(Vec::new())),
            config_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut fake = Self::sequence(Vec::new());
        fake.fail_with = Some(message.to_string());
        fake
    }

    /// Config text returned by `generate_config`. Without it the call fails.
    pub fn with_generated_config(mut self, content: &str) -> Self {
        self.config = Some(content.to_string());
        self
    }

    pub fn plan_count(&self) -> usize {
        self.plan_calls.lock().unwrap().len()
    }

    /// Contexts passed to `plan`, in call order
    pub fn plan_contexts(&self) -> Vec<PlanContext> {
        self.plan_calls.lock().unwrap().clone()
    }

    pub fn config_count(&self) -> usize {
        *self.config_calls.lock().unwrap()
    }
}

#[async_trait]
impl PlanningOracle for FakePlanningOracle {
    async fn plan(&self, _diagnosis: &Diagnosis, context: &PlanContext) -> Result<Option<MitigationPlan>> {
        self.plan_calls.lock().unwrap().push(context.clone());
        if let Some(msg) = &self.fail_with {
            return Err(anyhow!("{}", msg));
        }
        let mut queue = self.plans.lock().unwrap();
        let plan = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(plan.flatten())
    }

    async fn generate_config(&self, _plan: &MitigationPlan, _context: &PlanContext) -> Result<String> {
        *self.config_calls.lock().unwrap() += 1;
        self.config
            .clone()
            .ok_or_else(|| anyhow!("no config configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, Severity, Symptom, SymptomKind};

    #[tokio::test]
    async fn test_fake_planner_sequence() {
        let plan = MitigationPlan::new("order-service", ActionKind::Restart, "crash");
        let fake = FakePlanningOracle::sequence(vec![Some(plan.clone()), None]);
        let diagnosis = Diagnosis::from_symptoms(
            vec![Symptom::new("order-service", SymptomKind::ServiceDown, Severity::Critical, "exited")],
            "down",
        );
        let ctx = PlanContext::new(BTreeMap::new(), 1);

        assert_eq!(fake.plan(&diagnosis, &ctx).await.unwrap(), Some(plan));
        assert_eq!(fake.plan(&diagnosis, &ctx).await.unwrap(), None);
        assert_eq!(fake.plan(&diagnosis, &ctx).await.unwrap(), None);
        assert_eq!(fake.plan_count(), 3);
    }

    #[tokio::test]
    async fn test_fake_generate_config() {
        let plan = MitigationPlan::new("api-gateway", ActionKind::UpdateConfig, "bad upstream");
        let ctx = PlanContext::default();

        let fake = FakePlanningOracle::new(None);
        assert!(fake.generate_config(&plan, &ctx).await.is_err());

        let fake = FakePlanningOracle::new(None).with_generated_config("events {}");
        assert_eq!(fake.generate_config(&plan, &ctx).await.unwrap(), "events {}");
        assert_eq!(fake.config_count(), 1);
    }

    #[tokio::test]
    async fn test_fake_diagnostic_failing() {
        let fake = FakeDiagnosticOracle::failing("model offline");
        assert!(fake.diagnose(&TelemetrySnapshot::empty()).await.is_err());
        assert_eq!(fake.call_count(), 1);
    }
}
