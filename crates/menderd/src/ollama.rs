//! Ollama-backed oracles
//!
//! Diagnosis, planning and gateway config generation through the Ollama chat
//! API. Model output is parsed leniently: JSON is pulled out of surrounding
//! prose and unknown symptom kinds are dropped. Any call or parse failure
//! falls back to the heuristic oracles, so a flaky model never stalls a run.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use mender_common::config::{MenderConfig, OracleConfig, TargetConfig};
use mender_common::heuristic::{HeuristicDiagnosticOracle, HeuristicPlanningOracle};
use mender_common::model::{
    ActionKind, Diagnosis, MitigationPlan, Severity, Symptom, SymptomKind, TelemetrySnapshot,
};
use mender_common::oracle::{DiagnosticOracle, PlanContext, PlanningOracle};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Prompts
// ============================================================================

const DIAGNOSE_SYSTEM_PROMPT: &str = r#"You are an SRE agent analysing telemetry from a containerised microservice system.

Rules:
1. Zero requests per second is normal when there is no user traffic. It is not a symptom.
2. Report "high_error_rate" only when there is traffic and the error rate is above the threshold.
3. Report "service_down" only when a health check fails or Prometheus reports the target DOWN.
4. Report "high_latency" only when there is traffic and p99 latency is above the threshold.
5. Report "config_error" on the gateway when the gateway answers 5xx while upstreams are healthy.
6. When everything is healthy return an empty symptom list.

Reply with JSON only:
{
  "overall_status": "healthy|degraded|critical",
  "summary": "short description",
  "symptoms": [
    {"service": "exact target name",
     "symptom_type": "high_error_rate|high_latency|service_down|resource_exhaustion|connectivity_error|config_error",
     "severity": "low|medium|high|critical",
     "evidence": "concrete evidence"}
  ]
}"#;

const PLAN_SYSTEM_PROMPT: &str = r#"You are an SRE planner. Find the root cause and choose exactly one mitigation.

Actions:
- "restart_container": restart one container (least risky)
- "update_config": replace the gateway config (routing faults only)
- "rollback_config": restore the gateway config from its backup
- "no_action": nothing needs to change

Rules:
1. "target" must be one of the exact target names listed.
2. Prefer the least risky action: restart_container before update_config.
3. If an earlier attempt failed, do not repeat it unchanged.

Reply with JSON only:
{
  "root_cause": "...",
  "target": "exact target name",
  "action": "restart_container|update_config|rollback_config|no_action",
  "reasoning": "...",
  "expected_impact": "..."
}"#;

const CONFIG_SYSTEM_PROMPT: &str = r#"You write complete nginx.conf files for a reverse proxy gateway.
Output only the configuration file, no explanation. It must contain an events block
and an http block with one upstream per service and one location per route."#;

// ============================================================================
// Chat client
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

pub struct OllamaClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(settings: &OracleConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(settings.timeout_secs))
                .build()
                .unwrap_or_default(),
            url: settings.ollama_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One non-streaming chat turn. `json` asks Ollama to constrain output to JSON.
    pub async fn chat(&self, system: &str, user: &str, json: bool) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            stream: false,
            format: json.then_some("json"),
            options: ChatOptions { temperature: 0.1 },
        };

        debug!("[>] {} prompt ({} chars)", self.model, user.len());
        let response = self
            .http
            .post(format!("{}/api/chat", self.url))
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama returned error {}: {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;
        debug!("[<] {} response ({} chars)", self.model, chat.message.content.len());
        Ok(chat.message.content)
    }
}

// ============================================================================
// Parsing
// ============================================================================

static JSON_OBJECT: OnceLock<Option<Regex>> = OnceLock::new();
static FENCED_BLOCK: OnceLock<Option<Regex>> = OnceLock::new();

fn json_object_re() -> Option<&'static Regex> {
    JSON_OBJECT.get_or_init(|| Regex::new(r"(?s)\{.*\}").ok()).as_ref()
}

fn fenced_block_re() -> Option<&'static Regex> {
    FENCED_BLOCK
        .get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*\s*\n(.*?)```").ok())
        .as_ref()
}

/// First JSON object in `text`, tolerating prose or fences around it
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return v.is_object().then_some(v);
    }
    let candidate = json_object_re()?.find(text)?.as_str();
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

/// Body of a fenced code block if present, else the trimmed text
pub fn strip_fences(text: &str) -> String {
    let fenced = fenced_block_re()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    fenced.unwrap_or_else(|| text.to_string()).trim().to_string()
}

#[derive(Debug, Deserialize)]
struct RawSymptom {
    #[serde(alias = "service")]
    target: String,
    #[serde(alias = "symptom_type")]
    kind: SymptomKind,
    severity: Severity,
    #[serde(default)]
    evidence: String,
}

/// Diagnosis from model output. Symptoms naming unmanaged targets or unknown
/// kinds are dropped; overall status is derived from the kept symptoms.
pub fn parse_diagnosis(text: &str, managed: &[String]) -> Result<Diagnosis> {
    let v = extract_json(text).ok_or_else(|| anyhow!("no JSON object in model output"))?;
    let summary = v
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut symptoms = Vec::new();
    for raw in v.get("symptoms").and_then(Value::as_array).into_iter().flatten() {
        match serde_json::from_value::<RawSymptom>(raw.clone()) {
            Ok(s) if managed.contains(&s.target) => {
                symptoms.push(Symptom::new(&s.target, s.kind, s.severity, s.evidence));
            }
            Ok(s) => warn!("Dropping symptom for unmanaged target {}", s.target),
            Err(e) => warn!("Dropping malformed symptom: {}", e),
        }
    }
    Ok(Diagnosis::from_symptoms(symptoms, summary))
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    root_cause: String,
    #[serde(default)]
    target: String,
    action: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    expected_impact: String,
}

/// Plan from model output. `no_action` yields `None`.
pub fn parse_plan(text: &str) -> Result<Option<MitigationPlan>> {
    let v = extract_json(text).ok_or_else(|| anyhow!("no JSON object in model output"))?;
    let raw: RawPlan = serde_json::from_value(v).context("plan missing required fields")?;
    if raw.action == "no_action" {
        return Ok(None);
    }
    let action: ActionKind = serde_json::from_value(Value::String(raw.action.clone()))
        .map_err(|_| anyhow!("unknown action '{}'", raw.action))?;
    if raw.target.is_empty() {
        bail!("plan has no target");
    }
    Ok(Some(
        MitigationPlan::new(&raw.target, action, raw.root_cause)
            .with_reasoning(raw.reasoning)
            .with_impact(raw.expected_impact),
    ))
}

/// Generated gateway config, accepted only if it looks like a full nginx.conf
pub fn parse_config(text: &str) -> Result<String> {
    let config = strip_fences(text);
    if !(config.contains("events") && config.contains("http")) {
        bail!("generated config lacks events/http blocks");
    }
    Ok(config)
}

// ============================================================================
// Prompt rendering
// ============================================================================

fn render_telemetry(snapshot: &TelemetrySnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Health Check ===\n{}\n", snapshot.health_report());
    let _ = writeln!(out, "{}", snapshot.metrics_raw);
    let _ = writeln!(out, "=== Traces ===");
    for (service, traces) in &snapshot.traces {
        let _ = writeln!(out, "[{}]\n{}", service, traces);
    }
    let _ = writeln!(out, "\n=== Container Logs ===");
    for (target, logs) in &snapshot.logs {
        let _ = writeln!(out, "[{}]\n{}", target, logs);
    }
    out
}

fn render_plan_request(diagnosis: &Diagnosis, context: &PlanContext, targets: &[String]) -> String {
    let mut out = format!("Managed targets: {}\n\nSymptoms:\n", targets.join(", "));
    for s in &diagnosis.symptoms {
        let _ = writeln!(out, "- [{}] {} on {}: {}", s.severity, s.kind, s.target, s.evidence);
    }
    let _ = writeln!(out, "\nAttempt {}", context.attempt);
    for r in &context.previous_results {
        let _ = writeln!(
            out,
            "- earlier: {} {} -> {} ({})",
            r.action_taken,
            r.target,
            if r.success { "succeeded but did not heal" } else { "failed" },
            r.message
        );
    }
    let _ = writeln!(out, "\nRecent logs:");
    for (target, logs) in &context.logs {
        let _ = writeln!(out, "[{}]\n{}", target, logs);
    }
    out
}

fn render_config_request(plan: &MitigationPlan, targets: &[TargetConfig], listen_port: u16) -> String {
    let mut out = format!(
        "Root cause: {}\nListen port: {}\nRoutes:\n",
        plan.root_cause, listen_port
    );
    for t in targets {
        if let (Some(route), Some(upstream)) = (&t.route, &t.upstream) {
            let _ = writeln!(out, "- {} -> {} ({})", route, upstream, t.name);
        }
    }
    out
}

// ============================================================================
// Oracles
// ============================================================================

pub struct OllamaDiagnosticOracle {
    client: Arc<OllamaClient>,
    fallback: HeuristicDiagnosticOracle,
    managed: Vec<String>,
}

impl OllamaDiagnosticOracle {
    pub fn new(config: &MenderConfig, client: Arc<OllamaClient>) -> Self {
        Self {
            client,
            fallback: HeuristicDiagnosticOracle::new(config),
            managed: config.target_names(),
        }
    }
}

#[async_trait]
impl DiagnosticOracle for OllamaDiagnosticOracle {
    async fn diagnose(&self, snapshot: &TelemetrySnapshot) -> Result<Diagnosis> {
        let attempt = async {
            let text = self
                .client
                .chat(DIAGNOSE_SYSTEM_PROMPT, &render_telemetry(snapshot), true)
                .await?;
            parse_diagnosis(&text, &self.managed)
        };
        match attempt.await {
            Ok(diagnosis) => {
                info!("{} diagnosed {} symptom(s)", self.client.model(), diagnosis.symptoms.len());
                Ok(diagnosis)
            }
            Err(e) => {
                warn!("Model diagnosis failed, using heuristic rules: {:#}", e);
                Ok(self.fallback.evaluate(snapshot))
            }
        }
    }
}

pub struct OllamaPlanningOracle {
    client: Arc<OllamaClient>,
    fallback: HeuristicPlanningOracle,
    targets: Vec<TargetConfig>,
    listen_port: u16,
}

impl OllamaPlanningOracle {
    pub fn new(config: &MenderConfig, client: Arc<OllamaClient>) -> Self {
        Self {
            client,
            fallback: HeuristicPlanningOracle::new(config),
            targets: config.targets.clone(),
            listen_port: config.gateway.listen_port,
        }
    }

    fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name.clone()).collect()
    }
}

#[async_trait]
impl PlanningOracle for OllamaPlanningOracle {
    async fn plan(&self, diagnosis: &Diagnosis, context: &PlanContext) -> Result<Option<MitigationPlan>> {
        let request = render_plan_request(diagnosis, context, &self.target_names());
        let attempt = async {
            let text = self.client.chat(PLAN_SYSTEM_PROMPT, &request, true).await?;
            parse_plan(&text)
        };
        match attempt.await {
            Ok(plan) => Ok(plan),
            Err(e) => {
                warn!("Model planning failed, using heuristic rules: {:#}", e);
                self.fallback.plan(diagnosis, context).await
            }
        }
    }

    async fn generate_config(&self, plan: &MitigationPlan, context: &PlanContext) -> Result<String> {
        let request = render_config_request(plan, &self.targets, self.listen_port);
        let attempt = async {
            let text = self.client.chat(CONFIG_SYSTEM_PROMPT, &request, false).await?;
            parse_config(&text)
        };
        match attempt.await {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Model config generation failed, using template: {:#}", e);
                self.fallback.generate_config(plan, context).await
            }
        }
    }
}
