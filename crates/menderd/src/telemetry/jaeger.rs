//! Jaeger trace summaries

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug, Deserialize)]
struct TracesResponse {
    #[serde(default)]
    data: Vec<Trace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Trace {
    #[serde(rename = "traceID")]
    trace_id: String,
    #[serde(default)]
    spans: Vec<Span>,
    #[serde(default)]
    processes: HashMap<String, Process>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Span {
    #[serde(default)]
    operation_name: String,
    #[serde(rename = "processID", default)]
    process_id: String,
    /// Microseconds
    #[serde(default)]
    duration: u64,
    #[serde(default)]
    references: Vec<Value>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    logs: Vec<SpanLog>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    key: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct SpanLog {
    #[serde(default)]
    fields: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Process {
    #[serde(default)]
    service_name: String,
}

impl Span {
    fn is_error(&self) -> bool {
        self.tags
            .iter()
            .any(|t| t.key == "error" && (t.value == Value::Bool(true) || t.value == "true"))
    }

    fn error_messages(&self) -> Vec<String> {
        self.logs
            .iter()
            .flat_map(|l| l.fields.iter())
            .filter(|f| matches!(f.key.as_str(), "message" | "error" | "error.message"))
            .map(|f| match &f.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

impl Trace {
    fn service_of(&self, span: &Span) -> &str {
        self.processes
            .get(&span.process_id)
            .map(|p| p.service_name.as_str())
            .unwrap_or("unknown")
    }

    /// First 12 characters of the trace id
    fn short_id(&self) -> &str {
        match self.trace_id.char_indices().nth(12) {
            Some((end, _)) => &self.trace_id[..end],
            None => &self.trace_id,
        }
    }
}

/// Summarise recent traces: root operation, span count, duration, error flag
pub fn summarize_recent(body: &str, service: &str) -> Result<String> {
    let resp: TracesResponse = serde_json::from_str(body).context("invalid Jaeger response")?;
    if resp.data.is_empty() {
        return Ok(format!("No traces found for '{}' in last 1h", service));
    }

    let mut out = format!("Found {} traces for '{}':\n", resp.data.len(), service);
    for trace in &resp.data {
        let Some(root) = trace
            .spans
            .iter()
            .find(|s| s.references.is_empty())
            .or_else(|| trace.spans.first())
        else {
            continue;
        };
        let has_error = trace.spans.iter().any(Span::is_error);
        let _ = writeln!(
            out,
            "  [{}] {} | {} spans | {:.1}ms{}",
            trace.short_id(),
            root.operation_name,
            trace.spans.len(),
            root.duration as f64 / 1000.0,
            if has_error { " ERROR" } else { "" }
        );
    }
    Ok(out.trim_end().to_string())
}

/// Summarise error spans with their logged messages
pub fn summarize_errors(body: &str, service: &str, limit: usize) -> Result<String> {
    let resp: TracesResponse = serde_json::from_str(body).context("invalid Jaeger response")?;
    let error_traces: Vec<&Trace> = resp
        .data
        .iter()
        .filter(|t| t.spans.iter().any(Span::is_error))
        .take(limit)
        .collect();
    if error_traces.is_empty() {
        return Ok(format!("No error traces found for '{}'", service));
    }

    let mut out = format!("Found {} error traces for '{}':\n", error_traces.len(), service);
    for trace in error_traces {
        for span in trace.spans.iter().filter(|s| s.is_error()) {
            let messages = span.error_messages();
            let _ = writeln!(
                out,
                "  [{}] {}/{}: {:.1}ms, {}",
                trace.short_id(),
                trace.service_of(span),
                span.operation_name,
                span.duration as f64 / 1000.0,
                if messages.is_empty() {
                    "no error message".to_string()
                } else {
                    messages.join("; ")
                }
            );
        }
    }
    Ok(out.trim_end().to_string())
}

pub struct JaegerClient {
    http: reqwest::Client,
    base_url: String,
    limit: u32,
}

impl JaegerClient {
    pub fn new(http: reqwest::Client, base_url: &str, limit: u32) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit,
        }
    }

    async fn fetch(&self, params: &[(&str, String)]) -> Result<String> {
        Ok(self
            .http
            .get(format!("{}/api/traces", self.base_url))
            .query(params)
            .send()
            .await
            .with_context(|| format!("querying {}", self.base_url))?
            .text()
            .await?)
    }

    /// Recent and error trace summaries for one service
    pub async fn service_traces(&self, service: &str) -> String {
        let recent = self
            .fetch(&[
                ("service", service.to_string()),
                ("limit", self.limit.to_string()),
                ("lookback", "1h".to_string()),
            ])
            .await
            .and_then(|body| summarize_recent(&body, service));
        let errors = self
            .fetch(&[
                ("service", service.to_string()),
                ("limit", (self.limit * 3).to_string()),
                ("lookback", "1h".to_string()),
                ("tags", r#"{"error":"true"}"#.to_string()),
            ])
            .await
            .and_then(|body| summarize_errors(&body, service, self.limit as usize));

        let render = |r: Result<String>| r.unwrap_or_else(|e| format!("Error querying Jaeger: {:#}", e));
        format!("{}\n{}", render(recent), render(errors))
    }
}
