//! Prometheus instant queries

use anyhow::{bail, Context, Result};
use mender_common::model::ServiceMetrics;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: HashMap<String, String>,
    /// `[timestamp, "value"]`
    pub value: (f64, String),
}

impl Sample {
    /// Sample value; NaN (empty histogram buckets) becomes None
    pub fn number(&self) -> Option<f64> {
        self.value.1.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

/// Parse a `/api/v1/query` response body into samples
pub fn parse_vector(body: &str) -> Result<Vec<Sample>> {
    let resp: QueryResponse = serde_json::from_str(body).context("invalid Prometheus response")?;
    if resp.status != "success" {
        bail!(
            "Prometheus query failed: {}",
            resp.error.unwrap_or_else(|| resp.status.clone())
        );
    }
    Ok(resp.data.map(|d| d.result).unwrap_or_default())
}

pub struct PrometheusClient {
    http: reqwest::Client,
    base_url: String,
}

impl PrometheusClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn query(&self, promql: &str) -> Result<Vec<Sample>> {
        let body = self
            .http
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", promql)])
            .send()
            .await
            .with_context(|| format!("querying {}", self.base_url))?
            .text()
            .await?;
        parse_vector(&body)
    }

    async fn scalar(&self, promql: &str) -> Result<Option<f64>> {
        Ok(self.query(promql).await?.first().and_then(Sample::number))
    }

    /// `up` per scrape job
    pub async fn up_by_job(&self) -> Result<HashMap<String, bool>> {
        Ok(self
            .query("up")
            .await?
            .iter()
            .filter_map(|s| {
                let job = s.metric.get("job")?.clone();
                Some((job, s.number() == Some(1.0)))
            })
            .collect())
    }

    /// Request rate, error share and latency quantiles for one service.
    ///
    /// Individual query failures leave the field empty and are reported in
    /// the returned notes.
    pub async fn service_metrics(&self, service: &str, prefix: &str) -> (ServiceMetrics, Vec<String>) {
        let mut notes = Vec::new();
        let mut metrics = ServiceMetrics {
            service: service.to_string(),
            ..Default::default()
        };

        let total = format!("sum(rate({}_requests_total[1m]))", prefix);
        match self.scalar(&total).await {
            Ok(rate) => metrics.request_rate = rate.unwrap_or(0.0),
            Err(e) => notes.push(format!("{}: request rate query failed: {:#}", service, e)),
        }

        if metrics.has_traffic() {
            let errors = format!(
                "sum(rate({}_requests_total{{status=~\"4..|5..\"}}[1m]))",
                prefix
            );
            match self.scalar(&errors).await {
                Ok(err_rate) => {
                    let err_rate = err_rate.unwrap_or(0.0);
                    metrics.error_rate_pct = Some(err_rate / metrics.request_rate * 100.0);
                }
                Err(e) => notes.push(format!("{}: error rate query failed: {:#}", service, e)),
            }
        }

        for (q, slot) in [
            ("0.5", &mut metrics.p50_ms),
            ("0.95", &mut metrics.p95_ms),
            ("0.99", &mut metrics.p99_ms),
        ] {
            let promql = format!(
                "histogram_quantile({}, sum(rate({}_request_duration_seconds_bucket[1m])) by (le))",
                q, prefix
            );
            match self.scalar(&promql).await {
                Ok(v) => *slot = v.map(|secs| secs * 1000.0),
                Err(e) => notes.push(format!("{}: p{} query failed: {:#}", service, q, e)),
            }
        }

        (metrics, notes)
    }
}

/// Human-readable metrics section of a snapshot
pub fn render_metrics(metrics: &[ServiceMetrics], notes: &[String]) -> String {
    let mut out = String::from("=== Service Metrics ===\n");
    for m in metrics {
        let up = match m.up {
            Some(true) => "UP",
            Some(false) => "DOWN",
            None => "?",
        };
        let _ = write!(out, "  {}: {} | {:.4} req/s", m.service, up, m.request_rate);
        if let Some(err) = m.error_rate_pct {
            let _ = write!(out, " | errors {:.2}%", err);
        }
        if let Some(p99) = m.p99_ms {
            let _ = write!(out, " | p99 {:.0}ms", p99);
        }
        out.push('\n');
    }
    for note in notes {
        let _ = writeln!(out, "  ! {}", note);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"job":"order-service"},"value":[1700000000.1,"1"]},
            {"metric":{"job":"payment-service"},"value":[1700000000.1,"0"]}]}}"#;
        let samples = parse_vector(body).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].metric["job"], "order-service");
        assert_eq!(samples[1].number(), Some(0.0));
    }

    #[test]
    fn test_parse_vector_nan_is_none() {
        let body = r#"{"status":"success","data":{"result":[{"metric":{},"value":[1.0,"NaN"]}]}}"#;
        let samples = parse_vector(body).unwrap();
        assert_eq!(samples[0].number(), None);
    }

    #[test]
    fn test_parse_vector_error() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let err = parse_vector(body).unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn test_render_metrics() {
        let m = ServiceMetrics {
            service: "order-service".into(),
            up: Some(false),
            request_rate: 0.0,
            ..Default::default()
        };
        let out = render_metrics(&[m], &["product-service: request rate query failed".into()]);
        assert!(out.contains("order-service: DOWN | 0.0000 req/s"));
        assert!(out.contains("! product-service"));
    }
}
