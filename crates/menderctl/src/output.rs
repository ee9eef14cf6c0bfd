//! Terminal rendering for run reports, diagnoses and verdicts
//!
//! ASCII only. Renderers return strings so callers decide where they go.

use mender_common::{
    Diagnosis, EventType, RunReport, RunStatus, Severity, TelemetrySnapshot, TerminalState,
    ValidationVerdict, WorkflowEvent,
};
use owo_colors::OwoColorize;
use std::fmt::Write;

pub const SEPARATOR: &str = "------------------------------------------------------------";

/// One live event line, colored by event type
pub fn event_line(event: &WorkflowEvent) -> String {
    let line = event.format_line();
    match event.event_type {
        EventType::Error | EventType::CircuitBreaker => line.bright_red().to_string(),
        EventType::TnrRollback | EventType::Cancelled => line.yellow().to_string(),
        EventType::TnrCommit => line.bright_green().to_string(),
        EventType::LockAcquired | EventType::LockReleased => line.dimmed().to_string(),
        _ => line,
    }
}

fn status_tag(status: RunStatus) -> String {
    match status {
        RunStatus::Healthy => "[HEALTHY]".bright_green().to_string(),
        RunStatus::Degraded => "[DEGRADED]".yellow().to_string(),
        RunStatus::Critical => "[CRITICAL]".bright_red().to_string(),
        RunStatus::Unknown => "[UNKNOWN]".dimmed().to_string(),
    }
}

fn severity_tag(severity: Severity) -> String {
    let tag = format!("[{}]", severity);
    match severity {
        Severity::Critical | Severity::High => tag.bright_red().to_string(),
        Severity::Medium => tag.yellow().to_string(),
        Severity::Low => tag.dimmed().to_string(),
    }
}

fn terminal_line(terminal: TerminalState) -> String {
    match terminal {
        TerminalState::DoneHealthy => terminal.to_string().bright_green().to_string(),
        TerminalState::DoneCircuitOpen => terminal.to_string().bright_red().to_string(),
        TerminalState::Cancelled => terminal.to_string().yellow().to_string(),
    }
}

pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", SEPARATOR.dimmed());
    let _ = writeln!(out, "{}  Run {}", status_tag(report.status), report.run_id);
    let _ = writeln!(out, "{}", SEPARATOR.dimmed());
    let _ = writeln!(out, "Terminal state: {}", terminal_line(report.terminal));
    if let Some(note) = &report.unconfirmed {
        let _ = writeln!(out, "{} {}", "[UNCONFIRMED]".yellow(), note);
    }
    let _ = writeln!(out, "Attempts:       {}/{}", report.attempts, report.max_retries);
    let _ = writeln!(out, "Duration:       {}ms", report.duration_ms());
    if let Some(summary) = &report.diagnosis_summary {
        let _ = writeln!(out, "Diagnosis:      {}", summary);
    }
    if let Some(cause) = &report.root_cause {
        let _ = writeln!(out, "Root cause:     {}", cause);
    }
    if let Some(plan) = &report.plan {
        let _ = writeln!(out, "Plan:           {} on {}", plan.action, plan.target);
    }

    if !report.actions_log.is_empty() {
        let _ = writeln!(out, "\n[ACTIONS]");
        for entry in &report.actions_log {
            let _ = writeln!(out, "  * {}", entry);
        }
    }

    if let Some(verdict) = &report.last_verdict {
        let _ = writeln!(out, "\n[LAST VERDICT]");
        out.push_str(&render_verdict(verdict));
    }
    out
}

pub fn render_verdict(verdict: &ValidationVerdict) -> String {
    let mut out = String::new();
    for check in &verdict.checks {
        let mark = if check.passed {
            "PASS".bright_green().to_string()
        } else {
            "FAIL".bright_red().to_string()
        };
        let _ = writeln!(out, "  {} {} ({})", mark, check.name, check.detail);
    }
    let _ = writeln!(
        out,
        "  {}/{} checks passed",
        verdict.passed_count(),
        verdict.checks.len()
    );
    out
}

pub fn render_triage(snapshot: Option<&TelemetrySnapshot>, diagnosis: &Diagnosis) -> String {
    let mut out = String::new();
    match snapshot {
        Some(snapshot) => {
            let _ = writeln!(out, "[HEALTH] captured {}", snapshot.captured_at.format("%H:%M:%S"));
            for h in &snapshot.health {
                let line = h.line();
                if h.state.is_ok() {
                    let _ = writeln!(out, "  {}", line);
                } else {
                    let _ = writeln!(out, "  {}", line.bright_red());
                }
            }
            let _ = writeln!(out);
        }
        None => {
            let _ = writeln!(out, "[HEALTH] {}", "telemetry unavailable".bright_red());
        }
    }

    let _ = writeln!(
        out,
        "{}  {}",
        status_tag(diagnosis.overall_status.into()),
        diagnosis.summary
    );
    for s in &diagnosis.symptoms {
        let _ = writeln!(
            out,
            "  {} {} on {}: {}",
            severity_tag(s.severity),
            s.kind,
            s.target,
            s.evidence
        );
    }
    out
}
