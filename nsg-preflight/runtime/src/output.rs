use crate::remediate::RemediationOutcome;
use anyhow::Result;
use nsg_preflight_core::{
    remediation::RemediationRequest,
    report::{OutcomeStatus, ValidationReport},
};
use std::fmt::Write;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

// === impl OutputFormat ===

impl OutputFormat {
    pub fn report(&self, report: &ValidationReport) -> Result<String> {
        match self {
            Self::Plain => Ok(render_report(report)),
            Self::Json => Ok(serde_json::to_string_pretty(report)?),
        }
    }

    pub fn plan(&self, requests: &[RemediationRequest]) -> Result<String> {
        match self {
            Self::Plain => Ok(render_plan(requests)),
            Self::Json => Ok(serde_json::to_string_pretty(requests)?),
        }
    }

    pub fn remediation(&self, outcome: &RemediationOutcome) -> Result<String> {
        match self {
            Self::Plain => Ok(render_remediation(outcome)),
            Self::Json => Ok(serde_json::to_string_pretty(outcome)?),
        }
    }
}

fn render_report(report: &ValidationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Cluster {}: {} ({} passed, {} failed, {} warned)",
        report.cluster_id,
        report.status(),
        report.passed,
        report.failed,
        report.warned
    );

    if !report.backlog.is_empty() {
        out.push_str("\nMissing rules:\n");
        for outcome in &report.backlog {
            let _ = writeln!(out, "  [{}] {}", outcome.criticality(), outcome);
        }
    }

    if !report.unverified.is_empty() {
        out.push_str("\nUnverified (rules could not be listed):\n");
        for outcome in &report.unverified {
            if let OutcomeStatus::Unverified { error } = &outcome.status {
                let _ = writeln!(out, "  [{}] {}: {}", outcome.criticality(), outcome, error);
            }
        }
    }

    if !report.findings.is_empty() {
        out.push_str("\nPod networking:\n");
        for finding in &report.findings {
            let _ = writeln!(out, "  [{}] {}", finding.criticality, finding.message);
        }
    }

    if !report.skipped.is_empty() {
        out.push_str("\nSkipped requirements:\n");
        for skipped in &report.skipped {
            let _ = writeln!(out, "  {}: {}", skipped.label, skipped.reason);
        }
    }

    if !report.gaps.is_empty() {
        out.push_str("\nUnresolved topology:\n");
        for gap in &report.gaps {
            let _ = writeln!(out, "  {}: {}", gap.fact, gap.reason);
        }
    }

    out
}

fn render_plan(requests: &[RemediationRequest]) -> String {
    if requests.is_empty() {
        return "No rules to add.\n".to_string();
    }
    let mut out = format!("{} rule(s) to add:\n", requests.len());
    for request in requests {
        let _ = writeln!(out, "  {}", request);
    }
    out
}

fn render_remediation(outcome: &RemediationOutcome) -> String {
    let mut out = format!(
        "{} applied, {} already present, {} declined, {} failed\n",
        outcome.applied.len(),
        outcome.already_satisfied.len(),
        outcome.declined.len(),
        outcome.failed.len()
    );
    for failed in &outcome.failed {
        let _ = writeln!(out, "  {}: {}", failed.request, failed.error);
    }
    out
}
