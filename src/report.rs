//! Report formatting
//!
//! Renders a [`ScoringResult`] as a plain-text report and re-reads the
//! summary lines of such a report.

use crate::error::ScreeningError;
use crate::types::{RiskLevel, ScoringResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

const TITLE: &str = "BIOMARKER RISK ASSESSMENT REPORT";
const TOTAL_PREFIX: &str = "Total Score:";
const LEVEL_PREFIX: &str = "Risk Level:";
const RULE: &str = "============================================================";

/// Renders scoring results for display
#[derive(Debug, Clone, Default)]
pub struct ReportFormatter {
    generated_at: Option<DateTime<Utc>>,
}

impl ReportFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the generation timestamp (defaults to the time of rendering)
    pub fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    /// Human-readable report
    pub fn render(&self, result: &ScoringResult) -> String {
        let generated_at = self.generated_at.unwrap_or_else(Utc::now);
        let mut out = String::new();
        if write_report(&mut out, result, generated_at).is_err() {
            warn!("report rendering stopped early");
        }
        out
    }

    /// Pretty JSON of the full result
    pub fn render_json(&self, result: &ScoringResult) -> Result<String, ScreeningError> {
        Ok(serde_json::to_string_pretty(result)?)
    }
}

/// Write the report body.
///
/// Scores use the shortest form that parses back to the same value.
fn write_report(
    out: &mut impl fmt::Write,
    result: &ScoringResult,
    generated_at: DateTime<Utc>,
) -> fmt::Result {
    writeln!(out, "{RULE}")?;
    writeln!(out, "{TITLE}")?;
    writeln!(out, "{RULE}")?;
    writeln!(out, "Generated: {}", generated_at.to_rfc3339())?;
    writeln!(out)?;
    writeln!(
        out,
        "{TOTAL_PREFIX} {} / {}",
        result.total_score, result.max_possible_score
    )?;
    writeln!(out, "{LEVEL_PREFIX} {}", result.risk_level)?;

    if !result.breakdown.is_empty() {
        writeln!(out)?;
        writeln!(out, "Task Breakdown:")?;
        for task in &result.breakdown {
            writeln!(
                out,
                "  [{}] {}: {} / {}",
                task.task_index + 1,
                task.task_name,
                task.score,
                task.max_score
            )?;
            for outcome in task.metrics.iter().filter(|m| m.fired) {
                writeln!(
                    out,
                    "      {} = {:.4} ({} {:.4})",
                    outcome.metric, outcome.value, outcome.rule, outcome.reference
                )?;
            }
            for missing in &task.missing {
                writeln!(out, "      missing: {missing}")?;
            }
        }
    }

    writeln!(out)?;
    writeln!(out, "Risk Indicators:")?;
    if result.indicators.is_empty() {
        writeln!(out, "  - None detected")?;
    }
    for indicator in &result.indicators {
        writeln!(out, "  - {indicator}")?;
    }

    if !result.recommendations.is_empty() {
        writeln!(out)?;
        writeln!(out, "Recommendations:")?;
        for (n, recommendation) in result.recommendations.iter().enumerate() {
            writeln!(out, "  {}. {recommendation}", n + 1)?;
        }
    }

    if !result.flags.is_empty() {
        let flags: Vec<String> = result
            .flags
            .iter()
            .filter_map(|f| serde_json::to_value(f).ok())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        writeln!(out)?;
        writeln!(out, "Flags: {}", flags.join(", "))?;
    }

    writeln!(out)?;
    writeln!(
        out,
        "This screening is informational and is not a medical diagnosis."
    )?;
    writeln!(out, "{RULE}")
}

/// Summary values recovered from a rendered report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_score: f64,
    pub max_possible_score: f64,
    pub risk_level: RiskLevel,
}

/// Re-read total, maximum and level from a text report
pub fn parse_summary(text: &str) -> Option<ReportSummary> {
    let mut scores = None;
    let mut level = None;

    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix(TOTAL_PREFIX) {
            let (total, max) = rest.split_once('/')?;
            scores = Some((total.trim().parse().ok()?, max.trim().parse().ok()?));
        } else if let Some(rest) = line.strip_prefix(LEVEL_PREFIX) {
            level = rest.parse().ok();
        }
    }

    let (total_score, max_possible_score) = scores?;
    Some(ReportSummary {
        total_score,
        max_possible_score,
        risk_level: level?,
    })
}
