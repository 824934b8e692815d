//! Alert emitter: aggregate findings into one report for the CI caller
//!
//! [`emit`] is a pure transformation. Rendering (text, JSON, Markdown) is
//! separate so the caller decides what to do with the result: fail the
//! build, post a comment, or both.

use crate::regression::{Finding, Severity};
use crate::retention::PruneOutcome;
use serde::Serialize;
use std::fmt::Write as _;

/// A run payload that was rejected before it reached the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub suite: String,
    pub reason: String,
}

/// Aggregated outcome of one invocation across all processed suites
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub total_regressions: usize,
    pub total_improvements: usize,
    pub total_indeterminate: usize,

    /// Ordered by suite name, then benchmark name, then tool
    pub findings: Vec<Finding>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<Rejection>,

    /// Runs appended during this invocation
    pub ingested: usize,

    pub pruned: PruneOutcome,
}

/// Aggregate findings into a report
pub fn emit(findings: Vec<Finding>) -> Report {
    let mut findings = findings;
    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let count = |severity: Severity| findings.iter().filter(|f| f.severity == severity).count();

    Report {
        total_regressions: count(Severity::Regression),
        total_improvements: count(Severity::Improvement),
        total_indeterminate: count(Severity::Indeterminate),
        findings,
        ..Report::default()
    }
}

impl Report {
    pub fn with_rejections(mut self, rejected: Vec<Rejection>) -> Self {
        self.rejected = rejected;
        self
    }

    pub fn with_ingested(mut self, ingested: usize) -> Self {
        self.ingested = ingested;
        self
    }

    pub fn with_pruned(mut self, pruned: PruneOutcome) -> Self {
        self.pruned = pruned;
        self
    }

    pub fn has_regressions(&self) -> bool {
        self.total_regressions > 0
    }

    pub fn findings_with(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity == severity)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Generate human-readable report
    pub fn to_report_string(&self) -> String {
        let mut report = String::new();

        if self.has_regressions() {
            let _ = writeln!(
                report,
                "❌ REGRESSION DETECTED ({} benchmarks)\n",
                self.total_regressions
            );
        } else {
            report.push_str("✅ NO REGRESSION DETECTED\n\n");
        }

        let _ = writeln!(
            report,
            "Regressions: {}, improvements: {}, indeterminate: {}",
            self.total_regressions, self.total_improvements, self.total_indeterminate
        );
        if self.ingested > 0 {
            let _ = writeln!(report, "Runs ingested: {}", self.ingested);
        }
        if !self.pruned.is_empty() {
            let _ = writeln!(
                report,
                "Pruned: {} runs, {} measurements",
                self.pruned.runs_removed, self.pruned.measurements_removed
            );
        }

        for (severity, header) in [
            (Severity::Regression, "📉 Regressions"),
            (Severity::Improvement, "📈 Improvements"),
            (Severity::Indeterminate, "⚠️  Indeterminate"),
        ] {
            let mut section = self.findings_with(severity).peekable();
            if section.peek().is_none() {
                continue;
            }
            let _ = writeln!(report, "\n{header}:");
            for finding in section {
                let _ = writeln!(report, "  {}", describe(finding));
            }
        }

        if !self.rejected.is_empty() {
            let _ = writeln!(report, "\n🚫 Rejected runs ({}):", self.rejected.len());
            for rejection in &self.rejected {
                let _ = writeln!(report, "  [{}] {}", rejection.suite, rejection.reason);
            }
        }

        report
    }

    /// Markdown table suitable for a pull request or commit comment
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();

        if self.has_regressions() {
            let _ = writeln!(
                out,
                "# ⚠️ Performance Alert ⚠️\n\n{} benchmark(s) regressed past their threshold.\n",
                self.total_regressions
            );
        } else {
            out.push_str("# Benchmark Report\n\nNo regressions detected.\n\n");
        }

        if !self.findings.is_empty() {
            out.push_str("| Suite | Benchmark | Tool | Baseline | Current | Ratio | Result |\n");
            out.push_str("|---|---|---|---|---|---|---|\n");
            for f in &self.findings {
                let ratio = f
                    .ratio
                    .map(|r| format!("{r:.3}"))
                    .unwrap_or_else(|| "n/a".to_string());
                let _ = writeln!(
                    out,
                    "| {} | `{}` | {} | {} {} | {} {} | {} | {} |",
                    escape_cell(&f.suite),
                    f.name.replace('`', "'").replace('|', "\\|"),
                    escape_cell(&f.tool),
                    f.baseline_value,
                    escape_cell(&f.unit),
                    f.new_value,
                    escape_cell(&f.unit),
                    ratio,
                    f.severity
                );
            }
        }

        if !self.rejected.is_empty() {
            out.push_str("\n**Rejected runs**\n\n");
            for rejection in &self.rejected {
                let _ = writeln!(
                    out,
                    "- `{}`: {}",
                    rejection.suite.replace('`', "'"),
                    rejection.reason
                );
            }
        }

        out
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

fn describe(finding: &Finding) -> String {
    let mut line = format!(
        "[{}] {} ({}): {} {} -> {} {}",
        finding.suite,
        finding.name,
        finding.tool,
        finding.baseline_value,
        finding.unit,
        finding.new_value,
        finding.unit
    );
    if let Some(ratio) = finding.ratio {
        let _ = write!(line, " (ratio={ratio:.3})");
    }
    if let Some(reason) = &finding.reason {
        let _ = write!(line, " - {reason}");
    }
    line
}
