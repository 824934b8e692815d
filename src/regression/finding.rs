// Findings: the outcome of comparing one new measurement to its baseline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The measurement moved the wrong way past its threshold
    Regression,
    /// The measurement moved the right way past its threshold (reportable, not fatal)
    Improvement,
    /// No ratio could be computed (zero baseline, unit change)
    Indeterminate,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Regression => "regression",
            Severity::Improvement => "improvement",
            Severity::Indeterminate => "indeterminate",
        };
        f.write_str(label)
    }
}

/// One reportable comparison result for a `(suite, tool, name)` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub suite: String,
    pub tool: String,
    pub name: String,
    pub unit: String,

    /// Collapsed baseline window
    pub baseline_value: f64,
    pub new_value: f64,

    /// `new_value / baseline_value`; absent when indeterminate
    pub ratio: Option<f64>,
    pub severity: Severity,

    /// Number of prior values in the baseline window
    pub window_len: usize,

    /// Commit of the run being analyzed
    pub commit_id: String,

    /// Harness metadata of the new measurement, surfaced verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,

    /// Why the finding is indeterminate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Finding {
    /// Report ordering key: suite, then benchmark name, then tool
    pub fn sort_key(&self) -> (&str, &str, &str) {
        (&self.suite, &self.name, &self.tool)
    }

    /// Relative change in percent (`-95.3` for a 95.3% drop)
    pub fn change_percent(&self) -> Option<f64> {
        self.ratio.map(|r| (r - 1.0) * 100.0)
    }
}
