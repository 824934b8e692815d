//! Ledger data model: suites, runs and individual benchmark measurements
//!
//! The persisted ledger is one JSON document keyed by suite name. Each suite
//! holds its runs in ingestion order. Runs are shared as `Arc<Run>` once
//! appended and are never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Full persisted collection of suites and their run histories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    /// Epoch milliseconds of the last committed write
    #[serde(default)]
    pub last_update: u64,

    /// Repository the ledger tracks (informational, surfaced verbatim)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    /// Suite name → runs in ingestion order
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<Arc<Run>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs of `suite` in ingestion order (empty for an unknown suite)
    pub fn runs(&self, suite: &str) -> &[Arc<Run>] {
        self.entries.get(suite).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of runs across all suites
    pub fn run_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Latest `date` of any stored run
    pub fn max_run_date(&self) -> Option<u64> {
        self.entries
            .values()
            .flat_map(|runs| runs.iter().map(|run| run.date))
            .max()
    }
}

/// Commit reference attached to a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,

    /// RFC 3339 commit timestamp as reported by the CI system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Any other commit metadata (author, message, url, ...), kept opaque
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Commit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// One ingestion event (one CI build's results) for a suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub commit: Commit,

    /// Ingest timestamp in epoch milliseconds
    pub date: u64,

    /// Measurement harness identifier (e.g. "jmh", "cargo")
    pub tool: String,

    /// Measurements in the order the harness reported them
    pub benches: Vec<BenchResult>,
}

impl Run {
    pub fn new(commit: Commit, date: u64, tool: impl Into<String>) -> Self {
        Self {
            commit,
            date,
            tool: tool.into(),
            benches: Vec::new(),
        }
    }

    pub fn with_bench(mut self, bench: BenchResult) -> Self {
        self.benches.push(bench);
        self
    }

    /// Distinct units observed in this run, sorted
    pub fn units(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self.benches.iter().map(|b| b.unit.as_str()).collect();
        units.sort_unstable();
        units.dedup();
        units
    }
}

/// One named measurement within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchResult {
    /// Opaque comparison key; may embed a parameter string
    pub name: String,
    pub value: f64,
    pub unit: String,

    /// Free-form harness metadata, only surfaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,

    /// Harness-reported spread (e.g. "± 1.2%"), only surfaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

impl BenchResult {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
            extra: None,
            range: None,
        }
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    /// Typed view over the known `key: value` lines of `extra`
    pub fn extra_metadata(&self) -> Result<ExtraMetadata, String> {
        match &self.extra {
            Some(extra) => ExtraMetadata::parse(extra),
            None => Ok(ExtraMetadata::default()),
        }
    }
}

/// Known sub-keys of a harness `extra` blob
///
/// JMH style harnesses report lines such as:
/// ```text
/// iterations: 5
/// forks: 1
/// threads: 1
/// ```
/// Unknown lines are ignored. A known key with a non-positive-integer value is an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtraMetadata {
    pub iterations: Option<u64>,
    pub forks: Option<u64>,
    pub threads: Option<u64>,
}

impl ExtraMetadata {
    pub fn parse(extra: &str) -> Result<Self, String> {
        let mut meta = Self::default();

        for line in extra.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let slot = match key.trim().to_ascii_lowercase().as_str() {
                "iterations" => &mut meta.iterations,
                "forks" => &mut meta.forks,
                "threads" => &mut meta.threads,
                _ => continue,
            };
            let value = value.trim();
            match value.parse::<u64>() {
                Ok(n) if n > 0 => *slot = Some(n),
                _ => {
                    return Err(format!(
                        "extra key '{}' must be a positive integer, got '{}'",
                        key.trim(),
                        value
                    ))
                }
            }
        }

        Ok(meta)
    }
}

/// Handle returned by a committed append
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId {
    pub suite: String,
    /// Zero-based position in the suite at append time
    pub position: usize,
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.suite, self.position)
    }
}

/// One point of a `(suite, tool, name)` series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: u64,
    pub value: f64,
    pub unit: String,
    pub commit_id: String,
}
