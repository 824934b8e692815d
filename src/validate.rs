//! Schema validation for incoming run payloads
//!
//! `RawRun` mirrors one element of a suite's run array with every field
//! optional, so that malformed payloads still deserialize and every violation
//! can be reported at once. `validate` turns it into a typed [`Run`] or a
//! [`ValidationError`]. It is a pure function.

use crate::model::{BenchResult, Commit, ExtraMetadata, Run};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Largest accepted `date`: 9999-12-31T23:59:59.999Z in epoch milliseconds
pub const MAX_EPOCH_MILLIS: u64 = 253_402_300_799_999;

/// Reasons a run payload is rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("suite name must not be empty")]
    EmptySuite,

    #[error("missing commit reference")]
    MissingCommit,

    #[error("commit id must not be empty")]
    EmptyCommitId,

    #[error("commit timestamp '{0}' is not a valid RFC 3339 timestamp")]
    InvalidCommitTimestamp(String),

    #[error("missing run date")]
    MissingDate,

    #[error("run date {0} is not a valid epoch-millisecond timestamp")]
    InvalidDate(String),

    #[error("tool must not be empty")]
    MissingTool,

    #[error("run must contain at least one measurement")]
    NoMeasurements,

    #[error("measurement #{index}: name must not be empty")]
    MissingName { index: usize },

    #[error("measurement #{index} ({name}): missing value")]
    MissingValue { index: usize, name: String },

    #[error("measurement #{index} ({name}): value {value} is not a finite number")]
    InvalidValue {
        index: usize,
        name: String,
        value: String,
    },

    #[error("measurement #{index} ({name}): value without unit")]
    MissingUnit { index: usize, name: String },

    #[error("measurement #{index} ({name}): {reason}")]
    InvalidExtra {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("malformed run payload: {0}")]
    Malformed(String),

    #[error("{} schema violations: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Flattened list of individual violations
    pub fn violations(&self) -> Vec<&ValidationError> {
        match self {
            ValidationError::Multiple(errors) => errors.iter().collect(),
            other => vec![other],
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Loosely-typed commit reference as received on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCommit {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Loosely-typed measurement as received on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBench {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub extra: Option<String>,
    #[serde(default)]
    pub range: Option<String>,
}

/// Loosely-typed run payload (one element of a suite's run array)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRun {
    #[serde(default)]
    pub commit: Option<RawCommit>,
    #[serde(default)]
    pub date: Option<serde_json::Value>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub benches: Option<Vec<RawBench>>,
}

impl RawRun {
    /// Parse a JSON run payload without validating it
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

impl From<&Run> for RawRun {
    fn from(run: &Run) -> Self {
        Self {
            commit: Some(RawCommit {
                id: Some(run.commit.id.clone()),
                timestamp: run.commit.timestamp.clone(),
                metadata: run.commit.metadata.clone(),
            }),
            date: Some(serde_json::Value::from(run.date)),
            tool: Some(run.tool.clone()),
            benches: Some(
                run.benches
                    .iter()
                    .map(|b| RawBench {
                        name: Some(b.name.clone()),
                        value: Some(serde_json::Value::from(b.value)),
                        unit: Some(b.unit.clone()),
                        extra: b.extra.clone(),
                        range: b.range.clone(),
                    })
                    .collect(),
            ),
        }
    }
}

/// Validate a raw run destined for `suite`
///
/// Duplicate measurement names within one run are accepted: a harness may
/// report the same logical benchmark under several parameterizations.
pub fn validate(suite: &str, raw: &RawRun) -> Result<Run, ValidationError> {
    let mut errors = Vec::new();

    if suite.trim().is_empty() {
        errors.push(ValidationError::EmptySuite);
    }

    let commit = match &raw.commit {
        None => {
            errors.push(ValidationError::MissingCommit);
            None
        }
        Some(raw_commit) => validate_commit(raw_commit, &mut errors),
    };

    let date = match &raw.date {
        None => {
            errors.push(ValidationError::MissingDate);
            None
        }
        Some(value) => match epoch_millis(value) {
            Some(date) => Some(date),
            None => {
                errors.push(ValidationError::InvalidDate(value.to_string()));
                None
            }
        },
    };

    let tool = match raw.tool.as_deref().map(str::trim) {
        Some(tool) if !tool.is_empty() => Some(tool.to_string()),
        _ => {
            errors.push(ValidationError::MissingTool);
            None
        }
    };

    let benches = match raw.benches.as_deref() {
        None | Some([]) => {
            errors.push(ValidationError::NoMeasurements);
            Vec::new()
        }
        Some(raw_benches) => raw_benches
            .iter()
            .enumerate()
            .filter_map(|(index, bench)| validate_bench(index, bench, &mut errors))
            .collect(),
    };

    match (commit, date, tool) {
        (Some(commit), Some(date), Some(tool)) if errors.is_empty() => Ok(Run {
            commit,
            date,
            tool,
            benches,
        }),
        _ => Err(collapse(errors)),
    }
}

fn collapse(mut errors: Vec<ValidationError>) -> ValidationError {
    if errors.len() == 1 {
        errors.remove(0)
    } else {
        ValidationError::Multiple(errors)
    }
}

fn validate_commit(raw: &RawCommit, errors: &mut Vec<ValidationError>) -> Option<Commit> {
    let mut valid = true;

    let id = raw.id.as_deref().map(str::trim).unwrap_or_default();
    if id.is_empty() {
        errors.push(ValidationError::EmptyCommitId);
        valid = false;
    }

    if let Some(timestamp) = &raw.timestamp {
        if chrono::DateTime::parse_from_rfc3339(timestamp).is_err() {
            errors.push(ValidationError::InvalidCommitTimestamp(timestamp.clone()));
            valid = false;
        }
    }

    valid.then(|| Commit {
        id: id.to_string(),
        timestamp: raw.timestamp.clone(),
        metadata: raw.metadata.clone(),
    })
}

fn validate_bench(
    index: usize,
    raw: &RawBench,
    errors: &mut Vec<ValidationError>,
) -> Option<BenchResult> {
    let name = match raw.name.as_deref() {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => {
            errors.push(ValidationError::MissingName { index });
            return None;
        }
    };

    let value = match &raw.value {
        None => {
            errors.push(ValidationError::MissingValue {
                index,
                name: name.clone(),
            });
            None
        }
        Some(value) => match value.as_f64().filter(|v| v.is_finite()) {
            Some(v) => Some(v),
            None => {
                errors.push(ValidationError::InvalidValue {
                    index,
                    name: name.clone(),
                    value: value.to_string(),
                });
                None
            }
        },
    };

    let unit = match raw.unit.as_deref().map(str::trim) {
        Some(unit) if !unit.is_empty() => Some(unit.to_string()),
        _ => {
            errors.push(ValidationError::MissingUnit {
                index,
                name: name.clone(),
            });
            None
        }
    };

    if let Some(extra) = &raw.extra {
        if let Err(reason) = ExtraMetadata::parse(extra) {
            errors.push(ValidationError::InvalidExtra {
                index,
                name: name.clone(),
                reason,
            });
            return None;
        }
    }

    Some(BenchResult {
        name,
        value: value?,
        unit: unit?,
        extra: raw.extra.clone(),
        range: raw.range.clone(),
    })
}

/// Accept non-negative integral JSON numbers up to year 9999
fn epoch_millis(value: &serde_json::Value) -> Option<u64> {
    let millis = match value {
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(v) => v,
            None => {
                let f = n.as_f64()?;
                if f < 0.0 || f.fract() != 0.0 || f > MAX_EPOCH_MILLIS as f64 {
                    return None;
                }
                f as u64
            }
        },
        _ => return None,
    };
    (millis <= MAX_EPOCH_MILLIS).then_some(millis)
}
