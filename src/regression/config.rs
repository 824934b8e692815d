// Analysis policy: baseline window, thresholds and direction of improvement
//
// The direction for a unit is always looked up in a configured table. A unit
// without an entry is a configuration error, never a guess.

use crate::model::Run;
use crate::regression::statistics::BaselineStat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Embedded default policy, compiled into the binary for zero-config use
pub const DEFAULT_POLICY_TOML: &str = include_str!("../../policy-default.toml");

/// Policy problems; fatal at startup
#[derive(Error, Debug)]
pub enum PolicyConfigError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no direction of improvement configured for unit '{unit}' (tool '{tool}')")]
    MissingDirection { unit: String, tool: String },

    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Which way a measurement improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Throughput-like units (ops/us): a drop is a regression
    HigherIsBetter,
    /// Latency-like units (ns/op): a rise is a regression
    LowerIsBetter,
}

/// Regression analysis policy
///
/// # Example TOML
/// ```toml
/// window_size = 3
/// baseline_stat = "mean"
/// lower_threshold = 0.8
/// upper_threshold = 1.25
///
/// [units]
/// "ops/us" = "higher_is_better"
/// "ns/op" = "lower_is_better"
///
/// [tools]
/// customSmallerIsBetter = "lower_is_better"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisPolicy {
    /// Number of most recent prior values forming the baseline (>= 1)
    pub window_size: usize,

    /// How the window collapses into one baseline value
    pub baseline_stat: BaselineStat,

    /// Ratio below which a higher-is-better value regressed
    /// (or a lower-is-better value improved). Exclusive bound.
    pub lower_threshold: f64,

    /// Ratio above which a lower-is-better value regressed
    /// (or a higher-is-better value improved). Exclusive bound.
    pub upper_threshold: f64,

    /// Merge the embedded unit and tool tables under this policy's own
    pub inherit_defaults: bool,

    /// Unit → direction
    pub units: BTreeMap<String, Direction>,

    /// Tool → direction, overrides `units` for every measurement of that tool
    pub tools: BTreeMap<String, Direction>,
}

impl Default for AnalysisPolicy {
    fn default() -> Self {
        Self {
            window_size: 1,
            baseline_stat: BaselineStat::Mean,
            lower_threshold: 0.80,
            upper_threshold: 1.25,
            inherit_defaults: true,
            units: BTreeMap::new(),
            tools: BTreeMap::new(),
        }
    }
}

impl AnalysisPolicy {
    /// Empty direction tables with default window and thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded default policy
    pub fn builtin() -> Result<Self, PolicyConfigError> {
        let mut policy: Self = toml::from_str(DEFAULT_POLICY_TOML)?;
        policy.inherit_defaults = false;
        Ok(policy)
    }

    /// Parse a policy document, merging in the embedded tables unless
    /// `inherit_defaults = false`
    pub fn from_toml_str(text: &str) -> Result<Self, PolicyConfigError> {
        let mut policy: Self = toml::from_str(text)?;
        if policy.inherit_defaults {
            let builtin = Self::builtin()?;
            for (unit, direction) in builtin.units {
                policy.units.entry(unit).or_insert(direction);
            }
            for (tool, direction) in builtin.tools {
                policy.tools.entry(tool).or_insert(direction);
            }
            policy.inherit_defaults = false;
        }
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, PolicyConfigError> {
        let text = fs::read_to_string(path.as_ref()).map_err(|source| PolicyConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_unit(mut self, unit: impl Into<String>, direction: Direction) -> Self {
        self.units.insert(unit.into(), direction);
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>, direction: Direction) -> Self {
        self.tools.insert(tool.into(), direction);
        self
    }

    pub fn with_window(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_baseline_stat(mut self, stat: BaselineStat) -> Self {
        self.baseline_stat = stat;
        self
    }

    pub fn with_thresholds(mut self, lower: f64, upper: f64) -> Self {
        self.lower_threshold = lower;
        self.upper_threshold = upper;
        self
    }

    /// Direction of improvement for a measurement of `tool` in `unit`
    pub fn direction_for(&self, tool: &str, unit: &str) -> Result<Direction, PolicyConfigError> {
        self.tools
            .get(tool)
            .or_else(|| self.units.get(unit))
            .copied()
            .ok_or_else(|| PolicyConfigError::MissingDirection {
                unit: unit.to_string(),
                tool: tool.to_string(),
            })
    }

    /// Fail fast when `run` reports a unit without a configured direction
    pub fn ensure_covers(&self, run: &Run) -> Result<(), PolicyConfigError> {
        for unit in run.units() {
            self.direction_for(&run.tool, unit)?;
        }
        Ok(())
    }

    /// Validate window and threshold ranges
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if self.window_size == 0 {
            return Err(PolicyConfigError::Invalid(
                "window_size must be >= 1".to_string(),
            ));
        }

        if !self.lower_threshold.is_finite()
            || self.lower_threshold <= 0.0
            || self.lower_threshold > 1.0
        {
            return Err(PolicyConfigError::Invalid(format!(
                "lower_threshold must be in (0, 1], got {}",
                self.lower_threshold
            )));
        }

        if !self.upper_threshold.is_finite() || self.upper_threshold < 1.0 {
            return Err(PolicyConfigError::Invalid(format!(
                "upper_threshold must be finite and >= 1, got {}",
                self.upper_threshold
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BenchResult, Commit};

    #[test]
    fn test_default_policy() {
        let policy = AnalysisPolicy::default();
        assert_eq!(policy.window_size, 1);
        assert_eq!(policy.lower_threshold, 0.80);
        assert_eq!(policy.upper_threshold, 1.25);
        assert!(policy.units.is_empty());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_builtin_policy_parses() {
        let policy = AnalysisPolicy::builtin().unwrap();
        assert!(policy.validate().is_ok());
        assert_eq!(
            policy.direction_for("jmh", "ops/us").unwrap(),
            Direction::HigherIsBetter
        );
        assert_eq!(
            policy.direction_for("cargo", "ns/iter").unwrap(),
            Direction::LowerIsBetter
        );
    }

    #[test]
    fn test_tool_override_wins() {
        let policy = AnalysisPolicy::new()
            .with_unit("ms", Direction::LowerIsBetter)
            .with_tool("customBiggerIsBetter", Direction::HigherIsBetter);
        assert_eq!(
            policy.direction_for("customBiggerIsBetter", "ms").unwrap(),
            Direction::HigherIsBetter
        );
        assert_eq!(
            policy.direction_for("other", "ms").unwrap(),
            Direction::LowerIsBetter
        );
    }

    #[test]
    fn test_missing_direction_fails_fast() {
        let policy = AnalysisPolicy::new().with_unit("ops/us", Direction::HigherIsBetter);
        let run = Run::new(Commit::new("c"), 1, "jmh")
            .with_bench(BenchResult::new("a", 1.0, "ops/us"))
            .with_bench(BenchResult::new("b", 1.0, "widgets"));

        match policy.ensure_covers(&run) {
            Err(PolicyConfigError::MissingDirection { unit, tool }) => {
                assert_eq!(unit, "widgets");
                assert_eq!(tool, "jmh");
            }
            other => panic!("expected MissingDirection, got {other:?}"),
        }
    }

    #[test]
    fn test_toml_inherits_defaults() {
        let policy = AnalysisPolicy::from_toml_str(
            r#"
            window_size = 3
            lower_threshold = 0.5

            [units]
            "widgets" = "higher_is_better"
            "#,
        )
        .unwrap();
        assert_eq!(policy.window_size, 3);
        assert_eq!(policy.lower_threshold, 0.5);
        assert_eq!(policy.upper_threshold, 1.25);
        assert!(policy.direction_for("x", "widgets").is_ok());
        assert!(policy.direction_for("x", "ops/s").is_ok());
    }

    #[test]
    fn test_toml_without_inheritance() {
        let policy = AnalysisPolicy::from_toml_str(
            r#"
            inherit_defaults = false
            [units]
            "widgets" = "lower_is_better"
            "#,
        )
        .unwrap();
        assert!(policy.direction_for("x", "ops/s").is_err());
    }

    #[test]
    fn test_toml_rejects_unknown_keys_and_directions() {
        assert!(AnalysisPolicy::from_toml_str("windw_size = 2").is_err());
        assert!(AnalysisPolicy::from_toml_str("[units]\n\"ms\" = \"sideways\"").is_err());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_ranges() {
        let mut policy = AnalysisPolicy::default();
        policy.window_size = 0;
        assert!(policy.validate().is_err());

        let policy = AnalysisPolicy::default().with_thresholds(1.5, 2.0);
        assert!(policy.validate().is_err());

        let policy = AnalysisPolicy::default().with_thresholds(0.8, 0.9);
        assert!(policy.validate().is_err());

        let policy = AnalysisPolicy::default().with_thresholds(0.0, 1.2);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        match AnalysisPolicy::from_toml("/nonexistent/policy.toml") {
            Err(PolicyConfigError::Read { path, .. }) => {
                assert!(path.to_string_lossy().contains("nonexistent"))
            }
            other => panic!("expected Read error, got {other:?}"),
        }
    }
}
