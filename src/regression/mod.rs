// Threshold-based regression detection against a rolling baseline
//
// Each measurement of a new run is compared with the last K values of the
// same (suite, tool, name) key. The ratio new/baseline is judged against a
// lower and an upper threshold in the unit's configured direction of
// improvement. Crossings are reported both ways: regressions fail a build,
// improvements are informational, and zero baselines are indeterminate.

mod analyzer;
mod config;
mod finding;
mod statistics;

pub use analyzer::{analyze, analyze_latest, compare, Comparison};
pub use config::{AnalysisPolicy, Direction, PolicyConfigError, DEFAULT_POLICY_TOML};
pub use finding::{Finding, Severity};
pub use statistics::{mean, median, BaselineStat};
