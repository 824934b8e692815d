//! CLI argument parsing for benchledger

use crate::regression::{AnalysisPolicy, BaselineStat, PolicyConfigError};
use crate::retention::RetentionPolicy;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// Markdown table for pull request comments
    Markdown,
}

#[derive(Parser, Debug)]
#[command(name = "benchledger")]
#[command(version)]
#[command(about = "Benchmark history ledger with baseline regression detection", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate one run, append it to a suite and analyze it
    Ingest(IngestArgs),
    /// Analyze the newest run of each suite in an existing ledger
    Analyze(AnalyzeArgs),
    /// Remove old runs or measurement detail from the ledger
    Prune(PruneArgs),
    /// Print a suite's runs, or one benchmark's series, as JSON
    Show(ShowArgs),
    /// Check a run payload against the schema without storing it
    Validate(ValidateArgs),
}

/// Analysis policy flags shared by `ingest` and `analyze`
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// TOML analysis policy (defaults to the built-in policy)
    #[arg(long, value_name = "FILE")]
    pub policy: Option<PathBuf>,

    /// Number of prior values forming the baseline
    #[arg(long = "window", value_name = "N")]
    pub window: Option<usize>,

    /// Statistic collapsing the baseline window
    #[arg(long = "baseline-stat", value_enum)]
    pub baseline_stat: Option<BaselineStat>,

    /// Ratio below which higher-is-better values regress
    #[arg(long = "lower-threshold", value_name = "RATIO")]
    pub lower_threshold: Option<f64>,

    /// Ratio above which lower-is-better values regress
    #[arg(long = "upper-threshold", value_name = "RATIO")]
    pub upper_threshold: Option<f64>,
}

impl PolicyArgs {
    /// Policy file (or built-in policy) with flag overrides applied
    pub fn resolve(&self) -> Result<AnalysisPolicy, PolicyConfigError> {
        let mut policy = match &self.policy {
            Some(path) => AnalysisPolicy::from_toml(path)?,
            None => AnalysisPolicy::builtin()?,
        };
        if let Some(window) = self.window {
            policy.window_size = window;
        }
        if let Some(stat) = self.baseline_stat {
            policy.baseline_stat = stat;
        }
        if let Some(lower) = self.lower_threshold {
            policy.lower_threshold = lower;
        }
        if let Some(upper) = self.upper_threshold {
            policy.upper_threshold = upper;
        }
        policy.validate()?;
        Ok(policy)
    }
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Ledger document (`.js` files use the `window.BENCHMARK_DATA` wrapper)
    #[arg(long, value_name = "FILE")]
    pub ledger: PathBuf,

    /// Target suite name
    #[arg(long)]
    pub suite: String,

    /// Run payload JSON file, or `-` for stdin
    #[arg(long, value_name = "FILE")]
    pub run: PathBuf,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Keep only the last N runs of the suite after appending
    #[arg(long = "keep-last", value_name = "N")]
    pub keep_last: Option<usize>,

    /// Store the run without analyzing it
    #[arg(long = "no-analyze")]
    pub no_analyze: bool,

    /// Report format
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[arg(long, value_name = "FILE")]
    pub ledger: PathBuf,

    /// Suites to analyze (repeatable; all suites when omitted)
    #[arg(long = "suite")]
    pub suites: Vec<String>,

    #[command(flatten)]
    pub policy: PolicyArgs,

    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("retention")
        .required(true)
        .args(["keep_last", "newer_than", "keep_last_per_key"]),
))]
pub struct PruneArgs {
    #[arg(long, value_name = "FILE")]
    pub ledger: PathBuf,

    /// Suites to prune (repeatable; all suites when omitted)
    #[arg(long = "suite")]
    pub suites: Vec<String>,

    /// Keep the last N runs per suite
    #[arg(long = "keep-last", value_name = "N")]
    pub keep_last: Option<usize>,

    /// Keep runs dated at or after this epoch-millisecond cutoff
    #[arg(long = "newer-than", value_name = "EPOCH_MS")]
    pub newer_than: Option<u64>,

    /// Keep only the last N values per benchmark key
    #[arg(long = "keep-last-per-key", value_name = "N")]
    pub keep_last_per_key: Option<usize>,

    /// Most recent values per current benchmark that are never pruned
    #[arg(long = "protect-window", value_name = "N", default_value = "1")]
    pub protect_window: usize,
}

impl PruneArgs {
    pub fn retention(&self) -> Option<RetentionPolicy> {
        self.keep_last
            .map(RetentionPolicy::KeepLast)
            .or(self.newer_than.map(RetentionPolicy::NewerThan))
            .or(self.keep_last_per_key.map(RetentionPolicy::KeepLastPerKey))
    }
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long, value_name = "FILE")]
    pub ledger: PathBuf,

    #[arg(long)]
    pub suite: String,

    /// Only runs of this tool
    #[arg(long)]
    pub tool: Option<String>,

    /// Print the series of one benchmark name (requires --tool)
    #[arg(long, requires = "tool")]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[arg(long)]
    pub suite: String,

    /// Run payload JSON file, or `-` for stdin
    #[arg(long, value_name = "FILE")]
    pub run: PathBuf,
}
