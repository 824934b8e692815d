// Baseline comparison of a new run against the prior history of its suite
//
// Per measurement:
// 1. Baseline window = last `window_size` prior values of (suite, tool, name)
// 2. Baseline value = window collapsed with the policy's statistic
// 3. ratio = new / baseline, judged against exclusive thresholds in the
//    measurement's configured direction of improvement
//
// A key without prior values only establishes its baseline. The analyzer is
// stateless; everything it needs is passed in.

use crate::model::{BenchResult, Run};
use crate::regression::config::{AnalysisPolicy, Direction, PolicyConfigError};
use crate::regression::finding::{Finding, Severity};
use crate::store::series_of;
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of one baseline/new comparison before it becomes a [`Finding`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    /// Within thresholds, or exactly equal
    Unchanged,
    Crossed { severity: Severity, ratio: f64 },
    /// Non-positive baseline; no ratio is computed
    ZeroBaseline,
}

/// Classify `new_value` against `baseline` for the given direction
///
/// Thresholds are exclusive: with `lower_threshold = 0.8` a ratio of exactly
/// 0.8 is not a regression.
pub fn compare(
    baseline: f64,
    new_value: f64,
    direction: Direction,
    policy: &AnalysisPolicy,
) -> Comparison {
    if baseline <= 0.0 {
        return Comparison::ZeroBaseline;
    }
    if new_value == baseline {
        return Comparison::Unchanged;
    }

    let ratio = new_value / baseline;
    let severity = match direction {
        Direction::HigherIsBetter if ratio < policy.lower_threshold => Severity::Regression,
        Direction::HigherIsBetter if ratio > policy.upper_threshold => Severity::Improvement,
        Direction::LowerIsBetter if ratio > policy.upper_threshold => Severity::Regression,
        Direction::LowerIsBetter if ratio < policy.lower_threshold => Severity::Improvement,
        _ => return Comparison::Unchanged,
    };
    Comparison::Crossed { severity, ratio }
}

/// Compare every measurement of `new_run` against `history`
///
/// `history` holds the suite's prior runs (any order; the baseline series is
/// sorted by date). Runs of other tools are ignored. Fails only when the
/// policy is invalid or lacks a direction for one of the run's units.
pub fn analyze(
    suite: &str,
    new_run: &Run,
    history: &[Arc<Run>],
    policy: &AnalysisPolicy,
) -> Result<Vec<Finding>, PolicyConfigError> {
    policy.validate()?;
    policy.ensure_covers(new_run)?;

    let mut findings = Vec::new();
    for bench in &new_run.benches {
        if let Some(finding) = analyze_bench(suite, new_run, bench, history, policy)? {
            findings.push(finding);
        }
    }

    debug!(
        suite,
        tool = %new_run.tool,
        measurements = new_run.benches.len(),
        findings = findings.len(),
        "run analyzed"
    );
    Ok(findings)
}

/// Analyze the newest run of each tool in `runs` against the runs before it
///
/// Used for analysis-only passes over an existing ledger.
pub fn analyze_latest(
    suite: &str,
    runs: &[Arc<Run>],
    policy: &AnalysisPolicy,
) -> Result<Vec<Finding>, PolicyConfigError> {
    let mut latest: Vec<usize> = Vec::new();
    for (index, run) in runs.iter().enumerate().rev() {
        if !latest.iter().any(|&i| runs[i].tool == run.tool) {
            latest.push(index);
        }
    }
    latest.sort_unstable();

    let mut findings = Vec::new();
    for index in latest {
        findings.extend(analyze(suite, &runs[index], &runs[..index], policy)?);
    }
    Ok(findings)
}

fn analyze_bench(
    suite: &str,
    run: &Run,
    bench: &BenchResult,
    history: &[Arc<Run>],
    policy: &AnalysisPolicy,
) -> Result<Option<Finding>, PolicyConfigError> {
    let series = series_of(history, &run.tool, &bench.name);
    if series.is_empty() {
        trace!(suite, name = %bench.name, "first observation, baseline established");
        return Ok(None);
    }

    let window = &series[series.len().saturating_sub(policy.window_size)..];
    let values: Vec<f64> = window.iter().map(|p| p.value).collect();
    let Some(baseline_value) = policy.baseline_stat.apply(&values) else {
        return Ok(None);
    };

    let finding = |severity: Severity, ratio: Option<f64>, reason: Option<String>| Finding {
        suite: suite.to_string(),
        tool: run.tool.clone(),
        name: bench.name.clone(),
        unit: bench.unit.clone(),
        baseline_value,
        new_value: bench.value,
        ratio,
        severity,
        window_len: window.len(),
        commit_id: run.commit.id.clone(),
        extra: bench.extra.clone(),
        reason,
    };

    if let Some(changed) = window.iter().find(|p| p.unit != bench.unit) {
        return Ok(Some(finding(
            Severity::Indeterminate,
            None,
            Some(format!(
                "unit changed from '{}' to '{}'",
                changed.unit, bench.unit
            )),
        )));
    }

    let direction = policy.direction_for(&run.tool, &bench.unit)?;
    Ok(match compare(baseline_value, bench.value, direction, policy) {
        Comparison::Unchanged => None,
        Comparison::Crossed { severity, ratio } => Some(finding(severity, Some(ratio), None)),
        Comparison::ZeroBaseline => Some(finding(
            Severity::Indeterminate,
            None,
            Some(format!(
                "baseline value {baseline_value} is not positive; ratio undefined"
            )),
        )),
    })
}
