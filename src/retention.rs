//! Retention: bound ledger growth without starving the analyzer
//!
//! A pruning plan is computed by [`plan`], a pure function over a suite's
//! runs, and applied by [`prune`] inside the store's append lock so it can
//! never interleave with an append. [`prune_staged`] applies the same plan
//! inside a larger [`Transaction`].
//!
//! A key `(tool, name)` is *current* when it appears in the most recent run
//! of its tool. For each current key the runs holding its last
//! `protect_window` values (the analyzer's baseline window) always survive.

use crate::model::Run;
use crate::store::{HistoryStore, StorageError, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// What to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep the last N runs of the suite
    KeepLast(usize),
    /// Keep runs whose `date` is at or after the cutoff (epoch ms)
    NewerThan(u64),
    /// Keep every run envelope but only the last N values per `(tool, name)`;
    /// envelopes left without measurements are dropped
    KeepLastPerKey(usize),
}

/// Counts removed by one prune
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneOutcome {
    pub runs_removed: usize,
    pub measurements_removed: usize,
}

impl PruneOutcome {
    pub fn is_empty(&self) -> bool {
        self.runs_removed == 0 && self.measurements_removed == 0
    }
}

impl std::ops::AddAssign for PruneOutcome {
    fn add_assign(&mut self, other: Self) {
        self.runs_removed += other.runs_removed;
        self.measurements_removed += other.measurements_removed;
    }
}

/// Apply `policy` to `suite` in `store`
pub fn prune(
    store: &HistoryStore,
    suite: &str,
    policy: &RetentionPolicy,
    protect_window: usize,
) -> Result<PruneOutcome, StorageError> {
    let outcome = store.transaction(|tx| prune_staged(tx, suite, policy, protect_window))?;
    log_pruned(suite, &outcome);
    Ok(outcome)
}

/// Apply `policy` to the staged runs of `suite`; persisted with the transaction
pub fn prune_staged(
    tx: &mut Transaction<'_>,
    suite: &str,
    policy: &RetentionPolicy,
    protect_window: usize,
) -> PruneOutcome {
    tx.rewrite_suite(suite, |runs| plan(runs, policy, protect_window))
}

pub(crate) fn log_pruned(suite: &str, outcome: &PruneOutcome) {
    if !outcome.is_empty() {
        info!(
            suite,
            runs_removed = outcome.runs_removed,
            measurements_removed = outcome.measurements_removed,
            "suite pruned"
        );
    }
}

/// Compute the runs to keep, in their original order
pub fn plan(
    runs: &[Arc<Run>],
    policy: &RetentionPolicy,
    protect_window: usize,
) -> (Vec<Arc<Run>>, PruneOutcome) {
    match *policy {
        RetentionPolicy::KeepLast(n) => {
            let first_kept = runs.len().saturating_sub(n);
            let protected = protected_runs(runs, protect_window);
            keep_runs(runs, |index, _| index >= first_kept || protected.contains(&index))
        }
        RetentionPolicy::NewerThan(cutoff) => {
            let protected = protected_runs(runs, protect_window);
            keep_runs(runs, |index, run| {
                run.date >= cutoff || protected.contains(&index)
            })
        }
        RetentionPolicy::KeepLastPerKey(n) => keep_last_per_key(runs, n.max(protect_window)),
    }
}

fn keep_runs<F>(runs: &[Arc<Run>], keep: F) -> (Vec<Arc<Run>>, PruneOutcome)
where
    F: Fn(usize, &Run) -> bool,
{
    let mut outcome = PruneOutcome::default();
    let mut kept = Vec::with_capacity(runs.len());
    for (index, run) in runs.iter().enumerate() {
        if keep(index, run) {
            kept.push(Arc::clone(run));
        } else {
            outcome.runs_removed += 1;
            outcome.measurements_removed += run.benches.len();
        }
    }
    (kept, outcome)
}

/// Run indices in the order the analyzer sees them: date ascending, stable
fn date_order(runs: &[Arc<Run>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..runs.len()).collect();
    order.sort_by_key(|&index| runs[index].date);
    order
}

/// Runs that hold the last `window` values of a current key
fn protected_runs(runs: &[Arc<Run>], window: usize) -> BTreeSet<usize> {
    let mut protected = BTreeSet::new();
    if window == 0 {
        return protected;
    }

    // Latest run (ingestion order) per tool defines the current keys
    let mut latest: BTreeMap<&str, usize> = BTreeMap::new();
    for (index, run) in runs.iter().enumerate() {
        latest.insert(run.tool.as_str(), index);
    }
    let current: BTreeSet<(&str, &str)> = latest
        .values()
        .flat_map(|&index| {
            let run = &runs[index];
            run.benches
                .iter()
                .map(move |bench| (run.tool.as_str(), bench.name.as_str()))
        })
        .collect();

    let mut remaining: BTreeMap<(&str, &str), usize> =
        current.into_iter().map(|key| (key, window)).collect();
    for index in date_order(runs).into_iter().rev() {
        let run = &runs[index];
        for bench in &run.benches {
            if let Some(left) = remaining.get_mut(&(run.tool.as_str(), bench.name.as_str())) {
                if *left > 0 {
                    *left -= 1;
                    protected.insert(index);
                }
            }
        }
    }
    protected
}

fn keep_last_per_key(runs: &[Arc<Run>], keep: usize) -> (Vec<Arc<Run>>, PruneOutcome) {
    // (run index, bench index) pairs to keep
    let mut kept_benches: BTreeSet<(usize, usize)> = BTreeSet::new();
    let mut seen: BTreeMap<(&str, &str), usize> = BTreeMap::new();

    for index in date_order(runs).into_iter().rev() {
        let run = &runs[index];
        for (bench_index, bench) in run.benches.iter().enumerate().rev() {
            let count = seen
                .entry((run.tool.as_str(), bench.name.as_str()))
                .or_default();
            if *count < keep {
                *count += 1;
                kept_benches.insert((index, bench_index));
            }
        }
    }

    let mut outcome = PruneOutcome::default();
    let mut kept = Vec::with_capacity(runs.len());
    for (index, run) in runs.iter().enumerate() {
        let benches: Vec<_> = run
            .benches
            .iter()
            .enumerate()
            .filter(|(bench_index, _)| kept_benches.contains(&(index, *bench_index)))
            .map(|(_, bench)| bench.clone())
            .collect();

        outcome.measurements_removed += run.benches.len() - benches.len();
        if benches.is_empty() {
            outcome.runs_removed += 1;
        } else if benches.len() == run.benches.len() {
            kept.push(Arc::clone(run));
        } else {
            kept.push(Arc::new(Run {
                benches,
                ..Run::clone(run)
            }));
        }
    }
    (kept, outcome)
}
