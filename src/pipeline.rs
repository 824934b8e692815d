//! Ingest / analyze / prune orchestration for one CI invocation
//!
//! Every accepted run of an invocation, and the retention pass over the
//! touched suites, is staged in one store transaction and committed as a
//! single write: either the whole batch lands or none of it does. Analysis
//! then runs on one scoped worker thread per suite, comparing each run with
//! the history captured when it was staged, so later writers cannot shift
//! the baseline. Validation failures become report rejections; storage and
//! policy errors abort the invocation.

use crate::regression::{analyze, analyze_latest, AnalysisPolicy, Finding, PolicyConfigError};
use crate::report::{emit, Rejection, Report};
use crate::retention::{log_pruned, prune, prune_staged, PruneOutcome, RetentionPolicy};
use crate::store::{Appended, HistoryStore, StorageError};
use crate::validate::{validate, RawRun};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that abort a pipeline invocation
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Policy(#[from] PolicyConfigError),
}

/// One run payload destined for a suite
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub suite: String,
    pub run: RawRun,
}

impl IngestRequest {
    pub fn new(suite: impl Into<String>, run: RawRun) -> Self {
        Self {
            suite: suite.into(),
            run,
        }
    }
}

/// Pipeline behavior for one invocation
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub policy: AnalysisPolicy,
    /// Applied to every touched suite after its runs are appended
    pub retention: Option<RetentionPolicy>,
    /// Skip analysis and only store runs
    pub analyze: bool,
}

impl PipelineOptions {
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self {
            policy,
            retention: None,
            analyze: true,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn without_analysis(mut self) -> Self {
        self.analyze = false;
        self
    }
}

/// One suite's share of a committed batch
struct StagedSuite {
    suite: String,
    appended: Vec<Appended>,
    pruned: PruneOutcome,
}

/// Validate, append, analyze and prune a batch of run payloads
pub fn ingest(
    store: &HistoryStore,
    requests: Vec<IngestRequest>,
    options: &PipelineOptions,
) -> Result<Report, PipelineError> {
    options.policy.validate()?;

    let mut rejected = Vec::new();
    let mut by_suite: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for request in requests {
        match validate(&request.suite, &request.run) {
            Ok(run) => by_suite.entry(request.suite).or_default().push(run),
            Err(error) => {
                warn!(suite = %request.suite, %error, "run rejected");
                rejected.push(Rejection {
                    suite: request.suite,
                    reason: error.to_string(),
                });
            }
        }
    }

    // Fail fast on unmapped units before anything is appended
    if options.analyze {
        for run in by_suite.values().flatten() {
            options.policy.ensure_covers(run)?;
        }
    }

    let staged = store.transaction(|tx| {
        by_suite
            .into_iter()
            .map(|(suite, runs)| {
                let appended: Vec<_> = runs
                    .into_iter()
                    .map(|run| tx.append(&suite, run))
                    .collect();
                let pruned = options
                    .retention
                    .as_ref()
                    .map(|retention| {
                        prune_staged(tx, &suite, retention, options.policy.window_size)
                    })
                    .unwrap_or_default();
                StagedSuite {
                    suite,
                    appended,
                    pruned,
                }
            })
            .collect::<Vec<_>>()
    })?;

    let ingested: usize = staged.iter().map(|s| s.appended.len()).sum();
    let mut pruned = PruneOutcome::default();
    for suite in &staged {
        log_pruned(&suite.suite, &suite.pruned);
        pruned += suite.pruned;
    }

    let findings = if options.analyze {
        analyze_staged(&staged, &options.policy)?
    } else {
        Vec::new()
    };

    info!(
        ingested,
        rejected = rejected.len(),
        findings = findings.len(),
        "ingest complete"
    );
    Ok(emit(findings)
        .with_rejections(rejected)
        .with_ingested(ingested)
        .with_pruned(pruned))
}

/// Analyze every staged run against the history captured with it, one
/// worker per suite
fn analyze_staged(
    staged: &[StagedSuite],
    policy: &AnalysisPolicy,
) -> Result<Vec<Finding>, PolicyConfigError> {
    let outcomes: Vec<Result<Vec<Finding>, PolicyConfigError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = staged
            .iter()
            .map(|suite| scope.spawn(move || analyze_suite(suite, policy)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    });

    let mut findings = Vec::new();
    for outcome in outcomes {
        findings.extend(outcome?);
    }
    Ok(findings)
}

fn analyze_suite(
    staged: &StagedSuite,
    policy: &AnalysisPolicy,
) -> Result<Vec<Finding>, PolicyConfigError> {
    let mut findings = Vec::new();
    for appended in &staged.appended {
        findings.extend(analyze(
            &staged.suite,
            &appended.run,
            appended.history.as_slice(),
            policy,
        )?);
    }
    Ok(findings)
}

/// Analysis-only pass: the newest run of each tool in each suite against the
/// runs before it. An empty `suites` selects every suite in the ledger.
pub fn analyze_ledger(
    store: &HistoryStore,
    suites: &[String],
    policy: &AnalysisPolicy,
) -> Result<Report, PolicyConfigError> {
    policy.validate()?;

    let selected = if suites.is_empty() {
        store.suites()
    } else {
        suites.to_vec()
    };

    let mut findings = Vec::new();
    let mut rejected = Vec::new();
    for suite in selected {
        let runs = store.load(&suite);
        if runs.is_empty() {
            rejected.push(Rejection {
                reason: format!("suite '{suite}' not found in ledger"),
                suite,
            });
            continue;
        }
        findings.extend(analyze_latest(&suite, runs.as_slice(), policy)?);
    }

    Ok(emit(findings).with_rejections(rejected))
}

/// Apply `retention` to the selected suites (every suite when empty)
pub fn prune_ledger(
    store: &HistoryStore,
    suites: &[String],
    retention: &RetentionPolicy,
    protect_window: usize,
) -> Result<PruneOutcome, StorageError> {
    let selected = if suites.is_empty() {
        store.suites()
    } else {
        suites.to_vec()
    };

    let mut total = PruneOutcome::default();
    for suite in selected {
        total += prune(store, &suite, retention, protect_window)?;
    }
    Ok(total)
}
