//! Append-only benchmark history store
//!
//! The store owns the in-memory [`Ledger`] behind a single write lock, which is
//! the one linearizable append point for every suite. Each write builds the
//! next ledger, commits it through the [`LedgerBackend`] and only then
//! publishes it; a failed commit leaves both memory and disk unchanged.
//!
//! Several changes can be grouped with [`HistoryStore::transaction`], which
//! stages them on one copy of the ledger and commits them together.
//!
//! # Example
//! ```
//! use benchledger::model::{BenchResult, Commit, Run};
//! use benchledger::store::HistoryStore;
//!
//! let store = HistoryStore::in_memory();
//! let run = Run::new(Commit::new("abc123"), 1_700_000_000_000, "jmh")
//!     .with_bench(BenchResult::new("opA", 170.0, "ops/us"));
//!
//! let id = store.append("Auth Engine", run).unwrap();
//! assert_eq!(id.position, 0);
//! assert_eq!(store.load("Auth Engine").len(), 1);
//! ```

mod backend;

pub use backend::{FileBackend, LedgerBackend, LedgerFormat, MemoryBackend, DATA_JS_PREFIX};

use crate::model::{Ledger, Run, RunId, SeriesPoint};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Storage failures; fatal for the invocation, the ledger is left unmodified
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger {path} is not a valid ledger document: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to encode ledger: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Restartable, finite snapshot of a suite's runs in ingestion order
///
/// Holds shared handles only; iterating never copies a run and later appends
/// do not affect an existing sequence.
#[derive(Debug, Clone, Default)]
pub struct RunSequence {
    runs: Vec<Arc<Run>>,
}

impl RunSequence {
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Run>> {
        self.runs.iter()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn last(&self) -> Option<&Arc<Run>> {
        self.runs.last()
    }

    pub fn as_slice(&self) -> &[Arc<Run>] {
        &self.runs
    }
}

impl<'a> IntoIterator for &'a RunSequence {
    type Item = &'a Arc<Run>;
    type IntoIter = std::slice::Iter<'a, Arc<Run>>;

    fn into_iter(self) -> Self::IntoIter {
        self.runs.iter()
    }
}

impl IntoIterator for RunSequence {
    type Item = Arc<Run>;
    type IntoIter = std::vec::IntoIter<Arc<Run>>;

    fn into_iter(self) -> Self::IntoIter {
        self.runs.into_iter()
    }
}

/// A run as staged by an append, with the runs that preceded it in its suite
#[derive(Debug, Clone)]
pub struct Appended {
    pub id: RunId,
    pub run: Arc<Run>,
    pub history: RunSequence,
}

/// Changes staged on a private copy of the ledger
///
/// Nothing is visible to readers or persisted until the closure passed to
/// [`HistoryStore::transaction`] returns and the backend commit succeeds.
pub struct Transaction<'a> {
    ledger: &'a mut Ledger,
    latest_date: u64,
    changed: bool,
}

impl Transaction<'_> {
    /// Stage `run` at the end of `suite`, creating the suite on first use
    pub fn append(&mut self, suite: &str, run: Run) -> Appended {
        let runs = self.ledger.entries.entry(suite.to_string()).or_default();
        let history = RunSequence { runs: runs.clone() };
        let position = runs.len();
        let date = run.date;
        let run = Arc::new(run);
        runs.push(Arc::clone(&run));

        self.latest_date = self.latest_date.max(date);
        self.changed = true;
        debug!(suite, position, date, "run staged");

        Appended {
            id: RunId {
                suite: suite.to_string(),
                position,
            },
            run,
            history,
        }
    }

    /// Replace the staged history of `suite` with the output of `rewrite`
    ///
    /// Returned runs must be a subsequence (or summary) of the input; the
    /// store only persists them. An empty result removes the suite.
    pub fn rewrite_suite<F, R>(&mut self, suite: &str, rewrite: F) -> R
    where
        F: FnOnce(&[Arc<Run>]) -> (Vec<Arc<Run>>, R),
    {
        let current = self.ledger.runs(suite);
        let (runs, outcome) = rewrite(current);

        let unchanged = runs.len() == current.len()
            && runs.iter().zip(current).all(|(a, b)| Arc::ptr_eq(a, b));
        if unchanged {
            return outcome;
        }

        if runs.is_empty() {
            self.ledger.entries.remove(suite);
        } else {
            self.ledger.entries.insert(suite.to_string(), runs);
        }
        self.changed = true;
        outcome
    }

    /// Staged runs of `suite`
    pub fn runs(&self, suite: &str) -> &[Arc<Run>] {
        self.ledger.runs(suite)
    }
}

/// Benchmark history store handle
pub struct HistoryStore {
    backend: Box<dyn LedgerBackend>,
    ledger: RwLock<Ledger>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("backend", &self.backend.describe())
            .finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Open a store over `backend`, loading whatever it has committed
    pub fn open(backend: impl LedgerBackend + 'static) -> Result<Self, StorageError> {
        let ledger = backend.load()?;
        info!(
            backend = %backend.describe(),
            suites = ledger.entries.len(),
            runs = ledger.run_count(),
            "ledger loaded"
        );
        Ok(Self {
            backend: Box::new(backend),
            ledger: RwLock::new(ledger),
        })
    }

    /// Open a file-backed store; `.js` paths use the `data.js` wrapper
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open(FileBackend::new(path.as_ref()))
    }

    /// Non-durable store
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend),
            ledger: RwLock::new(Ledger::default()),
        }
    }

    /// Wrap an already-built ledger in a non-durable store
    pub fn from_ledger(ledger: Ledger) -> Self {
        Self {
            backend: Box::new(MemoryBackend),
            ledger: RwLock::new(ledger),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        // Writers publish a complete ledger in one assignment, so a poisoned
        // lock still guards a consistent value.
        self.ledger.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.ledger.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Stage changes with `stage` and commit them as one write
    ///
    /// `stage` runs under the append lock, so no other writer interleaves.
    /// When it changes nothing the backend is not touched. On a failed
    /// commit none of the staged changes become visible.
    pub fn transaction<F, R>(&self, stage: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut Transaction<'_>) -> R,
    {
        let mut guard = self.write();
        let mut next = guard.clone();

        let mut tx = Transaction {
            ledger: &mut next,
            latest_date: 0,
            changed: false,
        };
        let outcome = stage(&mut tx);
        let Transaction {
            latest_date,
            changed,
            ..
        } = tx;
        if !changed {
            return Ok(outcome);
        }

        next.last_update = next_last_update(guard.last_update, latest_date);
        self.backend.commit(&next)?;
        *guard = next;
        Ok(outcome)
    }

    /// Append `run` to the end of `suite`, creating the suite on first use
    ///
    /// The run must already be validated. Fails only when the backend cannot
    /// commit, in which case nothing is appended.
    pub fn append(&self, suite: &str, run: Run) -> Result<RunId, StorageError> {
        self.append_with_history(suite, run).map(|appended| appended.id)
    }

    /// [`append`](Self::append), also returning the stored run and exactly
    /// the runs that preceded it, captured under the same lock
    pub fn append_with_history(&self, suite: &str, run: Run) -> Result<Appended, StorageError> {
        self.transaction(|tx| tx.append(suite, run))
    }

    /// Replace the history of `suite` with the output of `rewrite`
    ///
    /// `rewrite` runs under the append lock and receives the current runs.
    /// See [`Transaction::rewrite_suite`].
    pub fn rewrite_suite<F, R>(&self, suite: &str, rewrite: F) -> Result<R, StorageError>
    where
        F: FnOnce(&[Arc<Run>]) -> (Vec<Arc<Run>>, R),
    {
        self.transaction(|tx| tx.rewrite_suite(suite, rewrite))
    }

    /// Runs of `suite` in ingestion order
    pub fn load(&self, suite: &str) -> RunSequence {
        RunSequence {
            runs: self.read().runs(suite).to_vec(),
        }
    }

    /// `(timestamp, value, unit)` series for one comparison key, oldest first
    pub fn runs_for(&self, suite: &str, tool: &str, name: &str) -> Vec<SeriesPoint> {
        series_of(self.read().runs(suite), tool, name)
    }

    /// Suite names in lexical order
    pub fn suites(&self) -> Vec<String> {
        self.read().entries.keys().cloned().collect()
    }

    pub fn last_update(&self) -> u64 {
        self.read().last_update
    }

    /// Copy of the full ledger (shares run handles)
    pub fn snapshot(&self) -> Ledger {
        self.read().clone()
    }

    pub fn backend_description(&self) -> String {
        self.backend.describe()
    }
}

/// Series of one `(tool, name)` key within `runs`, sorted by date ascending
///
/// The sort is stable, so runs sharing a date keep their ingestion order.
/// A run reporting the same name twice contributes both values.
pub fn series_of(runs: &[Arc<Run>], tool: &str, name: &str) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = runs
        .iter()
        .filter(|run| run.tool == tool)
        .flat_map(|run| {
            run.benches
                .iter()
                .filter(|bench| bench.name == name)
                .map(|bench| SeriesPoint {
                    timestamp: run.date,
                    value: bench.value,
                    unit: bench.unit.clone(),
                    commit_id: run.commit.id.clone(),
                })
        })
        .collect();
    points.sort_by_key(|point| point.timestamp);
    points
}

fn next_last_update(previous: u64, run_date: u64) -> u64 {
    let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    previous.max(run_date).max(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BenchResult, Commit};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn run(commit: &str, date: u64, value: f64) -> Run {
        Run::new(Commit::new(commit), date, "jmh")
            .with_bench(BenchResult::new("opA", value, "ops/us"))
    }

    #[test]
    fn test_append_creates_suite_and_orders_runs() {
        let store = HistoryStore::in_memory();
        assert!(store.load("S").is_empty());

        for i in 0..5 {
            let id = store.append("S", run(&format!("c{i}"), 100 + i, i as f64)).unwrap();
            assert_eq!(id.position, i as usize);
        }

        let commits: Vec<_> = store.load("S").iter().map(|r| r.commit.id.clone()).collect();
        assert_eq!(commits, vec!["c0", "c1", "c2", "c3", "c4"]);
        assert_eq!(store.suites(), vec!["S".to_string()]);
    }

    #[test]
    fn test_load_is_restartable_snapshot() {
        let store = HistoryStore::in_memory();
        store.append("S", run("a", 1, 1.0)).unwrap();
        let seq = store.load("S");
        store.append("S", run("b", 2, 2.0)).unwrap();

        assert_eq!(seq.iter().count(), 1);
        assert_eq!(seq.iter().count(), 1);
        assert_eq!(store.load("S").len(), 2);
    }

    #[test]
    fn test_runs_for_sorts_by_date_and_filters_tool() {
        let store = HistoryStore::in_memory();
        store.append("S", run("late", 300, 3.0)).unwrap();
        store.append("S", run("early", 100, 1.0)).unwrap();
        store
            .append(
                "S",
                Run::new(Commit::new("other"), 200, "cargo")
                    .with_bench(BenchResult::new("opA", 9.0, "ns/iter")),
            )
            .unwrap();

        let series = store.runs_for("S", "jmh", "opA");
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 3.0]);
        assert_eq!(series[0].commit_id, "early");
    }

    #[test]
    fn test_last_update_never_lags_run_dates() {
        let store = HistoryStore::in_memory();
        let far_future = 200_000_000_000_000;
        store.append("S", run("a", far_future, 1.0)).unwrap();
        assert!(store.last_update() >= far_future);
    }

    struct FailingBackend {
        fail: AtomicBool,
    }

    impl LedgerBackend for FailingBackend {
        fn load(&self) -> Result<Ledger, StorageError> {
            Ok(Ledger::default())
        }

        fn commit(&self, _ledger: &Ledger) -> Result<(), StorageError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(StorageError::Io {
                    path: PathBuf::from("/dev/full"),
                    source: std::io::Error::other("disk full"),
                })
            } else {
                Ok(())
            }
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn test_failed_commit_leaves_ledger_unchanged() {
        let store = HistoryStore::open(FailingBackend {
            fail: AtomicBool::new(false),
        })
        .unwrap();
        store.append("S", run("a", 1, 1.0)).unwrap();
        let before = store.snapshot();

        // Swap in a failing backend by reopening over the same state
        let failing = HistoryStore {
            backend: Box::new(FailingBackend {
                fail: AtomicBool::new(true),
            }),
            ledger: RwLock::new(before.clone()),
        };
        assert!(failing.append("S", run("b", 2, 2.0)).is_err());
        assert!(failing.append("T", run("c", 3, 3.0)).is_err());
        assert_eq!(failing.snapshot(), before);
    }

    #[test]
    fn test_rewrite_suite_noop_skips_commit() {
        let store = HistoryStore::open(FailingBackend {
            fail: AtomicBool::new(true),
        })
        .unwrap();
        let outcome = store
            .rewrite_suite("S", |runs| (runs.to_vec(), runs.len()))
            .unwrap();
        assert_eq!(outcome, 0);
    }

    #[test]
    fn test_rewrite_suite_to_empty_removes_suite() {
        let store = HistoryStore::in_memory();
        store.append("S", run("a", 1, 1.0)).unwrap();
        store.rewrite_suite("S", |_| (Vec::new(), ())).unwrap();
        assert!(store.suites().is_empty());
    }

    #[test]
    fn test_append_with_history_returns_prior_runs() {
        let store = HistoryStore::in_memory();
        store.append("S", run("a", 1, 1.0)).unwrap();
        store.append("S", run("b", 2, 2.0)).unwrap();

        let appended = store.append_with_history("S", run("c", 3, 3.0)).unwrap();

        assert_eq!(appended.id.position, 2);
        assert_eq!(appended.run.commit.id, "c");
        let prior: Vec<_> = appended.history.iter().map(|r| r.commit.id.clone()).collect();
        assert_eq!(prior, vec!["a", "b"]);
        assert!(Arc::ptr_eq(&appended.run, &store.load("S").as_slice()[2]));
    }

    #[test]
    fn test_transaction_commits_once_or_not_at_all() {
        let store = HistoryStore::open(FailingBackend {
            fail: AtomicBool::new(true),
        })
        .unwrap();

        let result = store.transaction(|tx| {
            tx.append("S", run("a", 1, 1.0));
            tx.append("T", run("b", 2, 2.0));
            tx.rewrite_suite("S", |_| (Vec::new(), ()));
        });

        assert!(result.is_err());
        assert!(store.suites().is_empty());
        assert_eq!(store.last_update(), 0);

        // Nothing staged, nothing committed
        assert_eq!(store.transaction(|tx| tx.runs("S").len()).unwrap(), 0);
    }

    #[test]
    fn test_transaction_sees_its_own_staged_runs() {
        let store = HistoryStore::in_memory();
        let positions = store
            .transaction(|tx| {
                let first = tx.append("S", run("a", 1, 1.0));
                let second = tx.append("S", run("b", 2, 2.0));
                assert_eq!(second.history.len(), 1);
                (first.id.position, second.id.position, tx.runs("S").len())
            })
            .unwrap();
        assert_eq!(positions, (0, 1, 2));
        assert_eq!(store.load("S").len(), 2);
    }

    #[test]
    fn test_concurrent_appends_are_linearized() {
        let store = HistoryStore::in_memory();
        std::thread::scope(|scope| {
            for writer in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..25 {
                        store
                            .append("S", run(&format!("w{writer}-{i}"), i, i as f64))
                            .unwrap();
                    }
                });
            }
        });

        let runs = store.load("S");
        assert_eq!(runs.len(), 100);
        // Each writer's own runs stay in the order it appended them
        for writer in 0..4 {
            let prefix = format!("w{writer}-");
            let mine: Vec<u64> = runs
                .iter()
                .filter(|r| r.commit.id.starts_with(&prefix))
                .map(|r| r.date)
                .collect();
            assert_eq!(mine, (0..25).collect::<Vec<_>>());
        }
    }
}
