//! Property-based tests for the ledger and the regression analyzer
//!
//! Core properties covered:
//! 1. Ledger documents, including every finite measurement value, survive a
//!    persist/reload cycle in both file formats
//! 2. Appends preserve order and count
//! 3. A first observation is never flagged
//! 4. Non-positive baselines are always indeterminate
//! 5. Threshold classification is monotonic and exclusive at the boundary

use benchledger::model::{BenchResult, Commit, Ledger, Run};
use benchledger::regression::{analyze, compare, AnalysisPolicy, Comparison, Direction, Severity};
use benchledger::store::{FileBackend, HistoryStore, LedgerBackend, LedgerFormat};
use proptest::prelude::*;
use std::sync::Arc;

fn policy() -> AnalysisPolicy {
    AnalysisPolicy::new()
        .with_unit("ops/us", Direction::HigherIsBetter)
        .with_unit("ns/iter", Direction::LowerIsBetter)
}

fn run(commit: &str, date: u64, benches: &[(String, f64)]) -> Run {
    benches.iter().fold(
        Run::new(Commit::new(commit), date, "jmh"),
        |run, (name, value)| run.with_bench(BenchResult::new(name.clone(), *value, "ops/us")),
    )
}

// Positive values for the analyzer properties
fn value() -> impl Strategy<Value = f64> {
    (1u32..4_000_000).prop_map(|v| f64::from(v) / 4.0)
}

// Any finite f64, subnormals and extremes included
fn finite_value() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("finite", |v| v.is_finite())
}

fn benches_of(values: impl Strategy<Value = f64>) -> impl Strategy<Value = Vec<(String, f64)>> {
    prop::collection::btree_map("[a-zA-Z][a-zA-Z0-9_.]{0,12}", values, 1..5)
        .prop_map(|map| map.into_iter().collect())
}

fn benches() -> impl Strategy<Value = Vec<(String, f64)>> {
    benches_of(value())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_ledger_survives_reload(
        suites in prop::collection::btree_map(
            "[A-Za-z ]{1,16}",
            prop::collection::vec(benches_of(finite_value()), 1..4),
            1..4,
        ),
        data_js in any::<bool>(),
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let format = if data_js { LedgerFormat::DataJs } else { LedgerFormat::Json };
        let backend = FileBackend::new(dir.path().join("ledger")).with_format(format);

        let mut ledger = Ledger::new();
        for (suite, runs) in &suites {
            let runs = runs
                .iter()
                .enumerate()
                .map(|(i, benches)| Arc::new(run(&format!("c{i}"), i as u64 + 1, benches)))
                .collect();
            ledger.entries.insert(suite.clone(), runs);
        }
        ledger.last_update = ledger.max_run_date().unwrap_or(0);

        backend.commit(&ledger).unwrap();
        let reloaded = backend.load().unwrap();
        for (suite, runs) in &ledger.entries {
            for (stored, original) in reloaded.runs(suite).iter().zip(runs) {
                for (a, b) in stored.benches.iter().zip(&original.benches) {
                    prop_assert_eq!(a.value.to_bits(), b.value.to_bits());
                }
            }
        }
        prop_assert_eq!(reloaded, ledger);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_appends_keep_order(dates in prop::collection::vec(0u64..1_000_000, 1..20)) {
        let store = HistoryStore::in_memory();
        for (i, date) in dates.iter().enumerate() {
            let id = store
                .append("S", run(&format!("c{i}"), *date, &[("opA".to_string(), 1.0)]))
                .unwrap();
            prop_assert_eq!(id.position, i);
        }

        let runs = store.load("S");
        prop_assert_eq!(runs.len(), dates.len());
        let commits: Vec<_> = runs.iter().map(|r| r.commit.id.clone()).collect();
        let expected: Vec<_> = (0..dates.len()).map(|i| format!("c{i}")).collect();
        prop_assert_eq!(commits, expected);
        prop_assert!(store.last_update() >= *dates.iter().max().unwrap());

        let series = store.runs_for("S", "jmh", "opA");
        prop_assert!(series.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_first_observation_never_flagged(
        history in prop::collection::vec(value(), 0..5),
        new in benches(),
    ) {
        // History only knows "existing"; every name in `new` is unseen
        let history: Vec<_> = history
            .into_iter()
            .enumerate()
            .map(|(i, v)| Arc::new(run(&format!("h{i}"), i as u64, &[("existing-".to_string(), v)])))
            .collect();
        let new_run = run("n", 100, &new);

        let findings = analyze("S", &new_run, &history, &policy()).unwrap();
        prop_assert!(findings.is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_non_positive_baseline_indeterminate(
        baseline in -1_000.0f64..=0.0,
        new in value(),
        higher in any::<bool>(),
    ) {
        let direction = if higher { Direction::HigherIsBetter } else { Direction::LowerIsBetter };
        prop_assert_eq!(compare(baseline, new, direction, &policy()), Comparison::ZeroBaseline);

        let history = vec![Arc::new(run("a", 1, &[("opA".to_string(), baseline)]))];
        let new_run = run("b", 2, &[("opA".to_string(), new)]);
        let findings = analyze("S", &new_run, &history, &policy()).unwrap();
        prop_assert_eq!(findings.len(), 1);
        prop_assert_eq!(findings[0].severity, Severity::Indeterminate);
        prop_assert!(findings[0].ratio.is_none());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_higher_is_better_classification(baseline in value(), new in value()) {
        let policy = policy();
        let ratio = new / baseline;
        let outcome = compare(baseline, new, Direction::HigherIsBetter, &policy);

        match outcome {
            Comparison::Crossed { severity: Severity::Regression, ratio: r } => {
                prop_assert!(r < policy.lower_threshold);
                prop_assert!((r - ratio).abs() < 1e-12);
            }
            Comparison::Crossed { severity: Severity::Improvement, ratio: r } => {
                prop_assert!(r > policy.upper_threshold);
            }
            Comparison::Unchanged => {
                prop_assert!(ratio >= policy.lower_threshold && ratio <= policy.upper_threshold);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn prop_direction_mirrors(baseline in value(), new in value()) {
        let policy = policy();
        let higher = compare(baseline, new, Direction::HigherIsBetter, &policy);
        let lower = compare(baseline, new, Direction::LowerIsBetter, &policy);

        // A drop that regresses throughput improves latency, and vice versa
        match (higher, lower) {
            (Comparison::Crossed { severity: Severity::Regression, .. }, l) => {
                let mirrored = matches!(l, Comparison::Crossed { severity: Severity::Improvement, .. });
                prop_assert!(mirrored);
            }
            (Comparison::Crossed { severity: Severity::Improvement, .. }, l) => {
                let mirrored = matches!(l, Comparison::Crossed { severity: Severity::Regression, .. });
                prop_assert!(mirrored);
            }
            (h, l) => prop_assert_eq!(h, l),
        }
    }

    #[test]
    fn prop_equal_values_unchanged(v in value()) {
        prop_assert_eq!(compare(v, v, Direction::HigherIsBetter, &policy()), Comparison::Unchanged);
        prop_assert_eq!(compare(v, v, Direction::LowerIsBetter, &policy()), Comparison::Unchanged);
    }
}
