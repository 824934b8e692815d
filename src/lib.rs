//! Benchledger - benchmark history ledger with baseline regression detection
//!
//! This library records benchmark runs per suite in an append-only ledger,
//! compares each new run against a rolling baseline of prior runs, and emits
//! a report the CI caller can act on. Old history is bounded by retention
//! policies that never remove a current benchmark's baseline.
//!
//! Flow: [`validate`] → [`store`] (append) → [`regression`] (analyze) →
//! [`report`] (emit), with [`retention`] running after appends or on demand.
//! [`pipeline`] wires these together for one CI invocation.

pub mod cli;
pub mod model;
pub mod pipeline;
pub mod regression;
pub mod report;
pub mod retention;
pub mod store;
pub mod validate;
