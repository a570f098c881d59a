// src/ingest/mod.rs
//! Data ingestion: the collector contract, concrete providers, the
//! validation rule engine and the cycle driver that sequences them.
//!
//! Flow is one-way: provider response -> `NormalizedRecord` ->
//! `ValidatedRecord` -> `RecordSink`.

pub mod driver;
pub mod providers;
pub mod scheduler;
pub mod sink;
pub mod types;
pub mod validate;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use driver::{run_concurrently, run_cycle, CycleReport, CycleStatus, RetryPolicy};
pub use sink::{forward, LogSink, MemorySink, RecordSink};
pub use types::{
    CollectOutcome, CollectParams, Collector, FetchError, NormalizedRecord, ValidatedRecord,
};
pub use validate::{Rejection, Rule, RuleSet};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_cycles_total",
            "Ingest cycles finished, by source and status."
        );
        describe_counter!(
            "ingest_collected_total",
            "Records normalized from provider responses."
        );
        describe_counter!(
            "ingest_validated_total",
            "Records that passed validation."
        );
        describe_counter!(
            "ingest_rejected_total",
            "Records rejected by validation, by reason."
        );
        describe_counter!(
            "ingest_malformed_total",
            "Provider items dropped because they did not decode."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
        describe_gauge!(
            "ingest_last_cycle_ts",
            "Unix ts when an ingest cycle last finished."
        );
    });
}
