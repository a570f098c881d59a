// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::config::Settings;
pub use crate::ingest::providers::{NewsApiCollector, NewsApiConfig};
pub use crate::ingest::{
    run_cycle, CollectOutcome, CollectParams, Collector, CycleReport, CycleStatus,
    NormalizedRecord, RetryPolicy, ValidatedRecord,
};
