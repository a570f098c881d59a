// src/ingest/driver.rs
//! Cycle driver: connect -> collect -> validate -> disconnect for one
//! collector, with a bounded retry budget per step and guaranteed release.

use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::CollectorSettings;
use crate::ingest::types::{CollectOutcome, CollectParams, Collector, FetchError, ValidatedRecord};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry budget applied independently to `connect` and `collect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per step, including the first one (at least 1).
    pub max_attempts: u32,
    /// Bound on a single attempt, not on the whole cycle.
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(s: &CollectorSettings) -> Self {
        Self {
            max_attempts: s.max_retries.max(1),
            attempt_timeout: Duration::from_secs(s.timeout.max(1)),
            backoff_base: Duration::from_millis(s.backoff_ms),
        }
    }

    /// Delay after the given (1-based) failed attempt: base << (attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .checked_mul(1u32 << shift)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    ConnectFailed,
    CollectFailed,
    Cancelled,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Completed => "completed",
            CycleStatus::ConnectFailed => "connect_failed",
            CycleStatus::CollectFailed => "collect_failed",
            CycleStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one cycle. Record ids are namespaced as `<cycle_id>:<batch id>`
/// so they stay unique across cycles.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub source: String,
    pub status: CycleStatus,
    pub connect_attempts: u32,
    pub collect_attempts: u32,
    pub collected: usize,
    pub records: Vec<ValidatedRecord>,
    pub last_error: Option<String>,
    pub finished_at: String,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.status == CycleStatus::Completed
    }
}

/// Prefix every id with the cycle id.
pub fn namespace_ids(cycle_id: &str, records: Vec<ValidatedRecord>) -> Vec<ValidatedRecord> {
    records
        .into_iter()
        .map(|mut r| {
            r.id = format!("{cycle_id}:{}", r.id);
            r
        })
        .collect()
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn backoff_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

struct Progress {
    connect_attempts: u32,
    collect_attempts: u32,
    collected: usize,
    records: Vec<ValidatedRecord>,
    last_error: Option<String>,
}

async fn drive<C: Collector + ?Sized>(
    collector: &mut C,
    params: Option<&CollectParams>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    p: &mut Progress,
) -> CycleStatus {
    let max = policy.max_attempts.max(1);

    let mut connected = false;
    for attempt in 1..=max {
        if cancel.is_cancelled() {
            return CycleStatus::Cancelled;
        }
        p.connect_attempts = attempt;
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CycleStatus::Cancelled,
            r = tokio::time::timeout(policy.attempt_timeout, collector.connect()) => r,
        };
        match res {
            Ok(true) => {
                connected = true;
                break;
            }
            Ok(false) => p.last_error = Some("connect failed".to_string()),
            Err(_) => p.last_error = Some(FetchError::Timeout.to_string()),
        }
        tracing::warn!(target: "ingest", source = collector.name(), attempt, "connect attempt failed");
        if attempt < max && !backoff_or_cancel(policy.backoff(attempt), cancel).await {
            return CycleStatus::Cancelled;
        }
    }
    if !connected {
        return CycleStatus::ConnectFailed;
    }

    let mut batch = None;
    for attempt in 1..=max {
        if cancel.is_cancelled() {
            return CycleStatus::Cancelled;
        }
        p.collect_attempts = attempt;
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CycleStatus::Cancelled,
            r = tokio::time::timeout(policy.attempt_timeout, collector.collect(params)) => r,
        };
        let err = match res.unwrap_or(CollectOutcome::Failed(FetchError::Timeout)) {
            CollectOutcome::Fetched(records) => {
                batch = Some(records);
                break;
            }
            CollectOutcome::Failed(e) => e,
        };
        let retryable = err.is_retryable();
        tracing::warn!(target: "ingest", source = collector.name(), attempt, error = %err, retryable, "collect attempt failed");
        p.last_error = Some(err.to_string());
        if !retryable {
            break;
        }
        if attempt < max && !backoff_or_cancel(policy.backoff(attempt), cancel).await {
            return CycleStatus::Cancelled;
        }
    }
    let Some(records) = batch else {
        return CycleStatus::CollectFailed;
    };

    p.collected = records.len();
    p.records = collector.validate(records);
    CycleStatus::Completed
}

/// Run one full cycle. `disconnect` is attempted on every exit path,
/// including failures and cancellation.
pub async fn run_cycle<C: Collector + ?Sized>(
    collector: &mut C,
    params: Option<&CollectParams>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> CycleReport {
    super::ensure_metrics_described();

    let cycle_id = Uuid::new_v4().to_string();
    let source = collector.name().to_string();
    let mut progress = Progress {
        connect_attempts: 0,
        collect_attempts: 0,
        collected: 0,
        records: Vec::new(),
        last_error: None,
    };

    let status = drive(collector, params, policy, cancel, &mut progress).await;

    if !collector.disconnect().await {
        tracing::warn!(target: "ingest", source = %source, "disconnect reported failure");
    }

    let now = chrono::Utc::now();
    counter!("ingest_cycles_total", "source" => source.clone(), "status" => status.as_str())
        .increment(1);
    counter!("ingest_validated_total", "source" => source.clone())
        .increment(progress.records.len() as u64);
    gauge!("ingest_last_cycle_ts").set(now.timestamp() as f64);

    tracing::info!(
        target: "ingest",
        source = %source,
        cycle = %cycle_id,
        status = status.as_str(),
        collected = progress.collected,
        validated = progress.records.len(),
        "ingest cycle finished"
    );

    CycleReport {
        records: namespace_ids(&cycle_id, progress.records),
        cycle_id,
        source,
        status,
        connect_attempts: progress.connect_attempts,
        collect_attempts: progress.collect_attempts,
        collected: progress.collected,
        last_error: progress.last_error,
        finished_at: now.to_rfc3339(),
    }
}

/// Run one cycle per collector in parallel. Each task owns its collector
/// exclusively; collectors come back with their reports in input order.
/// A collector whose task panicked is dropped and logged.
pub async fn run_concurrently(
    collectors: Vec<Box<dyn Collector>>,
    params: Option<CollectParams>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> Vec<(Box<dyn Collector>, CycleReport)> {
    let mut set = JoinSet::new();
    for (idx, mut collector) in collectors.into_iter().enumerate() {
        let params = params.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let report = run_cycle(collector.as_mut(), params.as_ref(), &policy, &cancel).await;
            (idx, collector, report)
        });
    }

    let mut done = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(item) => done.push(item),
            Err(e) => tracing::error!(target: "ingest", error = %e, "collector task failed"),
        }
    }
    done.sort_by_key(|(idx, _, _)| *idx);
    done.into_iter().map(|(_, c, r)| (c, r)).collect()
}
