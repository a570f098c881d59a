// tests/ingest_cycle.rs
//
// Cycle driver behaviour with a scripted collector:
// retries per step, acceptable empty batches, non-retryable errors,
// per-attempt timeouts, cancellation and guaranteed disconnect.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use deepseeking::ingest::{run_concurrently, FetchError, RuleSet};
use deepseeking::{
    run_cycle, CollectOutcome, CollectParams, Collector, CycleStatus, NormalizedRecord,
    RetryPolicy, ValidatedRecord,
};

#[derive(Default)]
struct Script {
    connects: VecDeque<bool>,
    collects: VecDeque<CollectOutcome>,
    hang_connect: bool,
    collect_delay: Option<Duration>,
}

struct ScriptedCollector {
    name: String,
    script: Mutex<Script>,
    connected: bool,
    disconnects: Arc<AtomicUsize>,
    collect_calls: Arc<AtomicUsize>,
}

impl ScriptedCollector {
    fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script),
            connected: false,
            disconnects: Arc::new(AtomicUsize::new(0)),
            collect_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> bool {
        let (hang, ok) = {
            let mut s = self.script.lock().unwrap();
            (s.hang_connect, s.connects.pop_front().unwrap_or(false))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.connected = ok;
        ok
    }

    async fn disconnect(&mut self) -> bool {
        self.connected = false;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn collect(&self, _params: Option<&CollectParams>) -> CollectOutcome {
        self.collect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            return CollectOutcome::Failed(FetchError::NotConnected);
        }
        let (delay, next) = {
            let mut s = self.script.lock().unwrap();
            (
                s.collect_delay,
                s.collects
                    .pop_front()
                    .unwrap_or(CollectOutcome::Fetched(vec![])),
            )
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        next
    }

    fn validate(&self, records: Vec<NormalizedRecord>) -> Vec<ValidatedRecord> {
        RuleSet::news().apply(records)
    }
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        attempt_timeout: Duration::from_secs(2),
        backoff_base: Duration::from_millis(1),
    }
}

fn record(i: usize, content: &str) -> NormalizedRecord {
    NormalizedRecord {
        id: format!("scripted_{i}"),
        source: "Scripted".into(),
        title: Some(format!("Title {i}")),
        content: Some(content.to_string()),
        url: Some(format!("https://test.com/{i}")),
        published_at: Some("2024-01-27T12:00:00Z".into()),
        collected_at: "2024-01-27T12:30:00Z".into(),
        metadata: BTreeMap::new(),
    }
}

#[tokio::test]
async fn connect_is_retried_until_it_succeeds() {
    let long = "c".repeat(120);
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([false, false, true]),
            collects: VecDeque::from([CollectOutcome::Fetched(vec![
                record(0, &long),
                record(1, "short"),
            ])]),
            ..Script::default()
        },
    );
    let disconnects = c.disconnects.clone();

    let report = run_cycle(&mut c, None, &fast_policy(3), &CancellationToken::new()).await;
    assert_eq!(report.status, CycleStatus::Completed);
    assert!(report.is_success());
    assert_eq!(report.connect_attempts, 3);
    assert_eq!(report.collect_attempts, 1);
    assert_eq!(report.collected, 2);
    assert_eq!(report.records.len(), 1);
    assert_eq!(
        report.records[0].id,
        format!("{}:scripted_0", report.cycle_id)
    );
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(!c.is_connected());
}

#[tokio::test]
async fn exhausted_connect_budget_still_disconnects() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([false, false, false, true]),
            ..Script::default()
        },
    );
    let disconnects = c.disconnects.clone();
    let calls = c.collect_calls.clone();

    let report = run_cycle(&mut c, None, &fast_policy(3), &CancellationToken::new()).await;
    assert_eq!(report.status, CycleStatus::ConnectFailed);
    assert_eq!(report.connect_attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(report.records.is_empty());
}

#[tokio::test]
async fn retryable_collect_failures_are_retried() {
    let long = "c".repeat(120);
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([true]),
            collects: VecDeque::from([
                CollectOutcome::Failed(FetchError::Status(503)),
                CollectOutcome::Failed(FetchError::Transport("reset".into())),
                CollectOutcome::Fetched(vec![record(0, &long)]),
            ]),
            ..Script::default()
        },
    );
    let report = run_cycle(&mut c, None, &fast_policy(3), &CancellationToken::new()).await;
    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.collect_attempts, 3);
    assert_eq!(report.records.len(), 1);
}

#[tokio::test]
async fn non_retryable_collect_failure_stops_immediately() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([true]),
            collects: VecDeque::from([CollectOutcome::Failed(FetchError::Status(401))]),
            ..Script::default()
        },
    );
    let disconnects = c.disconnects.clone();
    let report = run_cycle(&mut c, None, &fast_policy(5), &CancellationToken::new()).await;
    assert_eq!(report.status, CycleStatus::CollectFailed);
    assert_eq!(report.collect_attempts, 1);
    assert_eq!(
        report.last_error.as_deref(),
        Some("provider returned HTTP 401")
    );
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_batch_is_acceptable_and_not_retried() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([true]),
            collects: VecDeque::from([CollectOutcome::Fetched(vec![])]),
            ..Script::default()
        },
    );
    let calls = c.collect_calls.clone();
    let report = run_cycle(&mut c, None, &fast_policy(3), &CancellationToken::new()).await;
    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.collected, 0);
}

#[tokio::test]
async fn hung_connect_hits_per_attempt_timeout() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            hang_connect: true,
            ..Script::default()
        },
    );
    let disconnects = c.disconnects.clone();
    let policy = RetryPolicy {
        max_attempts: 2,
        attempt_timeout: Duration::from_millis(20),
        backoff_base: Duration::from_millis(1),
    };
    let report = run_cycle(&mut c, None, &policy, &CancellationToken::new()).await;
    assert_eq!(report.status, CycleStatus::ConnectFailed);
    assert_eq!(report.connect_attempts, 2);
    assert_eq!(report.last_error.as_deref(), Some("attempt timed out"));
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_collect_times_out_and_is_retried() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([true]),
            collect_delay: Some(Duration::from_millis(200)),
            ..Script::default()
        },
    );
    let calls = c.collect_calls.clone();
    let policy = RetryPolicy {
        max_attempts: 2,
        attempt_timeout: Duration::from_millis(20),
        backoff_base: Duration::from_millis(1),
    };
    let report = run_cycle(&mut c, None, &policy, &CancellationToken::new()).await;
    assert_eq!(report.status, CycleStatus::CollectFailed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelled_before_start_still_disconnects() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([true]),
            ..Script::default()
        },
    );
    let disconnects = c.disconnects.clone();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = run_cycle(&mut c, None, &fast_policy(3), &cancel).await;
    assert_eq!(report.status, CycleStatus::Cancelled);
    assert_eq!(report.connect_attempts, 0);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_interrupts_in_flight_attempt() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            hang_connect: true,
            ..Script::default()
        },
    );
    let disconnects = c.disconnects.clone();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let policy = RetryPolicy {
        max_attempts: 3,
        attempt_timeout: Duration::from_secs(30),
        backoff_base: Duration::from_millis(1),
    };
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        run_cycle(&mut c, None, &policy, &cancel),
    )
    .await
    .expect("cancellation must end the cycle");
    assert_eq!(report.status, CycleStatus::Cancelled);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_during_backoff_ends_cycle() {
    let mut c = ScriptedCollector::new(
        "s",
        Script {
            connects: VecDeque::from([false, true]),
            ..Script::default()
        },
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });
    let policy = RetryPolicy {
        max_attempts: 2,
        attempt_timeout: Duration::from_secs(1),
        backoff_base: Duration::from_secs(30),
    };
    let report = tokio::time::timeout(
        Duration::from_secs(5),
        run_cycle(&mut c, None, &policy, &cancel),
    )
    .await
    .expect("cancellation must end the backoff");
    assert_eq!(report.status, CycleStatus::Cancelled);
    assert_eq!(report.connect_attempts, 1);
}

#[tokio::test]
async fn collectors_run_concurrently_and_return_in_order() {
    let long = "c".repeat(120);
    let slow = ScriptedCollector::new(
        "slow",
        Script {
            connects: VecDeque::from([true]),
            collects: VecDeque::from([CollectOutcome::Fetched(vec![record(0, &long)])]),
            collect_delay: Some(Duration::from_millis(100)),
            ..Script::default()
        },
    );
    let failing = ScriptedCollector::new("failing", Script::default());
    let fast = ScriptedCollector::new(
        "fast",
        Script {
            connects: VecDeque::from([true]),
            ..Script::default()
        },
    );
    let collectors: Vec<Box<dyn Collector>> =
        vec![Box::new(slow), Box::new(failing), Box::new(fast)];

    let started = std::time::Instant::now();
    let out = run_concurrently(collectors, None, fast_policy(1), CancellationToken::new()).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    let names: Vec<_> = out.iter().map(|(c, _)| c.name().to_string()).collect();
    assert_eq!(names, vec!["slow", "failing", "fast"]);
    let statuses: Vec<_> = out.iter().map(|(_, r)| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            CycleStatus::Completed,
            CycleStatus::ConnectFailed,
            CycleStatus::Completed
        ]
    );
    assert_eq!(out[0].1.records.len(), 1);
    assert!(out.iter().all(|(c, _)| !c.is_connected()));
}
