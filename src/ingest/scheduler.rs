// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::driver::{run_cycle, CycleStatus, RetryPolicy};
use crate::ingest::sink::{forward, RecordSink};
use crate::ingest::types::{CollectParams, Collector};

#[derive(Clone, Debug)]
pub struct IngestSchedulerCfg {
    pub interval_secs: u64,
    pub policy: RetryPolicy,
    pub params: Option<CollectParams>,
}

/// Spawn a task that runs one cycle per tick for `collector` until `cancel`
/// fires. The first tick is immediate. The task owns the collector, so its
/// cycles never overlap.
pub fn spawn_scheduler(
    mut collector: Box<dyn Collector>,
    cfg: IngestSchedulerCfg,
    sink: Arc<dyn RecordSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(cfg.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report =
                run_cycle(collector.as_mut(), cfg.params.as_ref(), &cfg.policy, &cancel).await;
            if report.status == CycleStatus::Cancelled {
                break;
            }
            forward(&report, sink.as_ref()).await;
        }
        tracing::info!(target: "ingest", source = collector.name(), "scheduler stopped");
    })
}

/// Await background tasks at shutdown. A task that panicked or was aborted is
/// logged; returns how many did so.
pub async fn join_all(tasks: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(target: "ingest", error = %e, "background task failed");
            failed += 1;
        }
    }
    failed
}
