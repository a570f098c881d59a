//! DeepSeeking ingest service: binary entrypoint.
//! Loads layered settings, starts one scheduler per configured collector and
//! serves `/health`, `/ingest/last` and `/metrics` until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use deepseeking::api::{self, AppState};
use deepseeking::config::Settings;
use deepseeking::ingest::scheduler::{join_all, spawn_scheduler, IngestSchedulerCfg};
use deepseeking::ingest::{LogSink, MemorySink, RecordSink, RetryPolicy};
use deepseeking::metrics::Metrics;
use deepseeking::{telemetry, NewsApiCollector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    // Configuration errors are the only ones allowed to abort startup.
    let cfg_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(cfg_path.as_deref()).context("loading settings")?;
    telemetry::init(&settings.logging).context("initializing logging")?;
    let metrics = Metrics::init()?;

    let memory = Arc::new(MemorySink::new());
    let sink: Arc<dyn RecordSink> = if settings.server.enabled {
        memory.clone() as Arc<dyn RecordSink>
    } else {
        Arc::new(LogSink)
    };
    let cancel = CancellationToken::new();
    let collectors = &settings.data.collectors;
    let sched_cfg = IngestSchedulerCfg {
        interval_secs: collectors.interval_secs,
        policy: RetryPolicy::from_settings(collectors),
        params: None,
    };

    let mut tasks = Vec::new();
    if let Some(news) = settings.news_config()? {
        let collector = NewsApiCollector::new(news)?;
        info!(?sched_cfg, "starting news collector");
        tasks.push(spawn_scheduler(
            Box::new(collector),
            sched_cfg.clone(),
            sink.clone(),
            cancel.clone(),
        ));
    } else {
        warn!("no collectors configured (set NEWSAPI_API_KEY or [data.collectors.news])");
    }

    if settings.server.enabled {
        let addr = settings.bind_addr()?;
        let app = api::router(AppState { sink: memory }).merge(metrics.router());
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(%addr, "http listening");
        let shutdown = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(e) = server.await {
                tracing::error!(error = %e, "http server failed");
            }
        }));
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    cancel.cancel();
    join_all(tasks).await;
    Ok(())
}
