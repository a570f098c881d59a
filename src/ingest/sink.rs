// src/ingest/sink.rs
use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use crate::ingest::driver::CycleReport;

/// Downstream consumer of one cycle's validated records.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    async fn consume(&self, report: &CycleReport) -> Result<()>;
}

/// Hand a completed cycle to the sink. Sink failures are logged, never fatal;
/// unsuccessful cycles are not forwarded.
pub async fn forward(report: &CycleReport, sink: &dyn RecordSink) -> bool {
    if !report.is_success() {
        return false;
    }
    match sink.consume(report).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(target: "ingest", source = %report.source, error = ?e, "sink rejected batch");
            false
        }
    }
}

/// Logs batch sizes only.
pub struct LogSink;

#[async_trait::async_trait]
impl RecordSink for LogSink {
    async fn consume(&self, report: &CycleReport) -> Result<()> {
        tracing::info!(
            target: "ingest",
            source = %report.source,
            cycle = %report.cycle_id,
            records = report.records.len(),
            "batch ready"
        );
        Ok(())
    }
}

/// Keeps the latest report per source (served by `/ingest/last`).
#[derive(Default)]
pub struct MemorySink {
    last: RwLock<HashMap<String, CycleReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, source: &str) -> Option<CycleReport> {
        self.last.read().ok()?.get(source).cloned()
    }

    /// All sources, sorted by name.
    pub fn snapshot(&self) -> Vec<CycleReport> {
        let mut v: Vec<CycleReport> = self
            .last
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        v.sort_by(|a, b| a.source.cmp(&b.source));
        v
    }
}

#[async_trait::async_trait]
impl RecordSink for MemorySink {
    async fn consume(&self, report: &CycleReport) -> Result<()> {
        let mut g = self
            .last
            .write()
            .map_err(|_| anyhow::anyhow!("memory sink lock poisoned"))?;
        g.insert(report.source.clone(), report.clone());
        Ok(())
    }
}
