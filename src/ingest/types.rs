// src/ingest/types.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical post-fetch representation of one collected item.
///
/// `id` is batch-local: it is unique within the records returned by a single
/// `collect` call and nothing more. The cycle driver namespaces it before
/// records leave the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub id: String,
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>, // ISO-8601 as sent by the provider
    pub collected_at: String,         // RFC 3339 UTC, stamped at transform time
    #[serde(default)]
    pub metadata: BTreeMap<String, Option<String>>,
}

/// A record that passed every validation rule. Same shape; validation only filters.
pub type ValidatedRecord = NormalizedRecord;

/// Source-specific filters for one `collect` call. Absent values are not sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sort_by: Option<String>,
    /// Clamped to the collector's configured maximum.
    pub page_size: Option<u32>,
}

impl CollectParams {
    pub fn between(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start_date: Some(start.into()),
            end_date: Some(end.into()),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort_by: impl Into<String>) -> Self {
        self.sort_by = Some(sort_by.into());
        self
    }
}

/// Why a fetch produced no batch. Recovered at the collector boundary.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("collector is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("malformed provider payload: {0}")]
    Decode(String),
    #[error("attempt timed out")]
    Timeout,
}

impl FetchError {
    /// Whether another attempt within the same cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::NotConnected | FetchError::Decode(_) => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NotConnected => "not_connected",
            FetchError::Transport(_) => "transport",
            FetchError::Status(_) => "status",
            FetchError::Decode(_) => "decode",
            FetchError::Timeout => "timeout",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Result of one `collect` call: either a batch (possibly empty) or the cause
/// of an absorbed failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    Fetched(Vec<NormalizedRecord>),
    Failed(FetchError),
}

impl CollectOutcome {
    /// Degrade to a batch: failures become an empty sequence.
    pub fn into_records(self) -> Vec<NormalizedRecord> {
        match self {
            CollectOutcome::Fetched(v) => v,
            CollectOutcome::Failed(_) => Vec::new(),
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            CollectOutcome::Fetched(_) => None,
            CollectOutcome::Failed(e) => Some(e),
        }
    }
}

/// Lifecycle every data source implements:
/// `Disconnected -> connect -> Connected -> collect* -> disconnect -> Disconnected`.
///
/// `connect`, `disconnect` and `collect` never propagate transport failures;
/// they log and report `false` / `CollectOutcome::Failed`. Calling `collect`
/// while disconnected yields `Failed(FetchError::NotConnected)`.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> bool;

    /// Idempotent; releasing an absent session is not an error.
    async fn disconnect(&mut self) -> bool;

    async fn collect(&self, params: Option<&CollectParams>) -> CollectOutcome;

    /// Pure filter, preserves input order.
    fn validate(&self, records: Vec<NormalizedRecord>) -> Vec<ValidatedRecord>;
}
