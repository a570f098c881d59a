// src/ingest/providers/newsapi.rs
//! REST news collector (newsapi.org compatible).
//!
//! `connect` probes `/top-headlines` with a one-result query; `collect` pulls
//! one page from `/everything`. Transport and payload failures are logged and
//! turned into `false` / `CollectOutcome::Failed`; no retries happen here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use metrics::{counter, histogram};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ingest::types::{
    CollectOutcome, CollectParams, Collector, FetchError, NormalizedRecord, ValidatedRecord,
};
use crate::ingest::validate::{RuleSet, NEWS_MIN_CONTENT_CHARS};

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org/v2";
const API_KEY_HEADER: &str = "X-Api-Key";
const DEFAULT_SORT_BY: &str = "publishedAt";

fn default_language() -> String {
    "en".to_string()
}
fn default_max_articles() -> u32 {
    100
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_id_prefix() -> String {
    "newsapi".to_string()
}
fn default_min_content_chars() -> usize {
    NEWS_MIN_CONTENT_CHARS
}

/// Settings owned by one collector instance. Immutable after construction.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewsApiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_max_articles")]
    pub max_articles: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

// Keep the key out of logs.
impl std::fmt::Debug for NewsApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsApiConfig")
            .field("api_key_len", &self.api_key.len())
            .field("keywords", &self.keywords)
            .field("language", &self.language)
            .field("max_articles", &self.max_articles)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("id_prefix", &self.id_prefix)
            .field("min_content_chars", &self.min_content_chars)
            .finish()
    }
}

impl NewsApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            keywords: Vec::new(),
            language: default_language(),
            max_articles: default_max_articles(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            id_prefix: default_id_prefix(),
            min_content_chars: default_min_content_chars(),
        }
    }

    /// Build from a flat map of collector settings (`api_key`, `keywords`, ...).
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let cfg: NewsApiConfig = toml::Value::Table(table.clone())
            .try_into()
            .context("parsing news collector settings")?;
        Ok(cfg)
    }

    /// Configuration errors are fatal: they surface here, at construction time.
    pub fn validated(mut self) -> Result<Self> {
        self.api_key = self.api_key.trim().to_string();
        if self.api_key.is_empty() {
            bail!("news collector: `api_key` is required");
        }
        if self.max_articles == 0 {
            bail!("news collector: `max_articles` must be positive");
        }
        if self.base_url.trim().is_empty() {
            bail!("news collector: `base_url` must not be empty");
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();

        // Ordered set: trim, drop empties and repeats, keep first occurrence.
        let mut seen = std::collections::HashSet::new();
        self.keywords = std::mem::take(&mut self.keywords)
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .collect();
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    source: RawSource,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    #[serde(rename = "urlToImage")]
    url_to_image: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    content: Option<String>,
}

/// Map a provider response body to records. Ids are `<prefix>_<index>` where
/// index is the article's position in the `articles` array; elements that do
/// not decode as an article are dropped without shifting the others' ids.
pub fn normalize_articles(prefix: &str, body: Value, collected_at: &str) -> Vec<NormalizedRecord> {
    let items = match body {
        Value::Object(mut map) => match map.remove("articles") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let article: RawArticle = match serde_json::from_value(item) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(target: "ingest", index = i, error = %e, "dropping malformed article");
                counter!("ingest_malformed_total", "source" => prefix.to_string()).increment(1);
                continue;
            }
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("author".to_string(), article.author);
        metadata.insert("description".to_string(), article.description);
        metadata.insert("url_to_image".to_string(), article.url_to_image);

        out.push(NormalizedRecord {
            id: format!("{prefix}_{i}"),
            source: article.source.name,
            title: article.title,
            content: article.content,
            url: article.url,
            published_at: article.published_at,
            collected_at: collected_at.to_string(),
            metadata,
        });
    }
    out
}

/// Keyword list OR-joined into a single search term.
pub fn search_term(keywords: &[String]) -> Option<String> {
    if keywords.is_empty() {
        None
    } else {
        Some(keywords.join(" OR "))
    }
}

pub struct NewsApiCollector {
    cfg: NewsApiConfig,
    rules: RuleSet,
    session: Option<reqwest::Client>,
    last_stamp_us: AtomicI64,
}

impl NewsApiCollector {
    pub fn new(cfg: NewsApiConfig) -> Result<Self> {
        let cfg = cfg.validated()?;
        let rules = RuleSet::standard(cfg.min_content_chars);
        Ok(Self {
            cfg,
            rules,
            session: None,
            last_stamp_us: AtomicI64::new(i64::MIN),
        })
    }

    pub fn config(&self) -> &NewsApiConfig {
        &self.cfg
    }

    fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("deepseeking/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(self.cfg.timeout_secs.max(1)))
            .build()
    }

    /// Query pairs for `/everything`; absent values are omitted.
    pub fn search_query(&self, params: Option<&CollectParams>) -> Vec<(&'static str, String)> {
        let page_size = params
            .and_then(|p| p.page_size)
            .map_or(self.cfg.max_articles, |n| n.clamp(1, self.cfg.max_articles));
        let sort_by = params
            .and_then(|p| p.sort_by.clone())
            .unwrap_or_else(|| DEFAULT_SORT_BY.to_string());

        let mut q = vec![
            ("language", self.cfg.language.clone()),
            ("pageSize", page_size.to_string()),
        ];
        if let Some(term) = search_term(&self.cfg.keywords) {
            q.push(("q", term));
        }
        q.push(("sortBy", sort_by));
        if let Some(from) = params.and_then(|p| p.start_date.clone()) {
            q.push(("from", from));
        }
        if let Some(to) = params.and_then(|p| p.end_date.clone()) {
            q.push(("to", to));
        }
        q
    }

    /// Wall-clock stamp, never earlier than a previous stamp of this instance.
    fn stamp_now(&self) -> String {
        let now = Utc::now().timestamp_micros();
        let prev = self.last_stamp_us.fetch_max(now, Ordering::SeqCst);
        let us = prev.max(now);
        DateTime::<Utc>::from_timestamp_micros(us)
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    async fn fetch_everything(
        &self,
        client: &reqwest::Client,
        params: Option<&CollectParams>,
    ) -> Result<Vec<NormalizedRecord>, FetchError> {
        let resp = client
            .get(format!("{}/everything", self.cfg.base_url))
            .header(API_KEY_HEADER, &self.cfg.api_key)
            .query(&self.search_query(params))
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        let collected_at = self.stamp_now();
        Ok(normalize_articles(&self.cfg.id_prefix, body, &collected_at))
    }
}

#[async_trait]
impl Collector for NewsApiCollector {
    fn name(&self) -> &str {
        &self.cfg.id_prefix
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn connect(&mut self) -> bool {
        let client = match self.build_client() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(target: "ingest", source = self.name(), error = %e, "failed to build http client");
                self.session = None;
                return false;
            }
        };

        let probe = client
            .get(format!("{}/top-headlines", self.cfg.base_url))
            .header(API_KEY_HEADER, &self.cfg.api_key)
            .query(&[("language", self.cfg.language.as_str()), ("pageSize", "1")])
            .send()
            .await;

        match probe {
            Ok(resp) if resp.status() == StatusCode::OK => {
                tracing::info!(target: "ingest", source = self.name(), "connected");
                self.session = Some(client);
                true
            }
            Ok(resp) => {
                tracing::error!(
                    target: "ingest",
                    source = self.name(),
                    status = resp.status().as_u16(),
                    "failed to connect to news provider"
                );
                self.session = None;
                false
            }
            Err(e) => {
                tracing::error!(target: "ingest", source = self.name(), error = %e, "failed to connect to news provider");
                self.session = None;
                false
            }
        }
    }

    async fn disconnect(&mut self) -> bool {
        if self.session.take().is_some() {
            tracing::debug!(target: "ingest", source = self.name(), "disconnected");
        }
        true
    }

    async fn collect(&self, params: Option<&CollectParams>) -> CollectOutcome {
        let Some(client) = self.session.as_ref() else {
            tracing::warn!(target: "ingest", source = self.name(), "collect called while disconnected");
            return CollectOutcome::Failed(FetchError::NotConnected);
        };

        let t0 = Instant::now();
        let res = self.fetch_everything(client, params).await;
        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_fetch_ms", "source" => self.name().to_string()).record(ms);

        match res {
            Ok(records) => {
                counter!("ingest_collected_total", "source" => self.name().to_string())
                    .increment(records.len() as u64);
                CollectOutcome::Fetched(records)
            }
            Err(e) => {
                tracing::error!(target: "ingest", source = self.name(), error = %e, "failed to collect news");
                counter!("ingest_provider_errors_total", "source" => self.name().to_string())
                    .increment(1);
                CollectOutcome::Failed(e)
            }
        }
    }

    fn validate(&self, records: Vec<NormalizedRecord>) -> Vec<ValidatedRecord> {
        self.rules.apply(records)
    }
}
