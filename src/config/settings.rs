// src/config/settings.rs
//! Layered settings: built-in defaults -> optional TOML file -> environment
//! -> validation. Only validation errors stop startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::providers::newsapi::NewsApiConfig;

pub const ENV_CONFIG_PATH: &str = "DEEPSEEKING_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/deepseeking.toml";

pub const ENV_NEWSAPI_KEY: &str = "NEWSAPI_API_KEY";
pub const ENV_MAX_RETRIES: &str = "DEEPSEEKING_MAX_RETRIES";
pub const ENV_TIMEOUT: &str = "DEEPSEEKING_COLLECTOR_TIMEOUT";
pub const ENV_BIND_ADDR: &str = "DEEPSEEKING_BIND_ADDR";
pub const ENV_LOG_JSON: &str = "DEEPSEEKING_LOG_JSON";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub logging: LoggingSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSettings {
    pub collectors: CollectorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorSettings {
    /// Total attempts per connect/collect step.
    pub max_retries: u32,
    /// Per-attempt timeout, seconds.
    pub timeout: u64,
    pub backoff_ms: u64,
    pub interval_secs: u64,
    /// Flat settings map for the news collector; absent = collector disabled.
    pub news: Option<toml::Table>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: 10,
            backoff_ms: 500,
            interval_secs: 300,
            news: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Optional append-only log file next to the console output.
    pub file: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Recursively merge `update` into `base`; tables merge key by key, anything
/// else replaces.
pub fn merge_tables(base: &mut toml::Table, update: toml::Table) {
    for (k, v) in update {
        match (base.get_mut(&k), v) {
            (Some(toml::Value::Table(b)), toml::Value::Table(u)) => merge_tables(b, u),
            (_, v) => {
                base.insert(k, v);
            }
        }
    }
}

impl Settings {
    /// Load using `path`, else `$DEEPSEEKING_CONFIG`, else
    /// `config/deepseeking.toml` when it exists. Environment from the process.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match resolve_path(path)? {
            Some(p) => Some(read_table(&p)?),
            None => None,
        };
        Self::from_sources(file, |k| env::var(k).ok())
    }

    /// Layering core; `env` is injected so tests do not touch the process.
    pub fn from_sources(
        file: Option<toml::Table>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut merged = match toml::Value::try_from(Settings::default())? {
            toml::Value::Table(t) => t,
            _ => bail!("default settings did not serialize to a table"),
        };
        if let Some(file) = file {
            merge_tables(&mut merged, file);
        }
        let mut settings: Settings = toml::Value::Table(merged)
            .try_into()
            .context("invalid settings")?;
        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        let c = &mut self.data.collectors;
        if let Some(key) = env(ENV_NEWSAPI_KEY).filter(|k| !k.trim().is_empty()) {
            c.news
                .get_or_insert_with(toml::Table::new)
                .insert("api_key".to_string(), toml::Value::String(key));
        }
        // "ENV" means: the key must come from NEWSAPI_API_KEY.
        if let Some(news) = &c.news {
            let placeholder = news
                .get("api_key")
                .and_then(toml::Value::as_str)
                .is_some_and(|k| k.trim().eq_ignore_ascii_case("env"));
            if placeholder {
                bail!("Missing {ENV_NEWSAPI_KEY} env var");
            }
        }
        if let Some(v) = env(ENV_MAX_RETRIES) {
            c.max_retries = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_RETRIES} must be an integer"))?;
        }
        if let Some(v) = env(ENV_TIMEOUT) {
            c.timeout = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_TIMEOUT} must be an integer"))?;
        }
        if let Some(v) = env(ENV_BIND_ADDR) {
            self.server.bind_addr = v.trim().to_string();
        }
        if let Some(v) = env(ENV_LOG_JSON) {
            self.logging.json = matches!(v.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.data.collectors;
        if c.timeout == 0 {
            bail!("data.collectors.timeout must be positive");
        }
        if c.interval_secs == 0 {
            bail!("data.collectors.interval_secs must be positive");
        }
        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            bail!("logging.level `{}` is not a level", self.logging.level);
        }
        if self.server.enabled {
            self.bind_addr()?;
        }
        self.news_config()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .with_context(|| format!("server.bind_addr `{}`", self.server.bind_addr))
    }

    /// Validated news collector settings, if that collector is configured.
    /// The HTTP timeout follows `data.collectors.timeout` unless the news
    /// table sets its own `timeout_secs`.
    pub fn news_config(&self) -> Result<Option<NewsApiConfig>> {
        let c = &self.data.collectors;
        let Some(table) = &c.news else {
            return Ok(None);
        };
        let mut table = table.clone();
        if !table.contains_key("timeout_secs") {
            let timeout = i64::try_from(c.timeout).context("data.collectors.timeout")?;
            table.insert("timeout_secs".to_string(), toml::Value::Integer(timeout));
        }
        Ok(Some(NewsApiConfig::from_table(&table)?.validated()?))
    }

    /// Dot-path lookup, e.g. `data.collectors.max_retries`.
    pub fn get_nested(&self, key_path: &str) -> Option<toml::Value> {
        let mut value = toml::Value::try_from(self).ok()?;
        for key in key_path.split('.') {
            value = match value {
                toml::Value::Table(mut t) => t.remove(key)?,
                _ => return None,
            };
        }
        Some(value)
    }
}

fn resolve_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = explicit {
        if !p.exists() {
            return Err(anyhow!("config file not found: {}", p.display()));
        }
        return Ok(Some(p.to_path_buf()));
    }
    if let Ok(p) = env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        return Ok(Some(pb));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    Ok(default.exists().then_some(default))
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
