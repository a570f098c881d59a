// src/ingest/providers/mod.rs
pub mod newsapi;

pub use newsapi::{NewsApiCollector, NewsApiConfig};
