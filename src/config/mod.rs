// src/config/mod.rs
pub mod settings;

pub use settings::{CollectorSettings, LoggingSettings, ServerSettings, Settings};
