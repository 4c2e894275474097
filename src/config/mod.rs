//! Typed configuration.
//!
//! Loaded once at startup from environment variables or a TOML file; bad
//! values fail fast with [`Error::Config`].

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::runner::{DEFAULT_INITIAL_BACKOFF, RunnerConfig};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Delay of the first backoff timer, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Optional ceiling for the backoff delay, in milliseconds.
    pub max_backoff_ms: Option<u64>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF.as_millis() as u64,
            max_backoff_ms: None,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this. Unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            initial_backoff_ms: millis_var("FDRUN_INITIAL_BACKOFF_MS")?
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: millis_var("FDRUN_MAX_BACKOFF_MS")?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: self.max_backoff_ms.map(Duration::from_millis),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.initial_backoff_ms == 0 {
            return Err(Error::Config(
                "initial backoff must be greater than zero".to_string(),
            ));
        }
        match self.max_backoff_ms {
            Some(max) if max < self.initial_backoff_ms => Err(Error::Config(format!(
                "max backoff ({max} ms) is below initial backoff ({} ms)",
                self.initial_backoff_ms
            ))),
            _ => Ok(()),
        }
    }
}

fn millis_var(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::Config(format!("{name} must be a whole number of milliseconds, got {raw:?}"))
        }),
        Err(_) => Ok(None),
    }
}
