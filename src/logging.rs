//! Structured logging on top of `tracing`.
//!
//! Filter priority: the `SCRIPTORIUM_LOG` environment variable, then the
//! `--verbose` flag, then `[logging] level` from the config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

pub const LOG_ENV_VAR: &str = "SCRIPTORIUM_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off, or a full filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Install the global subscriber, writing to stderr so stdout stays free for
/// event output. Calling it again after a subscriber is installed does nothing.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = build_filter(std::env::var(LOG_ENV_VAR).ok(), config, verbose)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    // Err here only means a subscriber is already set.
    let _ = installed;
    Ok(())
}

fn build_filter(env: Option<String>, config: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    if let Some(directive) = env.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(&directive)
            .with_context(|| format!("invalid {LOG_ENV_VAR} filter: {directive}"));
    }
    let level = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))
}
