//! Tracing subscriber setup shared by the binaries.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::subscriber::SetGlobalDefaultError;

/// Environment variable holding the tracing filter directive.
pub const LOG_FILTER_ENV: &str = "TALLY_LOG";

/// Output format for log events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" => Ok(LogFormat::Plain),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// The filter comes from [`LOG_FILTER_ENV`] and defaults to `info`.
pub fn init_tracing(format: LogFormat) -> Result<(), SetGlobalDefaultError> {
    let filter = std::env::var(LOG_FILTER_ENV).unwrap_or_else(|_| "info".to_owned());
    let builder = tracing_subscriber::fmt::fmt()
        .without_time()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        LogFormat::Plain => tracing::subscriber::set_global_default(builder.finish()),
    }
}
