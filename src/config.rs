//! Aggregator configuration.
//!
//! Settings are read from a JSON document and may be overridden from the
//! environment:
//!
//! | field            | env var                | default |
//! |------------------|------------------------|---------|
//! | `quorum`         | `TALLY_QUORUM`         | `1`     |
//! | `require_digest` | `TALLY_REQUIRE_DIGEST` | `true`  |
//! | `log_format`     | `TALLY_LOG_FORMAT`     | `plain` |

use crate::{
    aggregator::{Quorum, QuorumAggregator, QuorumError},
    batch::BatchOptions,
    logging::LogFormat,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;

/// Environment override for [`AggregatorConfig::quorum`].
pub const QUORUM_ENV: &str = "TALLY_QUORUM";
/// Environment override for [`AggregatorConfig::require_digest`].
pub const REQUIRE_DIGEST_ENV: &str = "TALLY_REQUIRE_DIGEST";
/// Environment override for [`AggregatorConfig::log_format`].
pub const LOG_FORMAT_ENV: &str = "TALLY_LOG_FORMAT";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    /// The config file could not be read.
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    /// The config document is not valid JSON for this schema.
    Parse(#[from] serde_json::Error),
    #[error("invalid value {value:?} for {var}")]
    /// An environment override could not be parsed.
    Env {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
    #[error(transparent)]
    /// The configured quorum is not usable.
    Quorum(#[from] QuorumError),
}

/// Settings for a quorum aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Votes one identifier needs to win.
    pub quorum: usize,
    /// Reject batches without a digest trailer.
    pub require_digest: bool,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            quorum: 1,
            require_digest: true,
            log_format: LogFormat::Plain,
        }
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var,
            value: value.to_string(),
        }),
    }
}

impl AggregatorConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Reads a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Applies overrides looked up through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(QUORUM_ENV) {
            self.quorum = value.trim().parse().map_err(|_| ConfigError::Env {
                var: QUORUM_ENV,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(REQUIRE_DIGEST_ENV) {
            self.require_digest = parse_bool(REQUIRE_DIGEST_ENV, &value)?;
        }
        if let Some(value) = lookup(LOG_FORMAT_ENV) {
            self.log_format = value.parse().map_err(|_| ConfigError::Env {
                var: LOG_FORMAT_ENV,
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    /// Checks the quorum and returns it validated.
    pub fn validate(&self) -> Result<Quorum, ConfigError> {
        Ok(Quorum::new(self.quorum)?)
    }

    /// Builds an aggregator for the configured quorum.
    pub fn aggregator(&self) -> Result<QuorumAggregator, ConfigError> {
        self.validate().map(QuorumAggregator::from_quorum)
    }

    /// Batch parsing options implied by this config.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            require_digest: self.require_digest,
        }
    }
}
