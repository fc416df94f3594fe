//! Application settings.
//!
//! Settings are read once at startup: an optional JSON file first, then
//! `ZIPBLOB_*` environment variables on top. The resulting value is passed
//! by reference to whatever needs it.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Namespace generated archives are written under
pub const DEFAULT_OUTPUT_PREFIX: &str = "zip-files";

/// How long a failed run may spend deleting its partial archive
pub const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 30;

const ENV_PREFIX: &str = "ZIPBLOB_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Store connection and archive naming settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Bucket holding both the source objects and the generated archives
    pub bucket: String,
    /// Region override; falls back to the AWS configuration chain
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint_url: Option<String>,
    /// Path-style addressing (required by LocalStack and MinIO)
    pub force_path_style: bool,
    /// Prefix generated archives are written under
    pub output_prefix: String,
    pub cleanup_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bucket: String::new(),
            region: None,
            endpoint_url: None,
            force_path_style: false,
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            cleanup_timeout_secs: DEFAULT_CLEANUP_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Load settings from an optional JSON file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Settings::default(),
        };

        let settings = base.overlay(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a JSON settings file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ZIPBLOB_*` overrides read through `lookup`
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(bucket) = var("BUCKET") {
            self.bucket = bucket;
        }
        if let Some(region) = var("REGION") {
            self.region = Some(region).filter(|r| !r.trim().is_empty());
        }
        if let Some(endpoint) = var("ENDPOINT_URL") {
            self.endpoint_url = Some(endpoint).filter(|e| !e.trim().is_empty());
        }
        if let Some(flag) = var("FORCE_PATH_STYLE") {
            self.force_path_style = parse_bool("force_path_style", &flag)?;
        }
        if let Some(prefix) = var("OUTPUT_PREFIX") {
            self.output_prefix = prefix;
        }
        if let Some(secs) = var("CLEANUP_TIMEOUT_SECS") {
            self.cleanup_timeout_secs =
                secs.trim().parse().map_err(|_| ConfigError::Invalid {
                    field: "cleanup_timeout_secs",
                    reason: format!("expected a whole number of seconds, got {secs:?}"),
                })?;
        }

        Ok(self)
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "bucket",
                reason: "must not be empty".to_string(),
            });
        }

        if self.output_prefix.trim_matches('/').trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "output_prefix",
                reason: "must not be empty".to_string(),
            });
        }

        if self.cleanup_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "cleanup_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_secs(self.cleanup_timeout_secs)
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}
