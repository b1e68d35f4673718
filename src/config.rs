//! Service configuration loaded from a JSON file and overridden by CLI flags.

use crate::core::resolver::EngineConfig;
use crate::core::ruleset::TableFamily;
use crate::elevation::ElevationMethod;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Bounds for `request_timeout_secs`
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Which kernel the service drives.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Backend {
    /// The real kernel, through `nft --json`
    #[default]
    Nft,
    /// In-process set state, lost on exit
    Memory,
}

/// Service configuration, read from a JSON file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Pre-existing table that holds the managed sets
    #[serde(default = "default_table")]
    pub table: String,
    /// When set, the table must match name and family
    #[serde(default)]
    pub table_family: Option<TableFamily>,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_nft_command")]
    pub nft_command: String,
    /// Never auto-detected; unset means run nft directly
    #[serde(default)]
    pub elevation: Option<ElevationMethod>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Audit trail of mutations; disabled when unset
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    /// Per-request deadline, clamped to 1..=300 seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            table: default_table(),
            table_family: None,
            backend: Backend::default(),
            nft_command: default_nft_command(),
            elevation: None,
            log_file: None,
            audit_log: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((std::net::Ipv6Addr::LOCALHOST, 8082))
}

fn default_table() -> String {
    "mytable".to_string()
}

fn default_nft_command() -> String {
    "nft".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ServiceConfig {
    /// Checks values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::validators::validate_object_name(&self.table).map_err(|reason| {
            ConfigError::Invalid {
                field: "table",
                reason,
            }
        })?;

        if self.nft_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "nft_command",
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let config = EngineConfig::new(self.table.clone());
        match self.table_family {
            Some(family) => config.with_family(family),
            None => config,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS),
        )
    }
}

/// Loads the service config from `path`, or returns defaults if it does not exist.
///
/// # Async
/// Uses `tokio::fs` for non-blocking I/O.
pub async fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(ServiceConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
