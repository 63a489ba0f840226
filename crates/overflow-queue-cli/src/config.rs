//! CLI configuration loading and logging setup.
//!
//! Sources, later ones overriding earlier ones:
//!  1. Built-in defaults
//!  2. The file given by `--config` / `OVERFLOW_QUEUE_CONFIG` (YAML, TOML or
//!     JSON, chosen by extension)
//!  3. Environment variables prefixed `OVQ__` with `__` between path
//!     segments, e.g. `OVQ__MANAGER__QUEUE_NAME=orders`
//!
//! Command-line flags are applied last by the caller.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use overflow_queue_core::{ManagerConfig, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of environment variables read as configuration
pub const ENV_PREFIX: &str = "OVQ";

/// Directory under the user's data directory used when no root is configured
pub const DEFAULT_DATA_DIR: &str = "overflow-queue";

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// CLI configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Where the filesystem storage account lives
    pub storage: StorageConfig,

    /// Queue manager settings
    pub manager: ManagerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl CliConfig {
    /// Copy of the configuration that is safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.storage.account_key.is_some() {
            copy.storage.account_key = Some("<redacted>".to_string());
        }
        copy
    }

    /// Check every section without touching storage
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.manager.validate()?;
        self.storage.account_key()?;
        if self.storage.server_timeout_seconds == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "storage.server_timeout_seconds".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}

/// Filesystem storage account settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the account; the user data directory when unset
    pub root: Option<PathBuf>,

    /// Account name used when signing access tokens
    pub account_name: String,

    /// Base64 signing key; signing is unavailable without one
    pub account_key: Option<String>,

    /// Per-request timeout applied to storage calls
    pub server_timeout_seconds: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            account_name: "devstore".to_string(),
            account_key: None,
            server_timeout_seconds: None,
        }
    }
}

impl StorageConfig {
    /// Resolve the account root directory
    pub fn root_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => dirs::data_local_dir()
                .map(|dir| dir.join(DEFAULT_DATA_DIR))
                .ok_or_else(|| ConfigError::MissingRequired {
                    key: "storage.root".to_string(),
                }),
        }
    }

    /// Decode the configured signing key
    pub fn account_key(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        let Some(encoded) = &self.account_key else {
            return Ok(None);
        };

        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| ConfigError::InvalidValue {
                key: "storage.account_key".to_string(),
                message: format!("not valid base64: {}", e),
            })?;

        if key.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "storage.account_key".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(Some(key))
    }

    /// Per-request timeout as a duration
    pub fn server_timeout(&self) -> Option<std::time::Duration> {
        self.server_timeout_seconds
            .map(std::time::Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
}

/// Load configuration from defaults, an optional file and the environment
pub fn load_configuration(path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `level` when set. Logs go to stderr so command
/// output on stdout stays machine readable.
pub fn initialize_logging(level: &str, format: LogFormat) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| ConfigError::InvalidValue {
            key: "logging.level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    // A subscriber installed earlier in the process keeps receiving events
    if let Err(error) = result {
        tracing::debug!(error = %error, "Tracing subscriber already installed");
    }

    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
