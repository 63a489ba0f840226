//! Queue manager configuration.

use crate::adapters::MAX_VISIBILITY_TIMEOUT_SECONDS;
use crate::error::ValidationError;
use crate::{ContainerName, QueueName};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Container dedicated to offloaded message payloads
pub const DEFAULT_CONTAINER_NAME: &str = "overflow-messages";

/// Queue used when none is configured
pub const DEFAULT_QUEUE_NAME: &str = "messages";

/// Settings for a [`QueueManager`](crate::manager::QueueManager) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Queue carrying messages and envelopes
    pub queue_name: String,

    /// Container holding offloaded payloads
    pub container_name: String,

    /// Delete the uploaded blob when enqueuing its envelope fails
    pub cleanup_orphaned_blobs: bool,

    /// Visibility timeout applied to receives that do not set one
    pub default_visibility_timeout_seconds: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            cleanup_orphaned_blobs: true,
            default_visibility_timeout_seconds: None,
        }
    }
}

impl ManagerConfig {
    /// Create configuration for a queue with default settings
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    /// Use a different offload container
    pub fn with_container_name(mut self, container_name: impl Into<String>) -> Self {
        self.container_name = container_name.into();
        self
    }

    /// Enable or disable compensating blob deletion
    pub fn with_cleanup_orphaned_blobs(mut self, enabled: bool) -> Self {
        self.cleanup_orphaned_blobs = enabled;
        self
    }

    /// Set the default visibility timeout in seconds
    pub fn with_default_visibility_timeout_seconds(mut self, seconds: u64) -> Self {
        self.default_visibility_timeout_seconds = Some(seconds);
        self
    }

    /// Validate names and limits, returning the parsed resource names
    pub fn validate(&self) -> Result<(QueueName, ContainerName), ValidationError> {
        let queue =
            QueueName::new(self.queue_name.as_str()).map_err(|e| rename_field(e, "queue_name"))?;
        let container = ContainerName::new(self.container_name.as_str())
            .map_err(|e| rename_field(e, "container_name"))?;

        if let Some(seconds) = self.default_visibility_timeout_seconds {
            if seconds == 0 || seconds > MAX_VISIBILITY_TIMEOUT_SECONDS.unsigned_abs() {
                return Err(ValidationError::OutOfRange {
                    field: "default_visibility_timeout_seconds".to_string(),
                    message: format!(
                        "must be between 1 and {} seconds, got {}",
                        MAX_VISIBILITY_TIMEOUT_SECONDS, seconds
                    ),
                });
            }
        }

        Ok((queue, container))
    }

    /// Default visibility timeout as a duration
    pub fn default_visibility_timeout(&self) -> Option<Duration> {
        self.default_visibility_timeout_seconds
            .and_then(|s| i64::try_from(s).ok())
            .and_then(Duration::try_seconds)
    }
}

fn rename_field(error: ValidationError, field: &str) -> ValidationError {
    let field = field.to_string();
    match error {
        ValidationError::Required { .. } => ValidationError::Required { field },
        ValidationError::InvalidFormat { message, .. } => {
            ValidationError::InvalidFormat { field, message }
        }
        ValidationError::InvalidLength { min, max, .. } => {
            ValidationError::InvalidLength { field, min, max }
        }
        ValidationError::OutOfRange { message, .. } => ValidationError::OutOfRange { field, message },
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
