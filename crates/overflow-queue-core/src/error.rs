//! Error types for the queue manager and its storage collaborators.

use chrono::Duration;
use thiserror::Error;

/// Input validation failures.
///
/// Always raised before any call reaches a storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' must be between {min} and {max} characters long")]
    InvalidLength {
        field: String,
        min: usize,
        max: usize,
    },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Errors reported by a [`QueueClient`](crate::queue_client::QueueClient)
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Queue already exists: {queue_name}")]
    QueueAlreadyExists { queue_name: String },

    #[error("Message '{message_id}' not found or pop receipt mismatch")]
    MessageNotFound { message_id: String },

    #[error("Message too large: {size} encoded bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request throttled by queue service: {message}")]
    Throttled { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Internal queue error: {message}")]
    Internal { message: String },
}

impl QueueError {
    /// Check if error is transient and the call may succeed when repeated
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::QueueAlreadyExists { .. } => false,
            Self::MessageNotFound { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::Throttled { .. } => true,
            Self::InvalidRequest { .. } => false,
            Self::Internal { .. } => true,
        }
    }

    /// Check if error reports a missing queue or message
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::QueueNotFound { .. } | Self::MessageNotFound { .. }
        )
    }

    /// Check if the service definitely refused the request
    ///
    /// Timeouts, connection failures and internal errors leave the outcome
    /// unknown: the request may have been applied before the error surfaced.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::QueueNotFound { .. }
            | Self::QueueAlreadyExists { .. }
            | Self::MessageNotFound { .. }
            | Self::MessageTooLarge { .. }
            | Self::AuthenticationFailed { .. }
            | Self::Throttled { .. }
            | Self::InvalidRequest { .. } => true,
            Self::Timeout { .. } | Self::ConnectionFailed { .. } | Self::Internal { .. } => false,
        }
    }
}

/// Errors reported by a [`BlobContainerClient`](crate::blob_client::BlobContainerClient)
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Container not found: {container}")]
    ContainerNotFound { container: String },

    #[error("Blob not found: {blob_name}")]
    NotFound { blob_name: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },

    #[error("Network timeout: {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Checksum mismatch for blob {blob_name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        blob_name: String,
        expected: String,
        actual: String,
    },

    #[error("Internal storage error: {message}")]
    Internal { message: String },
}

impl BlobError {
    /// Check if error is transient and worth retrying
    ///
    /// Missing blobs and containers never appear on retry; connection
    /// failures, timeouts, and internal service errors may.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Internal { .. }
        )
    }

    /// Check if error reports a missing blob or container
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::ContainerNotFound { .. }
        )
    }
}

/// Errors raised by a [`ByteSerializer`](crate::serializer::ByteSerializer)
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected message frame: {message}")]
    UnexpectedFrame { message: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Top-level error returned by [`QueueManager`](crate::manager::QueueManager) operations
///
/// Collaborator failures carry the name of the call that failed together
/// with the untouched collaborator error.
#[derive(Debug, Error)]
pub enum QueueManagerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue call '{operation}' failed: {source}")]
    Queue {
        operation: &'static str,
        #[source]
        source: QueueError,
    },

    #[error("Blob call '{operation}' failed for '{target}': {source}")]
    Blob {
        operation: &'static str,
        target: String,
        #[source]
        source: BlobError,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Offloaded content in blob '{blob_name}' is corrupt: {reason}")]
    CorruptContent { blob_name: String, reason: String },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: &'static str },
}

impl QueueManagerError {
    /// Check if the failed call may succeed when repeated by the caller
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Queue { source, .. } => source.is_transient(),
            Self::Blob { source, .. } => source.is_transient(),
            Self::Validation(_)
            | Self::Configuration(_)
            | Self::Serialization(_)
            | Self::CorruptContent { .. }
            | Self::Cancelled { .. } => false,
        }
    }

    /// Check if the operation was aborted through its cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Name of the collaborator call that failed, when one did
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Queue { operation, .. }
            | Self::Blob { operation, .. }
            | Self::Cancelled { operation } => Some(*operation),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
