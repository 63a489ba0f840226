//! # Overflow-Queue Core
//!
//! Queue manager layered over a cloud queue and blob store that transparently
//! accepts payloads larger than the queue service's message size limit.
//!
//! Oversized payloads are written to a dedicated blob container and the queue
//! receives a small envelope pointing at the blob. Receivers resolve the
//! envelope back into the original payload, and deleting the message removes
//! the backing blob as well.
//!
//! ## Architecture
//!
//! - The manager depends only on collaborator traits ([`QueueClient`],
//!   [`BlobContainerClient`], [`StorageAccount`], [`ByteSerializer`])
//! - Storage implementations live in [`adapters`] and are injected at runtime
//! - Envelope framing and the offload threshold live in [`envelope`]
//!
//! ## Usage
//!
//! ```rust
//! use overflow_queue_core::adapters::InMemoryStorageAccount;
//! use overflow_queue_core::{QueueManager, ReceiveOptions, SendOptions};
//!
//! # async fn example() -> Result<(), overflow_queue_core::QueueManagerError> {
//! let account = InMemoryStorageAccount::new("devstore");
//! let manager = QueueManager::new(&account, "orders").await?;
//!
//! manager.send(&"hello", &SendOptions::default()).await?;
//! if let Some(message) = manager.receive::<String>(&ReceiveOptions::default()).await? {
//!     manager.delete(&message, &Default::default()).await?;
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub mod account;
pub mod adapters;
pub mod blob_client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod manager;
pub mod message;
pub mod options;
pub mod queue_client;
pub mod serializer;

pub use account::StorageAccount;
pub use blob_client::{BlobContainerClient, PublicAccess};
pub use config::{ManagerConfig, DEFAULT_CONTAINER_NAME, DEFAULT_QUEUE_NAME};
pub use envelope::{Envelope, EnvelopeCodec, OffloadThreshold};
pub use error::{
    BlobError, ConfigurationError, QueueError, QueueManagerError, SerializationError,
    ValidationError,
};
pub use manager::QueueManager;
pub use message::{
    MessageContent, MessageUpdate, QueueMessage, QueuedMessage, SentMessage, UpdateReceipt,
};
pub use options::{
    CallOptions, OperationContext, ReceiveOptions, RequestContext, RequestOptions, SendOptions,
};
pub use queue_client::{
    QueueAccessRights, QueueAttributes, QueueClient, QueuePermissions, SharedAccessPolicy,
};
pub use serializer::{ByteSerializer, JsonSerializer};

// ============================================================================
// Resource Names
// ============================================================================

const RESOURCE_NAME_PATTERN: &str = "^[a-z0-9]+(-[a-z0-9]+)*$";
const RESOURCE_NAME_MIN: usize = 3;
const RESOURCE_NAME_MAX: usize = 63;

fn resource_name_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(RESOURCE_NAME_PATTERN).ok())
        .as_ref()
}

/// Shared naming rules for queues and containers: 3-63 characters of
/// lowercase ASCII letters, digits and single interior hyphens.
fn validate_resource_name(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() < RESOURCE_NAME_MIN || value.len() > RESOURCE_NAME_MAX {
        return Err(ValidationError::InvalidLength {
            field: field.to_string(),
            min: RESOURCE_NAME_MIN,
            max: RESOURCE_NAME_MAX,
        });
    }

    if !resource_name_regex().is_some_and(|pattern| pattern.is_match(value)) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only lowercase letters, digits and single interior hyphens allowed"
                .to_string(),
        });
    }

    Ok(())
}

/// Validated name of a queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_resource_name("queue_name", &name)?;
        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Validated name of a blob container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerName(String);

impl ContainerName {
    /// Create new container name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_resource_name("container_name", &name)?;
        Ok(Self(name))
    }

    /// Get container name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// Blob and Message Identifiers
// ============================================================================

const BLOB_NAME_MAX: usize = 1024;

/// Name of a blob inside a container
///
/// Names are opaque; the only structural rules are the ones that keep a name
/// usable as a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobName(String);

impl BlobName {
    /// Create blob name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "blob_name".to_string(),
            });
        }

        if name.len() > BLOB_NAME_MAX {
            return Err(ValidationError::InvalidLength {
                field: "blob_name".to_string(),
                min: 1,
                max: BLOB_NAME_MAX,
            });
        }

        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ValidationError::InvalidFormat {
                field: "blob_name".to_string(),
                message: "must be a single path segment".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Generate a new unique blob name
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get blob name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BlobName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BlobName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlobName> for String {
    fn from(name: BlobName) -> Self {
        name.0
    }
}

/// Identifier the queue service assigns to a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

/// Opaque token issued on dequeue, required to delete or update that
/// specific delivery of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PopReceipt(String);

impl PopReceipt {
    /// Generate a fresh pop receipt
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get pop receipt as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PopReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PopReceipt {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "pop_receipt".to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Time
// ============================================================================

/// UTC timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ValidationError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| ValidationError::InvalidFormat {
                field: "timestamp".to_string(),
                message: e.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp shifted by a (possibly negative) duration
    pub fn offset(&self, duration: chrono::Duration) -> Self {
        Self(self.0 + duration)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl FromStr for Timestamp {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_rfc3339(s)
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
