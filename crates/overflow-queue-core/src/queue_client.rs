//! Queue service collaborator interface.

use crate::error::QueueError;
use crate::message::{MessageUpdate, QueuedMessage, UpdateReceipt};
use crate::options::RequestContext;
use crate::{MessageId, PopReceipt, QueueName, Timestamp};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Interface to a single queue in the queue service
///
/// Implementations carry no large-message logic; they store opaque bodies up
/// to [`max_message_size`](QueueClient::max_message_size) encoded bytes and
/// must be safe for concurrent use.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Name of the queue this client addresses
    fn name(&self) -> &QueueName;

    /// Maximum raw (encoded) message size accepted by the service
    fn max_message_size(&self) -> usize;

    /// Maximum number of messages per batch get/peek
    fn max_batch_size(&self) -> u32;

    /// Check whether the queue exists
    async fn exists(&self, ctx: &RequestContext) -> Result<bool, QueueError>;

    /// Create the queue, failing if it already exists
    async fn create(&self, ctx: &RequestContext) -> Result<(), QueueError>;

    /// Create the queue; returns `false` when it already existed
    async fn create_if_not_exists(&self, ctx: &RequestContext) -> Result<bool, QueueError>;

    /// Delete the queue; returns `false` when it did not exist
    async fn delete_if_exists(&self, ctx: &RequestContext) -> Result<bool, QueueError>;

    /// Remove every message from the queue
    async fn clear(&self, ctx: &RequestContext) -> Result<(), QueueError>;

    /// Read metadata and approximate message count
    async fn fetch_attributes(&self, ctx: &RequestContext) -> Result<QueueAttributes, QueueError>;

    /// Replace queue metadata
    async fn set_metadata(
        &self,
        metadata: HashMap<String, String>,
        ctx: &RequestContext,
    ) -> Result<(), QueueError>;

    /// Read stored access policies
    async fn get_permissions(&self, ctx: &RequestContext) -> Result<QueuePermissions, QueueError>;

    /// Replace stored access policies
    async fn set_permissions(
        &self,
        permissions: QueuePermissions,
        ctx: &RequestContext,
    ) -> Result<(), QueueError>;

    /// Enqueue a message body
    async fn add_message(
        &self,
        body: Bytes,
        time_to_live: Option<Duration>,
        initial_visibility_delay: Option<Duration>,
        ctx: &RequestContext,
    ) -> Result<QueuedMessage, QueueError>;

    /// Dequeue one message, hiding it for the visibility timeout
    async fn get_message(
        &self,
        visibility_timeout: Option<Duration>,
        ctx: &RequestContext,
    ) -> Result<Option<QueuedMessage>, QueueError>;

    /// Dequeue up to `count` messages
    async fn get_messages(
        &self,
        count: u32,
        visibility_timeout: Option<Duration>,
        ctx: &RequestContext,
    ) -> Result<Vec<QueuedMessage>, QueueError>;

    /// Read the next visible message without dequeuing it
    async fn peek_message(&self, ctx: &RequestContext)
        -> Result<Option<QueuedMessage>, QueueError>;

    /// Read up to `count` visible messages without dequeuing them
    async fn peek_messages(
        &self,
        count: u32,
        ctx: &RequestContext,
    ) -> Result<Vec<QueuedMessage>, QueueError>;

    /// Change visibility and optionally the body of a dequeued message
    async fn update_message(
        &self,
        update: &MessageUpdate,
        ctx: &RequestContext,
    ) -> Result<UpdateReceipt, QueueError>;

    /// Delete a dequeued message
    async fn delete_message(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        ctx: &RequestContext,
    ) -> Result<(), QueueError>;

    /// Produce a shared access signature token for this queue
    ///
    /// Either `policy` must carry an expiry or `stored_policy_id` must name a
    /// stored access policy that does.
    fn shared_access_signature(
        &self,
        policy: &SharedAccessPolicy,
        stored_policy_id: Option<&str>,
    ) -> Result<String, QueueError>;
}

/// Queue metadata and statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAttributes {
    pub metadata: HashMap<String, String>,
    pub approximate_message_count: u64,
}

/// Rights granted by a shared access policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAccessRights {
    pub read: bool,
    pub add: bool,
    pub update: bool,
    pub process: bool,
}

impl QueueAccessRights {
    /// Every right
    pub fn all() -> Self {
        Self {
            read: true,
            add: true,
            update: true,
            process: true,
        }
    }

    /// Parse from the compact `raup` form
    pub fn parse(value: &str) -> Result<Self, crate::ValidationError> {
        let mut rights = Self::default();
        for c in value.chars() {
            match c {
                'r' => rights.read = true,
                'a' => rights.add = true,
                'u' => rights.update = true,
                'p' => rights.process = true,
                other => {
                    return Err(crate::ValidationError::InvalidFormat {
                        field: "permissions".to_string(),
                        message: format!("unknown permission '{}'", other),
                    })
                }
            }
        }
        Ok(rights)
    }

    /// Check if no right is granted
    pub fn is_empty(&self) -> bool {
        !(self.read || self.add || self.update || self.process)
    }
}

impl fmt::Display for QueueAccessRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (granted, c) in [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.update, 'u'),
            (self.process, 'p'),
        ] {
            if granted {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Access policy, either ad-hoc in a signature or stored on the queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedAccessPolicy {
    pub permissions: QueueAccessRights,
    pub starts_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
}

/// Stored access policies keyed by policy identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePermissions {
    pub policies: BTreeMap<String, SharedAccessPolicy>,
}

#[cfg(test)]
#[path = "queue_client_tests.rs"]
mod tests;
