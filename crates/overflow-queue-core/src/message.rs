//! Message types exchanged with the queue service and returned to callers.

use crate::{BlobName, MessageId, PopReceipt, Timestamp};
use bytes::Bytes;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Raw message as stored by the queue service
///
/// Returned by the [`QueueClient`](crate::queue_client::QueueClient) from
/// enqueue, dequeue and peek calls. Peeked messages carry no pop receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub body: Bytes,
    pub pop_receipt: Option<PopReceipt>,
    pub dequeue_count: u32,
    pub insertion_time: Timestamp,
    pub expiration_time: Option<Timestamp>,
    pub next_visible_time: Option<Timestamp>,
}

impl QueuedMessage {
    /// Body as text, replacing invalid UTF-8 sequences
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outcome of a successful [`QueueManager::send`](crate::manager::QueueManager::send)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: MessageId,
    pub pop_receipt: Option<PopReceipt>,
    pub insertion_time: Timestamp,
    pub expiration_time: Option<Timestamp>,
    pub next_visible_time: Option<Timestamp>,
    /// Blob holding the payload when it was offloaded
    pub blob_name: Option<BlobName>,
}

impl SentMessage {
    pub(crate) fn from_queued(queued: QueuedMessage, blob_name: Option<BlobName>) -> Self {
        Self {
            id: queued.id,
            pop_receipt: queued.pop_receipt,
            insertion_time: queued.insertion_time,
            expiration_time: queued.expiration_time,
            next_visible_time: queued.next_visible_time,
            blob_name,
        }
    }
}

/// Decoded payload of a received message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MessageContent<T> {
    /// Payload written by a queue manager
    Payload(T),
    /// Body that is not a structured frame, delivered as literal text
    Text(String),
}

impl<T> MessageContent<T> {
    /// Get the decoded payload, if the body was structured
    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::Payload(payload) => Some(payload),
            Self::Text(_) => None,
        }
    }

    /// Consume and return the decoded payload, if the body was structured
    pub fn into_payload(self) -> Option<T> {
        match self {
            Self::Payload(payload) => Some(payload),
            Self::Text(_) => None,
        }
    }

    /// Get the literal text, if the body fell back to text
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Payload(_) => None,
            Self::Text(text) => Some(text),
        }
    }
}

/// A message handed to the caller by [`QueueManager::receive`](crate::manager::QueueManager::receive)
///
/// Built fresh on every receive. `blob_name` is set exactly when the payload
/// was offloaded to blob storage; it is used by delete to remove the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage<T> {
    pub id: MessageId,
    pub pop_receipt: PopReceipt,
    pub dequeue_count: u32,
    pub insertion_time: Timestamp,
    pub expiration_time: Option<Timestamp>,
    pub next_visible_time: Option<Timestamp>,
    pub blob_name: Option<BlobName>,
    pub content: MessageContent<T>,
}

impl<T> QueueMessage<T> {
    /// Check if the payload was offloaded to blob storage
    pub fn is_offloaded(&self) -> bool {
        self.blob_name.is_some()
    }
}

/// Request to change the visibility (and optionally the body) of a dequeued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub message_id: MessageId,
    pub pop_receipt: PopReceipt,
    pub visibility_timeout: Duration,
    pub body: Option<Bytes>,
}

impl MessageUpdate {
    /// Create an update that only extends visibility
    pub fn visibility(message_id: MessageId, pop_receipt: PopReceipt, timeout: Duration) -> Self {
        Self {
            message_id,
            pop_receipt,
            visibility_timeout: timeout,
            body: None,
        }
    }

    /// Replace the body as part of the update
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// Result of a successful message update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReceipt {
    pub pop_receipt: PopReceipt,
    pub next_visible_time: Timestamp,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
