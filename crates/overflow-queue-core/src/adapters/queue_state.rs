//! Queue semantics shared by the in-memory and filesystem adapters.
//!
//! Bodies are kept base64 encoded, the way the queue service stores them, so
//! the raw message size limit applies to the encoded form.

use crate::error::QueueError;
use crate::message::{MessageUpdate, QueuedMessage, UpdateReceipt};
use crate::queue_client::{QueueAttributes, QueuePermissions};
use crate::{MessageId, PopReceipt, Timestamp};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Messages expire after seven days unless a time-to-live is given
pub const DEFAULT_MESSAGE_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Dequeued messages stay hidden for thirty seconds unless told otherwise
pub const DEFAULT_VISIBILITY_TIMEOUT_SECONDS: i64 = 30;

/// Upper bound for visibility timeouts and initial delays
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Largest batch accepted by get/peek
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 32;

/// Service limits applied by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Maximum encoded body size in bytes
    pub max_message_size: usize,
    /// Maximum messages per batch get/peek
    pub max_batch_size: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_message_size: crate::envelope::DEFAULT_MAX_MESSAGE_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredMessage {
    id: MessageId,
    encoded_body: String,
    pop_receipt: Option<PopReceipt>,
    dequeue_count: u32,
    insertion_time: Timestamp,
    expiration_time: Option<Timestamp>,
    next_visible_time: Timestamp,
}

impl StoredMessage {
    fn is_visible(&self, now: Timestamp) -> bool {
        self.next_visible_time <= now && !self.is_expired(now)
    }

    fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration_time.is_some_and(|expiry| expiry <= now)
    }

    fn to_queued(&self, with_receipt: bool) -> Result<QueuedMessage, QueueError> {
        let body = BASE64
            .decode(self.encoded_body.as_bytes())
            .map_err(|e| QueueError::Internal {
                message: format!("stored body of message '{}' is not valid base64: {}", self.id, e),
            })?;

        Ok(QueuedMessage {
            id: self.id.clone(),
            body: Bytes::from(body),
            pop_receipt: if with_receipt {
                self.pop_receipt.clone()
            } else {
                None
            },
            dequeue_count: self.dequeue_count,
            insertion_time: self.insertion_time,
            expiration_time: self.expiration_time,
            next_visible_time: Some(self.next_visible_time),
        })
    }
}

/// Full state of one queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QueueState {
    pub metadata: HashMap<String, String>,
    pub permissions: QueuePermissions,
    messages: Vec<StoredMessage>,
}

impl QueueState {
    pub fn attributes(&self, now: Timestamp) -> QueueAttributes {
        QueueAttributes {
            metadata: self.metadata.clone(),
            approximate_message_count: self
                .messages
                .iter()
                .filter(|m| !m.is_expired(now))
                .count() as u64,
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn add(
        &mut self,
        body: &[u8],
        time_to_live: Option<Duration>,
        initial_visibility_delay: Option<Duration>,
        limits: &QueueLimits,
        now: Timestamp,
    ) -> Result<QueuedMessage, QueueError> {
        let encoded_body = encode_body(body, limits)?;

        let ttl = time_to_live.unwrap_or_else(|| Duration::seconds(DEFAULT_MESSAGE_TTL_SECONDS));
        if ttl <= Duration::zero() {
            return Err(QueueError::InvalidRequest {
                message: "time-to-live must be positive".to_string(),
            });
        }

        let delay = initial_visibility_delay.unwrap_or_else(Duration::zero);
        validate_visibility("initial visibility delay", delay)?;
        if delay >= ttl {
            return Err(QueueError::InvalidRequest {
                message: "initial visibility delay must be shorter than the time-to-live"
                    .to_string(),
            });
        }

        let message = StoredMessage {
            id: MessageId::generate(),
            encoded_body,
            pop_receipt: Some(PopReceipt::generate()),
            dequeue_count: 0,
            insertion_time: now,
            expiration_time: Some(now.offset(ttl)),
            next_visible_time: now.offset(delay),
        };

        let queued = message.to_queued(true)?;
        self.messages.push(message);
        Ok(queued)
    }

    /// Hide up to `count` visible messages, issuing a fresh pop receipt for each
    pub fn dequeue(
        &mut self,
        count: usize,
        visibility_timeout: Option<Duration>,
        now: Timestamp,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let visibility = visibility_timeout
            .unwrap_or_else(|| Duration::seconds(DEFAULT_VISIBILITY_TIMEOUT_SECONDS));
        validate_visibility("visibility timeout", visibility)?;

        self.messages.retain(|m| !m.is_expired(now));

        let mut dequeued = Vec::new();
        for message in self
            .messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(count)
        {
            message.dequeue_count += 1;
            message.pop_receipt = Some(PopReceipt::generate());
            message.next_visible_time = now.offset(visibility);
            dequeued.push(message.to_queued(true)?);
        }

        Ok(dequeued)
    }

    pub fn peek(&self, count: usize, now: Timestamp) -> Result<Vec<QueuedMessage>, QueueError> {
        self.messages
            .iter()
            .filter(|m| m.is_visible(now))
            .take(count)
            .map(|m| m.to_queued(false))
            .collect()
    }

    pub fn update(
        &mut self,
        update: &MessageUpdate,
        limits: &QueueLimits,
        now: Timestamp,
    ) -> Result<UpdateReceipt, QueueError> {
        validate_visibility("visibility timeout", update.visibility_timeout)?;
        let encoded_body = update
            .body
            .as_ref()
            .map(|body| encode_body(body, limits))
            .transpose()?;

        let index = self.position(&update.message_id, &update.pop_receipt, now)?;
        let message = &mut self.messages[index];

        if let Some(encoded_body) = encoded_body {
            message.encoded_body = encoded_body;
        }
        let pop_receipt = PopReceipt::generate();
        message.pop_receipt = Some(pop_receipt.clone());
        message.next_visible_time = now.offset(update.visibility_timeout);

        Ok(UpdateReceipt {
            pop_receipt,
            next_visible_time: message.next_visible_time,
        })
    }

    pub fn delete(
        &mut self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        now: Timestamp,
    ) -> Result<(), QueueError> {
        let index = self.position(message_id, pop_receipt, now)?;
        self.messages.remove(index);
        Ok(())
    }

    fn position(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        now: Timestamp,
    ) -> Result<usize, QueueError> {
        self.messages
            .iter()
            .position(|m| {
                &m.id == message_id
                    && m.pop_receipt.as_ref() == Some(pop_receipt)
                    && !m.is_expired(now)
            })
            .ok_or_else(|| QueueError::MessageNotFound {
                message_id: message_id.to_string(),
            })
    }
}

fn encode_body(body: &[u8], limits: &QueueLimits) -> Result<String, QueueError> {
    let encoded = BASE64.encode(body);
    if encoded.len() > limits.max_message_size {
        return Err(QueueError::MessageTooLarge {
            size: encoded.len(),
            max_size: limits.max_message_size,
        });
    }
    Ok(encoded)
}

fn validate_visibility(what: &str, value: Duration) -> Result<(), QueueError> {
    if value < Duration::zero() || value > Duration::seconds(MAX_VISIBILITY_TIMEOUT_SECONDS) {
        return Err(QueueError::InvalidRequest {
            message: format!("{} must be between 0 seconds and 7 days", what),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "queue_state_tests.rs"]
mod tests;
