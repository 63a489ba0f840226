//! # Queue Manager
//!
//! Send, receive and delete over a queue whose payloads may exceed the queue
//! service's message size limit.
//!
//! Payloads whose serialized frame is larger than the [`OffloadThreshold`]
//! are uploaded to the offload container and replaced in the queue by an
//! [`Envelope`]. Receive resolves envelopes back into payloads and delete
//! removes the backing blob before the queue message.
//!
//! The manager performs no retries; retry policy belongs to the collaborators.

use crate::account::StorageAccount;
use crate::blob_client::{BlobContainerClient, PublicAccess};
use crate::config::ManagerConfig;
use crate::envelope::{DecodedBody, Envelope, EnvelopeCodec, OffloadThreshold};
use crate::error::{BlobError, QueueError, QueueManagerError, ValidationError};
use crate::message::{
    MessageContent, MessageUpdate, QueueMessage, QueuedMessage, SentMessage, UpdateReceipt,
};
use crate::options::{CallOptions, ReceiveOptions, RequestContext, SendOptions};
use crate::queue_client::{QueueAttributes, QueueClient, QueuePermissions, SharedAccessPolicy};
use crate::serializer::{ByteSerializer, JsonSerializer};
use crate::{BlobName, ContainerName, MessageId, PopReceipt, QueueName};
use bytes::Bytes;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Collaborator call names reported in [`QueueManagerError`]
pub mod operations {
    pub const QUEUE_EXISTS: &str = "queue.exists";
    pub const QUEUE_CREATE: &str = "queue.create";
    pub const QUEUE_CREATE_IF_NOT_EXISTS: &str = "queue.create_if_not_exists";
    pub const QUEUE_DELETE_IF_EXISTS: &str = "queue.delete_if_exists";
    pub const QUEUE_CLEAR: &str = "queue.clear";
    pub const QUEUE_FETCH_ATTRIBUTES: &str = "queue.fetch_attributes";
    pub const QUEUE_SET_METADATA: &str = "queue.set_metadata";
    pub const QUEUE_GET_PERMISSIONS: &str = "queue.get_permissions";
    pub const QUEUE_SET_PERMISSIONS: &str = "queue.set_permissions";
    pub const QUEUE_ADD_MESSAGE: &str = "queue.add_message";
    pub const QUEUE_GET_MESSAGE: &str = "queue.get_message";
    pub const QUEUE_GET_MESSAGES: &str = "queue.get_messages";
    pub const QUEUE_PEEK_MESSAGE: &str = "queue.peek_message";
    pub const QUEUE_PEEK_MESSAGES: &str = "queue.peek_messages";
    pub const QUEUE_UPDATE_MESSAGE: &str = "queue.update_message";
    pub const QUEUE_DELETE_MESSAGE: &str = "queue.delete_message";
    pub const QUEUE_SHARED_ACCESS_SIGNATURE: &str = "queue.shared_access_signature";
    pub const CONTAINER_CREATE_IF_NOT_EXISTS: &str = "blob.create_container_if_not_exists";
    pub const BLOB_UPLOAD: &str = "blob.upload";
    pub const BLOB_DOWNLOAD: &str = "blob.download";
    pub const BLOB_DELETE: &str = "blob.delete";
}

use operations as op;

/// Queue manager with transparent large-message offload
///
/// Construction awaits queue and container creation, so a manager value is
/// always ready for use. Instances are cheap to share behind an `Arc` and
/// hold no mutable state of their own.
pub struct QueueManager<S = JsonSerializer> {
    queue: Arc<dyn QueueClient>,
    container: Arc<dyn BlobContainerClient>,
    codec: EnvelopeCodec<S>,
    config: ManagerConfig,
}

impl<S: ByteSerializer> std::fmt::Debug for QueueManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("queue", self.queue.name())
            .field("container", self.container.name())
            .field("threshold", &self.codec.threshold())
            .field("config", &self.config)
            .finish()
    }
}

impl QueueManager<JsonSerializer> {
    /// Connect to a queue with default settings and JSON framing
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Validation`] for an invalid queue name
    /// before any collaborator is called.
    pub async fn new<A>(
        account: &A,
        queue_name: impl Into<String>,
    ) -> Result<Self, QueueManagerError>
    where
        A: StorageAccount + ?Sized,
    {
        Self::connect(
            account,
            ManagerConfig::new(queue_name),
            JsonSerializer,
            &CallOptions::default(),
        )
        .await
    }
}

impl<S: ByteSerializer> QueueManager<S> {
    /// Validate configuration, ensure the queue and the offload container
    /// exist, and return a ready manager
    ///
    /// Both creation calls treat "already exists" as success. The container
    /// is created without public read access.
    #[instrument(skip(account, config, serializer, options), fields(
        queue = %config.queue_name,
        container = %config.container_name,
    ))]
    pub async fn connect<A>(
        account: &A,
        config: ManagerConfig,
        serializer: S,
        options: &CallOptions,
    ) -> Result<Self, QueueManagerError>
    where
        A: StorageAccount + ?Sized,
    {
        let (queue_name, container_name) = config.validate()?;

        let queue = account.queue_client(&queue_name);
        let container = account.blob_container_client(&container_name);

        let queue_created = queue_call(
            options,
            op::QUEUE_CREATE_IF_NOT_EXISTS,
            queue.create_if_not_exists(&options.context),
        )
        .await?;

        let container_created = blob_call(
            options,
            op::CONTAINER_CREATE_IF_NOT_EXISTS,
            container_name.as_str(),
            container.create_if_not_exists(PublicAccess::Off, &options.context),
        )
        .await?;

        let threshold = OffloadThreshold::from_max_message_size(queue.max_message_size());

        info!(
            account = account.account_name(),
            queue_created,
            container_created,
            threshold = threshold.bytes(),
            format = serializer.format_name(),
            "Queue manager ready"
        );

        Ok(Self {
            queue,
            container,
            codec: EnvelopeCodec::new(serializer, threshold),
            config,
        })
    }

    /// Name of the managed queue
    pub fn queue_name(&self) -> &QueueName {
        self.queue.name()
    }

    /// Name of the offload container
    pub fn container_name(&self) -> &ContainerName {
        self.container.name()
    }

    /// Largest serialized frame that is enqueued directly
    pub fn threshold(&self) -> OffloadThreshold {
        self.codec.threshold()
    }

    /// Configuration the manager was built with
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Core protocol
    // ------------------------------------------------------------------------

    /// Send a payload, offloading it to blob storage when it is too large
    ///
    /// # Errors
    ///
    /// Serialization failures surface before any collaborator is called.
    /// If the queue rejects the envelope after a successful upload, the blob
    /// is deleted again when `cleanup_orphaned_blobs` is enabled, and the
    /// enqueue error is returned. A cancelled enqueue or one whose outcome is
    /// unknown (timeout, connection failure, internal error) keeps the blob,
    /// since the envelope may already be on the queue.
    #[instrument(skip(self, payload, options), fields(queue = %self.queue.name()))]
    pub async fn send<T>(
        &self,
        payload: &T,
        options: &SendOptions,
    ) -> Result<SentMessage, QueueManagerError>
    where
        T: Serialize + ?Sized,
    {
        let call = &options.call;
        let frame = self.codec.encode_payload(payload)?;
        let size = frame.len();

        if !self.codec.threshold().requires_offload(size) {
            debug!(size, "Enqueuing payload directly");
            let queued = self.enqueue(Bytes::from(frame), options).await?;
            return Ok(SentMessage::from_queued(queued, None));
        }

        let blob_name = BlobName::generate();
        let envelope = self.codec.encode_envelope(&Envelope::new(blob_name.clone()))?;

        info!(
            size,
            threshold = self.codec.threshold().bytes(),
            blob_name = %blob_name,
            "Payload exceeds threshold, offloading to blob storage"
        );

        blob_call(
            call,
            op::BLOB_UPLOAD,
            blob_name.as_str(),
            self.container
                .upload(&blob_name, Bytes::from(frame), &call.context),
        )
        .await?;

        match self.enqueue(Bytes::from(envelope), options).await {
            Ok(queued) => {
                debug!(message_id = %queued.id, blob_name = %blob_name, "Envelope enqueued");
                Ok(SentMessage::from_queued(queued, Some(blob_name)))
            }
            Err(error) => {
                let rejected = matches!(
                    &error,
                    QueueManagerError::Queue { source, .. } if source.is_rejection()
                );
                if !rejected {
                    warn!(
                        blob_name = %blob_name,
                        error = %error,
                        "Enqueue outcome unknown, keeping offloaded blob"
                    );
                } else if self.config.cleanup_orphaned_blobs {
                    self.remove_orphaned_blob(&blob_name, &call.context).await;
                }
                Err(error)
            }
        }
    }

    /// Receive the next visible message
    ///
    /// Returns `Ok(None)` when the queue is empty. Bodies that are not frames
    /// written by a queue manager are delivered as [`MessageContent::Text`].
    ///
    /// # Errors
    ///
    /// A missing or undecodable offloaded blob is an error; there is no text
    /// fallback for offloaded content.
    #[instrument(skip(self, options), fields(queue = %self.queue.name()))]
    pub async fn receive<T>(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Option<QueueMessage<T>>, QueueManagerError>
    where
        T: DeserializeOwned,
    {
        let call = &options.call;
        let visibility = options
            .visibility_timeout
            .or_else(|| self.config.default_visibility_timeout());

        let raw = queue_call(
            call,
            op::QUEUE_GET_MESSAGE,
            self.queue.get_message(visibility, &call.context),
        )
        .await?;

        match raw {
            Some(raw) => self.resolve(raw, call).await.map(Some),
            None => {
                debug!("Queue is empty");
                Ok(None)
            }
        }
    }

    /// Delete a received message and, when it was offloaded, its blob
    ///
    /// # Errors
    ///
    /// Blob deletion is best effort: a blob that is already gone is fine and
    /// any other blob failure is logged. The queue delete is always attempted
    /// and its error (e.g. a stale pop receipt) is returned.
    #[instrument(skip(self, message, options), fields(
        queue = %self.queue.name(),
        message_id = %message.id,
    ))]
    pub async fn delete<T>(
        &self,
        message: &QueueMessage<T>,
        options: &CallOptions,
    ) -> Result<(), QueueManagerError> {
        self.delete_by_receipt(
            &message.id,
            &message.pop_receipt,
            message.blob_name.as_ref(),
            options,
        )
        .await
    }

    /// Delete a message by id and pop receipt, removing `blob_name` first
    pub async fn delete_by_receipt(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        blob_name: Option<&BlobName>,
        options: &CallOptions,
    ) -> Result<(), QueueManagerError> {
        if let Some(blob_name) = blob_name {
            let result = blob_call(
                options,
                op::BLOB_DELETE,
                blob_name.as_str(),
                self.container.delete(blob_name, &options.context),
            )
            .await;

            match result {
                Ok(()) => debug!(blob_name = %blob_name, "Deleted backing blob"),
                Err(error) if error.is_cancelled() => return Err(error),
                Err(QueueManagerError::Blob { ref source, .. }) if source.is_not_found() => {
                    debug!(blob_name = %blob_name, "Backing blob already removed");
                }
                Err(error) => {
                    warn!(
                        blob_name = %blob_name,
                        error = %error,
                        "Failed to delete backing blob, deleting queue message anyway"
                    );
                }
            }
        }

        queue_call(
            options,
            op::QUEUE_DELETE_MESSAGE,
            self.queue
                .delete_message(message_id, pop_receipt, &options.context),
        )
        .await
    }

    async fn enqueue(
        &self,
        body: Bytes,
        options: &SendOptions,
    ) -> Result<QueuedMessage, QueueManagerError> {
        queue_call(
            &options.call,
            op::QUEUE_ADD_MESSAGE,
            self.queue.add_message(
                body,
                options.time_to_live,
                options.initial_visibility_delay,
                &options.call.context,
            ),
        )
        .await
    }

    async fn resolve<T>(
        &self,
        raw: QueuedMessage,
        call: &CallOptions,
    ) -> Result<QueueMessage<T>, QueueManagerError>
    where
        T: DeserializeOwned,
    {
        let pop_receipt = raw
            .pop_receipt
            .clone()
            .ok_or_else(|| QueueManagerError::Queue {
                operation: op::QUEUE_GET_MESSAGE,
                source: QueueError::Internal {
                    message: format!("message '{}' was dequeued without a pop receipt", raw.id),
                },
            })?;

        let (content, blob_name) = match self.codec.decode_queue_body::<T>(&raw.body) {
            DecodedBody::Inline(payload) => (MessageContent::Payload(payload), None),
            DecodedBody::Text(text) => {
                debug!(message_id = %raw.id, "Body is not a frame, delivering as text");
                (MessageContent::Text(text), None)
            }
            DecodedBody::Envelope(envelope) => {
                let blob_name = envelope.blob_name;
                debug!(message_id = %raw.id, blob_name = %blob_name, "Resolving envelope");

                let data = blob_call(
                    call,
                    op::BLOB_DOWNLOAD,
                    blob_name.as_str(),
                    self.container.download(&blob_name, &call.context),
                )
                .await?;

                let payload = self.codec.decode_offloaded::<T>(&data).map_err(|e| {
                    QueueManagerError::CorruptContent {
                        blob_name: blob_name.to_string(),
                        reason: e.to_string(),
                    }
                })?;

                (MessageContent::Payload(payload), Some(blob_name))
            }
        };

        Ok(QueueMessage {
            id: raw.id,
            pop_receipt,
            dequeue_count: raw.dequeue_count,
            insertion_time: raw.insertion_time,
            expiration_time: raw.expiration_time,
            next_visible_time: raw.next_visible_time,
            blob_name,
            content,
        })
    }

    async fn remove_orphaned_blob(&self, blob_name: &BlobName, ctx: &RequestContext) {
        match self.container.delete(blob_name, ctx).await {
            Ok(()) => info!(blob_name = %blob_name, "Removed blob orphaned by failed enqueue"),
            Err(error) => warn!(
                blob_name = %blob_name,
                error = %error,
                "Failed to remove blob orphaned by failed enqueue"
            ),
        }
    }

    fn validate_batch_count(&self, count: u32) -> Result<(), ValidationError> {
        let max = self.queue.max_batch_size();
        if count == 0 || count > max {
            return Err(ValidationError::OutOfRange {
                field: "message_count".to_string(),
                message: format!("must be between 1 and {}, got {}", max, count),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Pass-through operations
    // ------------------------------------------------------------------------

    /// Check whether the queue exists
    pub async fn exists(&self, options: &CallOptions) -> Result<bool, QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_EXISTS,
            self.queue.exists(&options.context),
        )
        .await
    }

    /// Create the queue, failing if it already exists
    pub async fn create(&self, options: &CallOptions) -> Result<(), QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_CREATE,
            self.queue.create(&options.context),
        )
        .await
    }

    /// Create the queue if missing
    pub async fn create_if_not_exists(
        &self,
        options: &CallOptions,
    ) -> Result<bool, QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_CREATE_IF_NOT_EXISTS,
            self.queue.create_if_not_exists(&options.context),
        )
        .await
    }

    /// Delete the queue if present
    ///
    /// Offloaded blobs referenced by remaining messages are left in place.
    pub async fn delete_if_exists(&self, options: &CallOptions) -> Result<bool, QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_DELETE_IF_EXISTS,
            self.queue.delete_if_exists(&options.context),
        )
        .await
    }

    /// Remove all messages from the queue
    ///
    /// Offloaded blobs referenced by cleared messages are left in place.
    pub async fn clear(&self, options: &CallOptions) -> Result<(), QueueManagerError> {
        queue_call(options, op::QUEUE_CLEAR, self.queue.clear(&options.context)).await
    }

    /// Read queue metadata and approximate message count
    pub async fn fetch_attributes(
        &self,
        options: &CallOptions,
    ) -> Result<QueueAttributes, QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_FETCH_ATTRIBUTES,
            self.queue.fetch_attributes(&options.context),
        )
        .await
    }

    /// Replace queue metadata
    pub async fn set_metadata(
        &self,
        metadata: HashMap<String, String>,
        options: &CallOptions,
    ) -> Result<(), QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_SET_METADATA,
            self.queue.set_metadata(metadata, &options.context),
        )
        .await
    }

    /// Read stored access policies
    pub async fn get_permissions(
        &self,
        options: &CallOptions,
    ) -> Result<QueuePermissions, QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_GET_PERMISSIONS,
            self.queue.get_permissions(&options.context),
        )
        .await
    }

    /// Replace stored access policies
    pub async fn set_permissions(
        &self,
        permissions: QueuePermissions,
        options: &CallOptions,
    ) -> Result<(), QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_SET_PERMISSIONS,
            self.queue.set_permissions(permissions, &options.context),
        )
        .await
    }

    /// Peek at the next visible raw message
    pub async fn peek_message(
        &self,
        options: &CallOptions,
    ) -> Result<Option<QueuedMessage>, QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_PEEK_MESSAGE,
            self.queue.peek_message(&options.context),
        )
        .await
    }

    /// Peek at up to `count` raw messages
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Validation`] when `count` is outside
    /// `1..=max_batch_size`, without calling the queue.
    pub async fn peek_messages(
        &self,
        count: u32,
        options: &CallOptions,
    ) -> Result<Vec<QueuedMessage>, QueueManagerError> {
        self.validate_batch_count(count)?;
        queue_call(
            options,
            op::QUEUE_PEEK_MESSAGES,
            self.queue.peek_messages(count, &options.context),
        )
        .await
    }

    /// Dequeue up to `count` raw messages
    ///
    /// # Errors
    ///
    /// Returns [`QueueManagerError::Validation`] when `count` is outside
    /// `1..=max_batch_size`, without calling the queue.
    pub async fn get_messages(
        &self,
        count: u32,
        visibility_timeout: Option<Duration>,
        options: &CallOptions,
    ) -> Result<Vec<QueuedMessage>, QueueManagerError> {
        self.validate_batch_count(count)?;
        queue_call(
            options,
            op::QUEUE_GET_MESSAGES,
            self.queue
                .get_messages(count, visibility_timeout, &options.context),
        )
        .await
    }

    /// Change visibility (and optionally the raw body) of a dequeued message
    pub async fn update_message(
        &self,
        update: &MessageUpdate,
        options: &CallOptions,
    ) -> Result<UpdateReceipt, QueueManagerError> {
        queue_call(
            options,
            op::QUEUE_UPDATE_MESSAGE,
            self.queue.update_message(update, &options.context),
        )
        .await
    }

    /// Generate a shared access signature for the queue
    pub fn shared_access_signature(
        &self,
        policy: &SharedAccessPolicy,
        stored_policy_id: Option<&str>,
    ) -> Result<String, QueueManagerError> {
        self.queue
            .shared_access_signature(policy, stored_policy_id)
            .map_err(|source| QueueManagerError::Queue {
                operation: op::QUEUE_SHARED_ACCESS_SIGNATURE,
                source,
            })
    }
}

/// Run a collaborator future, aborting it when the token fires first
async fn cancellable<F>(
    token: Option<&CancellationToken>,
    operation: &'static str,
    future: F,
) -> Result<F::Output, QueueManagerError>
where
    F: Future,
{
    let Some(token) = token else {
        return Ok(future.await);
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(operation, "Collaborator call cancelled");
            Err(QueueManagerError::Cancelled { operation })
        }
        output = future => Ok(output),
    }
}

async fn queue_call<T, F>(
    options: &CallOptions,
    operation: &'static str,
    future: F,
) -> Result<T, QueueManagerError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    cancellable(options.cancellation.as_ref(), operation, future)
        .await?
        .map_err(|source| QueueManagerError::Queue { operation, source })
}

async fn blob_call<T, F>(
    options: &CallOptions,
    operation: &'static str,
    target: &str,
    future: F,
) -> Result<T, QueueManagerError>
where
    F: Future<Output = Result<T, BlobError>>,
{
    cancellable(options.cancellation.as_ref(), operation, future)
        .await?
        .map_err(|source| QueueManagerError::Blob {
            operation,
            target: target.to_string(),
            source,
        })
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
