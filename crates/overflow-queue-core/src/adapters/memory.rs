//! # In-Memory Storage Account
//!
//! Process-local queue and blob storage for tests and development.
//!
//! Clients handed out by one account share its state, so a manager and a
//! test can observe each other's writes. Faults and latency can be injected
//! to exercise failure paths.

use super::queue_state::{QueueLimits, QueueState};
use super::signing::SasSigner;
use super::{blob_deadline, queue_deadline};
use crate::account::StorageAccount;
use crate::blob_client::{BlobContainerClient, PublicAccess};
use crate::error::{BlobError, QueueError};
use crate::message::{MessageUpdate, QueuedMessage, UpdateReceipt};
use crate::options::RequestContext;
use crate::queue_client::{QueueAttributes, QueueClient, QueuePermissions, SharedAccessPolicy};
use crate::{BlobName, ContainerName, MessageId, PopReceipt, QueueName, Timestamp};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Collaborator call that an injected fault fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InMemoryFault {
    CreateQueue,
    AddMessage,
    GetMessage,
    UpdateMessage,
    DeleteMessage,
    CreateContainer,
    Upload,
    Download,
    DeleteBlob,
}

/// Storage account kept entirely in memory
///
/// # Examples
///
/// ```
/// use overflow_queue_core::adapters::InMemoryStorageAccount;
/// use overflow_queue_core::StorageAccount;
///
/// let account = InMemoryStorageAccount::new("devstore");
/// assert_eq!(account.account_name(), "devstore");
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryStorageAccount {
    state: Arc<AccountState>,
}

#[derive(Debug)]
struct AccountState {
    signer: SasSigner,
    limits: QueueLimits,
    queues: RwLock<HashMap<QueueName, QueueState>>,
    containers: RwLock<HashMap<ContainerName, ContainerState>>,
    faults: Mutex<Vec<InMemoryFault>>,
    latency_ms: AtomicU64,
}

#[derive(Debug)]
struct ContainerState {
    access: PublicAccess,
    blobs: BTreeMap<BlobName, Bytes>,
}

impl InMemoryStorageAccount {
    /// Create an account with a random signing key and default limits
    pub fn new(account_name: impl Into<String>) -> Self {
        let key = uuid::Uuid::new_v4().as_bytes().to_vec();
        Self::with_options(account_name, Some(key), QueueLimits::default())
    }

    /// Create an account with an explicit key and limits
    pub fn with_options(
        account_name: impl Into<String>,
        key: Option<Vec<u8>>,
        limits: QueueLimits,
    ) -> Self {
        Self {
            state: Arc::new(AccountState {
                signer: SasSigner::new(account_name, key),
                limits,
                queues: RwLock::new(HashMap::new()),
                containers: RwLock::new(HashMap::new()),
                faults: Mutex::new(Vec::new()),
                latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Fail the next call of the given kind with a connection error
    pub async fn fail_next(&self, fault: InMemoryFault) {
        self.state.faults.lock().await.push(fault);
    }

    /// Delay every subsequent call by `latency`
    pub fn set_latency(&self, latency: std::time::Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.state.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Check a token produced by a queue client of this account
    pub fn verify_signature(&self, queue: &QueueName, token: &str) -> bool {
        self.state.signer.verify(queue, token)
    }

    /// Access level a container was created with
    pub async fn container_access(&self, container: &ContainerName) -> Option<PublicAccess> {
        self.state
            .containers
            .read()
            .await
            .get(container)
            .map(|c| c.access)
    }
}

impl StorageAccount for InMemoryStorageAccount {
    fn account_name(&self) -> &str {
        self.state.signer.account_name()
    }

    fn queue_client(&self, queue: &QueueName) -> Arc<dyn QueueClient> {
        Arc::new(InMemoryQueueClient {
            name: queue.clone(),
            state: Arc::clone(&self.state),
        })
    }

    fn blob_container_client(&self, container: &ContainerName) -> Arc<dyn BlobContainerClient> {
        Arc::new(InMemoryBlobContainerClient {
            name: container.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

impl AccountState {
    async fn simulate(&self, fault: Option<InMemoryFault>) -> Option<String> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(latency)).await;
        }

        let fault = fault?;
        let mut faults = self.faults.lock().await;
        let index = faults.iter().position(|f| *f == fault)?;
        faults.remove(index);
        debug!(?fault, "Injecting fault");
        Some(format!("injected {:?} fault", fault))
    }

    async fn queue_fault(&self, fault: Option<InMemoryFault>) -> Result<(), QueueError> {
        match self.simulate(fault).await {
            Some(message) => Err(QueueError::ConnectionFailed { message }),
            None => Ok(()),
        }
    }

    async fn blob_fault(&self, fault: Option<InMemoryFault>) -> Result<(), BlobError> {
        match self.simulate(fault).await {
            Some(message) => Err(BlobError::ConnectionFailed { message }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Queue client
// ============================================================================

struct InMemoryQueueClient {
    name: QueueName,
    state: Arc<AccountState>,
}

impl InMemoryQueueClient {
    fn not_found(&self) -> QueueError {
        QueueError::QueueNotFound {
            queue_name: self.name.to_string(),
        }
    }

    fn check_batch(&self, count: u32) -> Result<usize, QueueError> {
        if count == 0 || count > self.state.limits.max_batch_size {
            return Err(QueueError::InvalidRequest {
                message: format!(
                    "message count must be between 1 and {}",
                    self.state.limits.max_batch_size
                ),
            });
        }
        Ok(count as usize)
    }

    /// Run `f` against this queue's state under the write lock
    async fn with_queue<T>(
        &self,
        fault: Option<InMemoryFault>,
        f: impl FnOnce(&mut QueueState, &QueueLimits) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        self.state.queue_fault(fault).await?;
        let mut queues = self.state.queues.write().await;
        let queue = queues.get_mut(&self.name).ok_or_else(|| self.not_found())?;
        f(queue, &self.state.limits)
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    fn name(&self) -> &QueueName {
        &self.name
    }

    fn max_message_size(&self) -> usize {
        self.state.limits.max_message_size
    }

    fn max_batch_size(&self) -> u32 {
        self.state.limits.max_batch_size
    }

    async fn exists(&self, ctx: &RequestContext) -> Result<bool, QueueError> {
        queue_deadline(ctx, async {
            self.state.queue_fault(None).await?;
            Ok(self.state.queues.read().await.contains_key(&self.name))
        })
        .await
    }

    async fn create(&self, ctx: &RequestContext) -> Result<(), QueueError> {
        queue_deadline(ctx, async {
            if self.create_if_not_exists(&RequestContext::default()).await? {
                Ok(())
            } else {
                Err(QueueError::QueueAlreadyExists {
                    queue_name: self.name.to_string(),
                })
            }
        })
        .await
    }

    async fn create_if_not_exists(&self, ctx: &RequestContext) -> Result<bool, QueueError> {
        queue_deadline(ctx, async {
            self.state
                .queue_fault(Some(InMemoryFault::CreateQueue))
                .await?;
            let mut queues = self.state.queues.write().await;
            if queues.contains_key(&self.name) {
                return Ok(false);
            }
            queues.insert(self.name.clone(), QueueState::default());
            debug!(queue = %self.name, "Created queue");
            Ok(true)
        })
        .await
    }

    async fn delete_if_exists(&self, ctx: &RequestContext) -> Result<bool, QueueError> {
        queue_deadline(ctx, async {
            self.state.queue_fault(None).await?;
            Ok(self.state.queues.write().await.remove(&self.name).is_some())
        })
        .await
    }

    async fn clear(&self, ctx: &RequestContext) -> Result<(), QueueError> {
        queue_deadline(ctx, self.with_queue(None, |queue, _| {
            queue.clear();
            Ok(())
        }))
        .await
    }

    async fn fetch_attributes(&self, ctx: &RequestContext) -> Result<QueueAttributes, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(None, |queue, _| Ok(queue.attributes(Timestamp::now()))),
        )
        .await
    }

    async fn set_metadata(
        &self,
        metadata: HashMap<String, String>,
        ctx: &RequestContext,
    ) -> Result<(), QueueError> {
        queue_deadline(ctx, self.with_queue(None, |queue, _| {
            queue.metadata = metadata;
            Ok(())
        }))
        .await
    }

    async fn get_permissions(&self, ctx: &RequestContext) -> Result<QueuePermissions, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(None, |queue, _| Ok(queue.permissions.clone())),
        )
        .await
    }

    async fn set_permissions(
        &self,
        permissions: QueuePermissions,
        ctx: &RequestContext,
    ) -> Result<(), QueueError> {
        queue_deadline(ctx, self.with_queue(None, |queue, _| {
            queue.permissions = permissions;
            Ok(())
        }))
        .await
    }

    async fn add_message(
        &self,
        body: Bytes,
        time_to_live: Option<Duration>,
        initial_visibility_delay: Option<Duration>,
        ctx: &RequestContext,
    ) -> Result<QueuedMessage, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(Some(InMemoryFault::AddMessage), |queue, limits| {
                queue.add(
                    &body,
                    time_to_live,
                    initial_visibility_delay,
                    limits,
                    Timestamp::now(),
                )
            }),
        )
        .await
    }

    async fn get_message(
        &self,
        visibility_timeout: Option<Duration>,
        ctx: &RequestContext,
    ) -> Result<Option<QueuedMessage>, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(Some(InMemoryFault::GetMessage), |queue, _| {
                Ok(queue
                    .dequeue(1, visibility_timeout, Timestamp::now())?
                    .pop())
            }),
        )
        .await
    }

    async fn get_messages(
        &self,
        count: u32,
        visibility_timeout: Option<Duration>,
        ctx: &RequestContext,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let count = self.check_batch(count)?;
        queue_deadline(
            ctx,
            self.with_queue(Some(InMemoryFault::GetMessage), |queue, _| {
                queue.dequeue(count, visibility_timeout, Timestamp::now())
            }),
        )
        .await
    }

    async fn peek_message(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<QueuedMessage>, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(None, |queue, _| Ok(queue.peek(1, Timestamp::now())?.pop())),
        )
        .await
    }

    async fn peek_messages(
        &self,
        count: u32,
        ctx: &RequestContext,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let count = self.check_batch(count)?;
        queue_deadline(
            ctx,
            self.with_queue(None, |queue, _| queue.peek(count, Timestamp::now())),
        )
        .await
    }

    async fn update_message(
        &self,
        update: &MessageUpdate,
        ctx: &RequestContext,
    ) -> Result<UpdateReceipt, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(Some(InMemoryFault::UpdateMessage), |queue, limits| {
                queue.update(update, limits, Timestamp::now())
            }),
        )
        .await
    }

    async fn delete_message(
        &self,
        message_id: &MessageId,
        pop_receipt: &PopReceipt,
        ctx: &RequestContext,
    ) -> Result<(), QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(Some(InMemoryFault::DeleteMessage), |queue, _| {
                queue.delete(message_id, pop_receipt, Timestamp::now())
            }),
        )
        .await
    }

    fn shared_access_signature(
        &self,
        policy: &SharedAccessPolicy,
        stored_policy_id: Option<&str>,
    ) -> Result<String, QueueError> {
        self.state.signer.sign(&self.name, policy, stored_policy_id)
    }
}

// ============================================================================
// Blob container client
// ============================================================================

struct InMemoryBlobContainerClient {
    name: ContainerName,
    state: Arc<AccountState>,
}

impl InMemoryBlobContainerClient {
    fn container_not_found(&self) -> BlobError {
        BlobError::ContainerNotFound {
            container: self.name.to_string(),
        }
    }
}

#[async_trait]
impl BlobContainerClient for InMemoryBlobContainerClient {
    fn name(&self) -> &ContainerName {
        &self.name
    }

    async fn create_if_not_exists(
        &self,
        access: PublicAccess,
        ctx: &RequestContext,
    ) -> Result<bool, BlobError> {
        blob_deadline(ctx, async {
            self.state
                .blob_fault(Some(InMemoryFault::CreateContainer))
                .await?;
            let mut containers = self.state.containers.write().await;
            if containers.contains_key(&self.name) {
                return Ok(false);
            }
            containers.insert(
                self.name.clone(),
                ContainerState {
                    access,
                    blobs: BTreeMap::new(),
                },
            );
            debug!(container = %self.name, ?access, "Created container");
            Ok(true)
        })
        .await
    }

    async fn upload(
        &self,
        blob_name: &BlobName,
        data: Bytes,
        ctx: &RequestContext,
    ) -> Result<(), BlobError> {
        blob_deadline(ctx, async {
            self.state.blob_fault(Some(InMemoryFault::Upload)).await?;
            let mut containers = self.state.containers.write().await;
            let container = containers
                .get_mut(&self.name)
                .ok_or_else(|| self.container_not_found())?;
            container.blobs.insert(blob_name.clone(), data);
            Ok(())
        })
        .await
    }

    async fn download(
        &self,
        blob_name: &BlobName,
        ctx: &RequestContext,
    ) -> Result<Bytes, BlobError> {
        blob_deadline(ctx, async {
            self.state.blob_fault(Some(InMemoryFault::Download)).await?;
            let containers = self.state.containers.read().await;
            let container = containers
                .get(&self.name)
                .ok_or_else(|| self.container_not_found())?;
            container
                .blobs
                .get(blob_name)
                .cloned()
                .ok_or_else(|| BlobError::NotFound {
                    blob_name: blob_name.to_string(),
                })
        })
        .await
    }

    async fn delete(&self, blob_name: &BlobName, ctx: &RequestContext) -> Result<(), BlobError> {
        blob_deadline(ctx, async {
            self.state.blob_fault(Some(InMemoryFault::DeleteBlob)).await?;
            let mut containers = self.state.containers.write().await;
            let container = containers
                .get_mut(&self.name)
                .ok_or_else(|| self.container_not_found())?;
            container
                .blobs
                .remove(blob_name)
                .map(|_| ())
                .ok_or_else(|| BlobError::NotFound {
                    blob_name: blob_name.to_string(),
                })
        })
        .await
    }

    async fn exists(&self, blob_name: &BlobName, ctx: &RequestContext) -> Result<bool, BlobError> {
        blob_deadline(ctx, async {
            self.state.blob_fault(None).await?;
            let containers = self.state.containers.read().await;
            let container = containers
                .get(&self.name)
                .ok_or_else(|| self.container_not_found())?;
            Ok(container.blobs.contains_key(blob_name))
        })
        .await
    }

    async fn list(&self, ctx: &RequestContext) -> Result<Vec<BlobName>, BlobError> {
        blob_deadline(ctx, async {
            self.state.blob_fault(None).await?;
            let containers = self.state.containers.read().await;
            let container = containers
                .get(&self.name)
                .ok_or_else(|| self.container_not_found())?;
            Ok(container.blobs.keys().cloned().collect())
        })
        .await
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
