//! # Filesystem Storage Account
//!
//! Durable local implementation of queue and blob storage for development
//! and the command-line tool.
//!
//! Layout under the root directory:
//!
//! ```text
//! account.lock                  advisory lock shared by every process
//! queues/<queue>.json           queue state (metadata, policies, messages)
//! containers/<container>.json   container record
//! blobs/<container>/<blob>      blob record with SHA-256 checksum
//! tmp/                          staging area for atomic writes
//! ```
//!
//! Every write goes to a temporary file that is renamed into place. Each call
//! holds an exclusive advisory lock on `account.lock`, so accounts opened by
//! other processes over the same root never interleave a read-modify-write
//! of a queue file. Once a call has loaded state, its write lands even when
//! the caller stops waiting, and the lock is held until the rename is done.

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
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Storage account persisted under a local directory
///
/// # Examples
///
/// ```no_run
/// use overflow_queue_core::adapters::FilesystemStorageAccount;
/// use overflow_queue_core::QueueManager;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let account = FilesystemStorageAccount::new("./data", "devstore", None);
/// let manager = QueueManager::new(&account, "orders").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemStorageAccount {
    state: Arc<AccountState>,
}

#[derive(Debug)]
struct AccountState {
    root: PathBuf,
    signer: SasSigner,
    limits: QueueLimits,
    local_lock: Arc<Mutex<()>>,
}

/// Name of the lock file under the account root
const LOCK_FILE: &str = "account.lock";

/// Exclusive hold on the account, within this process and across processes
///
/// Dropping the file releases the advisory lock before the local mutex.
struct AccountGuard {
    _file: std::fs::File,
    _local: OwnedMutexGuard<()>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerRecord {
    access: PublicAccess,
    created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBlob {
    checksum_sha256: String,
    size_bytes: u64,
    created_at: Timestamp,
    data: String,
}

impl FilesystemStorageAccount {
    /// Create an account rooted at `root` with default limits
    ///
    /// No I/O happens until a client is used; directories are created on
    /// demand.
    pub fn new(
        root: impl Into<PathBuf>,
        account_name: impl Into<String>,
        key: Option<Vec<u8>>,
    ) -> Self {
        Self::with_limits(root, account_name, key, QueueLimits::default())
    }

    /// Create an account with explicit service limits
    pub fn with_limits(
        root: impl Into<PathBuf>,
        account_name: impl Into<String>,
        key: Option<Vec<u8>>,
        limits: QueueLimits,
    ) -> Self {
        Self {
            state: Arc::new(AccountState {
                root: root.into(),
                signer: SasSigner::new(account_name, key),
                limits,
                local_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Root directory of the account
    pub fn root(&self) -> &Path {
        &self.state.root
    }

    /// Check a token produced by a queue client of this account
    pub fn verify_signature(&self, queue: &QueueName, token: &str) -> bool {
        self.state.signer.verify(queue, token)
    }
}

impl StorageAccount for FilesystemStorageAccount {
    fn account_name(&self) -> &str {
        self.state.signer.account_name()
    }

    fn queue_client(&self, queue: &QueueName) -> Arc<dyn QueueClient> {
        Arc::new(FilesystemQueueClient {
            name: queue.clone(),
            path: self
                .state
                .root
                .join("queues")
                .join(format!("{}.json", queue)),
            state: Arc::clone(&self.state),
        })
    }

    fn blob_container_client(&self, container: &ContainerName) -> Arc<dyn BlobContainerClient> {
        Arc::new(FilesystemBlobContainerClient {
            name: container.clone(),
            record_path: self
                .state
                .root
                .join("containers")
                .join(format!("{}.json", container)),
            blob_dir: self.state.root.join("blobs").join(container.as_str()),
            state: Arc::clone(&self.state),
        })
    }
}

impl AccountState {
    /// Take the account lock, waiting for holders in this and other processes
    async fn lock(&self) -> io::Result<AccountGuard> {
        let local = Arc::clone(&self.local_lock).lock_owned().await;

        fs::create_dir_all(&self.root).await?;
        let path = self.root.join(LOCK_FILE);
        let file = tokio::task::spawn_blocking(move || -> io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;
            fs4::fs_std::FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(io::Error::other)??;

        Ok(AccountGuard {
            _file: file,
            _local: local,
        })
    }

    /// Write `contents` to `path` on a detached task that releases `guard`
    /// only after the rename has landed
    async fn commit(
        self: &Arc<Self>,
        path: PathBuf,
        contents: Vec<u8>,
        guard: AccountGuard,
    ) -> io::Result<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let result = state.write_atomic(&path, &contents).await;
            drop(guard);
            result
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Write `contents` to `path` through a staged temporary file
    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let staging = self.root.join("tmp");
        fs::create_dir_all(&staging).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = staging.join(format!("{}.tmp", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&temp_path, path).await
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// ============================================================================
// Queue client
// ============================================================================

struct FilesystemQueueClient {
    name: QueueName,
    path: PathBuf,
    state: Arc<AccountState>,
}

impl FilesystemQueueClient {
    fn io_error(&self, action: &str, error: io::Error) -> QueueError {
        QueueError::Internal {
            message: format!(
                "failed to {} queue file {}: {}",
                action,
                self.path.display(),
                error
            ),
        }
    }

    async fn load(&self) -> Result<Option<QueueState>, QueueError> {
        read_json(&self.path)
            .await
            .map_err(|e| self.io_error("read", e))
    }

    async fn lock(&self) -> Result<AccountGuard, QueueError> {
        self.state
            .lock()
            .await
            .map_err(|e| self.io_error("lock", e))
    }

    async fn store(&self, queue: &QueueState, guard: AccountGuard) -> Result<(), QueueError> {
        let json = serde_json::to_vec_pretty(queue).map_err(|e| QueueError::Internal {
            message: format!("failed to serialize queue state: {}", e),
        })?;
        self.state
            .commit(self.path.clone(), json, guard)
            .await
            .map_err(|e| self.io_error("write", e))
    }

    /// Load the queue, apply `f`, and persist the result when `persist` is set
    async fn with_queue<T>(
        &self,
        persist: bool,
        f: impl FnOnce(&mut QueueState, &QueueLimits) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let guard = self.lock().await?;
        let mut queue = self
            .load()
            .await?
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: self.name.to_string(),
            })?;

        let output = f(&mut queue, &self.state.limits)?;
        if persist {
            self.store(&queue, guard).await?;
        }
        Ok(output)
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
}

#[async_trait]
impl QueueClient for FilesystemQueueClient {
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
            let _guard = self.lock().await?;
            fs::try_exists(&self.path)
                .await
                .map_err(|e| self.io_error("inspect", e))
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
            let guard = self.lock().await?;
            if self.load().await?.is_some() {
                return Ok(false);
            }
            self.store(&QueueState::default(), guard).await?;
            debug!(queue = %self.name, path = %self.path.display(), "Created queue");
            Ok(true)
        })
        .await
    }

    async fn delete_if_exists(&self, ctx: &RequestContext) -> Result<bool, QueueError> {
        queue_deadline(ctx, async {
            let _guard = self.lock().await?;
            remove_if_exists(&self.path)
                .await
                .map_err(|e| self.io_error("delete", e))
        })
        .await
    }

    async fn clear(&self, ctx: &RequestContext) -> Result<(), QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(true, |queue, _| {
                queue.clear();
                Ok(())
            }),
        )
        .await
    }

    async fn fetch_attributes(&self, ctx: &RequestContext) -> Result<QueueAttributes, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(false, |queue, _| Ok(queue.attributes(Timestamp::now()))),
        )
        .await
    }

    async fn set_metadata(
        &self,
        metadata: HashMap<String, String>,
        ctx: &RequestContext,
    ) -> Result<(), QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(true, |queue, _| {
                queue.metadata = metadata;
                Ok(())
            }),
        )
        .await
    }

    async fn get_permissions(&self, ctx: &RequestContext) -> Result<QueuePermissions, QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(false, |queue, _| Ok(queue.permissions.clone())),
        )
        .await
    }

    async fn set_permissions(
        &self,
        permissions: QueuePermissions,
        ctx: &RequestContext,
    ) -> Result<(), QueueError> {
        queue_deadline(
            ctx,
            self.with_queue(true, |queue, _| {
                queue.permissions = permissions;
                Ok(())
            }),
        )
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
            self.with_queue(true, |queue, limits| {
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
            self.with_queue(true, |queue, _| {
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
            self.with_queue(true, |queue, _| {
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
            self.with_queue(false, |queue, _| {
                Ok(queue.peek(1, Timestamp::now())?.pop())
            }),
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
            self.with_queue(false, |queue, _| queue.peek(count, Timestamp::now())),
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
            self.with_queue(true, |queue, limits| {
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
            self.with_queue(true, |queue, _| {
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

struct FilesystemBlobContainerClient {
    name: ContainerName,
    record_path: PathBuf,
    blob_dir: PathBuf,
    state: Arc<AccountState>,
}

impl FilesystemBlobContainerClient {
    fn io_error(&self, action: &str, target: &Path, error: io::Error) -> BlobError {
        BlobError::Internal {
            message: format!("failed to {} {}: {}", action, target.display(), error),
        }
    }

    /// Fail unless the container record exists
    async fn require_container(&self) -> Result<(), BlobError> {
        let record: Option<ContainerRecord> = read_json(&self.record_path)
            .await
            .map_err(|e| self.io_error("read", &self.record_path, e))?;
        match record {
            Some(_) => Ok(()),
            None => Err(BlobError::ContainerNotFound {
                container: self.name.to_string(),
            }),
        }
    }

    async fn lock(&self) -> Result<AccountGuard, BlobError> {
        self.state
            .lock()
            .await
            .map_err(|e| self.io_error("lock", &self.state.root.join(LOCK_FILE), e))
    }

    fn blob_path(&self, blob_name: &BlobName) -> PathBuf {
        self.blob_dir.join(blob_name.as_str())
    }
}

#[async_trait]
impl BlobContainerClient for FilesystemBlobContainerClient {
    fn name(&self) -> &ContainerName {
        &self.name
    }

    async fn create_if_not_exists(
        &self,
        access: PublicAccess,
        ctx: &RequestContext,
    ) -> Result<bool, BlobError> {
        blob_deadline(ctx, async {
            let guard = self.lock().await?;
            if self.require_container().await.is_ok() {
                return Ok(false);
            }

            let record = ContainerRecord {
                access,
                created_at: Timestamp::now(),
            };
            let json = serde_json::to_vec_pretty(&record).map_err(|e| BlobError::Internal {
                message: format!("failed to serialize container record: {}", e),
            })?;
            fs::create_dir_all(&self.blob_dir)
                .await
                .map_err(|e| self.io_error("create", &self.blob_dir, e))?;
            self.state
                .commit(self.record_path.clone(), json, guard)
                .await
                .map_err(|e| self.io_error("write", &self.record_path, e))?;

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
            let guard = self.lock().await?;
            self.require_container().await?;

            let stored = StoredBlob {
                checksum_sha256: compute_checksum(&data),
                size_bytes: data.len() as u64,
                created_at: Timestamp::now(),
                data: BASE64.encode(&data),
            };
            let json = serde_json::to_vec(&stored).map_err(|e| BlobError::Internal {
                message: format!("failed to serialize blob record: {}", e),
            })?;

            let path = self.blob_path(blob_name);
            self.state
                .commit(path.clone(), json, guard)
                .await
                .map_err(|e| self.io_error("write", &path, e))
        })
        .await
    }

    async fn download(
        &self,
        blob_name: &BlobName,
        ctx: &RequestContext,
    ) -> Result<Bytes, BlobError> {
        blob_deadline(ctx, async {
            let _guard = self.lock().await?;
            self.require_container().await?;

            let path = self.blob_path(blob_name);
            let stored: StoredBlob = read_json(&path)
                .await
                .map_err(|e| self.io_error("read", &path, e))?
                .ok_or_else(|| BlobError::NotFound {
                    blob_name: blob_name.to_string(),
                })?;

            let data = BASE64
                .decode(stored.data.as_bytes())
                .map_err(|e| BlobError::Internal {
                    message: format!("blob {} is not valid base64: {}", blob_name, e),
                })?;

            let actual = compute_checksum(&data);
            let matches: bool = actual
                .as_bytes()
                .ct_eq(stored.checksum_sha256.as_bytes())
                .into();
            if !matches {
                return Err(BlobError::ChecksumMismatch {
                    blob_name: blob_name.to_string(),
                    expected: stored.checksum_sha256,
                    actual,
                });
            }

            Ok(Bytes::from(data))
        })
        .await
    }

    async fn delete(&self, blob_name: &BlobName, ctx: &RequestContext) -> Result<(), BlobError> {
        blob_deadline(ctx, async {
            let _guard = self.lock().await?;
            self.require_container().await?;

            let path = self.blob_path(blob_name);
            let removed = remove_if_exists(&path)
                .await
                .map_err(|e| self.io_error("delete", &path, e))?;
            if removed {
                Ok(())
            } else {
                Err(BlobError::NotFound {
                    blob_name: blob_name.to_string(),
                })
            }
        })
        .await
    }

    async fn exists(&self, blob_name: &BlobName, ctx: &RequestContext) -> Result<bool, BlobError> {
        blob_deadline(ctx, async {
            let _guard = self.lock().await?;
            self.require_container().await?;

            let path = self.blob_path(blob_name);
            fs::try_exists(&path)
                .await
                .map_err(|e| self.io_error("inspect", &path, e))
        })
        .await
    }

    async fn list(&self, ctx: &RequestContext) -> Result<Vec<BlobName>, BlobError> {
        blob_deadline(ctx, async {
            let _guard = self.lock().await?;
            self.require_container().await?;

            let mut names = Vec::new();
            let mut entries = fs::read_dir(&self.blob_dir)
                .await
                .map_err(|e| self.io_error("list", &self.blob_dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| self.io_error("list", &self.blob_dir, e))?
            {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(name) = BlobName::new(name) {
                        names.push(name);
                    }
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }
}

#[cfg(test)]
#[path = "filesystem_tests.rs"]
mod tests;
