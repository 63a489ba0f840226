//! # Storage Adapters
//!
//! [`StorageAccount`](crate::StorageAccount) implementations for local
//! development and testing.
//!
//! - [`InMemoryStorageAccount`]: process-local state with fault injection
//! - [`FilesystemStorageAccount`]: durable state under a root directory

pub mod filesystem;
pub mod memory;
mod queue_state;
mod signing;

pub use filesystem::FilesystemStorageAccount;
pub use memory::{InMemoryFault, InMemoryStorageAccount};
pub use queue_state::{
    QueueLimits, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MESSAGE_TTL_SECONDS,
    DEFAULT_VISIBILITY_TIMEOUT_SECONDS, MAX_VISIBILITY_TIMEOUT_SECONDS,
};
pub use signing::SIGNATURE_VERSION;

use crate::error::{BlobError, QueueError};
use crate::options::RequestContext;
use std::future::Future;

/// Enforce the per-request server timeout on a queue call
async fn queue_deadline<T, F>(ctx: &RequestContext, future: F) -> Result<T, QueueError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    match ctx.options.server_timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .unwrap_or_else(|_| {
                Err(QueueError::Timeout {
                    duration: chrono::Duration::from_std(limit)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
                })
            }),
        None => future.await,
    }
}

/// Enforce the per-request server timeout on a blob call
async fn blob_deadline<T, F>(ctx: &RequestContext, future: F) -> Result<T, BlobError>
where
    F: Future<Output = Result<T, BlobError>>,
{
    match ctx.options.server_timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .unwrap_or_else(|_| {
                Err(BlobError::Timeout {
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }),
        None => future.await,
    }
}
