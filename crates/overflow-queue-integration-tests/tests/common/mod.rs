//! Shared fixtures for the end-to-end tests.
//!
//! Every scenario runs against both shipped storage adapters through
//! [`backend_tests!`].

#![allow(dead_code)]

use overflow_queue_core::adapters::{FilesystemStorageAccount, InMemoryStorageAccount};
use overflow_queue_core::{
    BlobContainerClient, BlobName, ContainerName, QueueClient, QueueManager, QueueName,
    RequestContext, StorageAccount, DEFAULT_CONTAINER_NAME,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

/// Storage adapter a scenario runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Filesystem,
}

/// A storage account plus whatever keeps it alive
pub struct TestEnv {
    pub backend: Backend,
    pub account: Arc<dyn StorageAccount>,
    dir: Option<TempDir>,
}

impl TestEnv {
    pub fn new(backend: Backend) -> Self {
        match backend {
            Backend::Memory => Self {
                backend,
                account: Arc::new(InMemoryStorageAccount::new("integration")),
                dir: None,
            },
            Backend::Filesystem => {
                let dir = TempDir::new().expect("Failed to create temp dir");
                let account =
                    FilesystemStorageAccount::new(dir.path(), "integration", Some(b"key".to_vec()));
                Self {
                    backend,
                    account: Arc::new(account),
                    dir: Some(dir),
                }
            }
        }
    }

    /// Open a second account over the same storage, as another process would
    pub fn reopen(&self) -> Arc<dyn StorageAccount> {
        match &self.dir {
            Some(dir) => Arc::new(FilesystemStorageAccount::new(
                dir.path(),
                "integration",
                Some(b"key".to_vec()),
            )),
            None => Arc::clone(&self.account),
        }
    }

    pub async fn manager(&self, queue: &str) -> QueueManager {
        QueueManager::new(self.account.as_ref(), queue)
            .await
            .expect("Failed to construct queue manager")
    }

    pub fn queue(&self, queue: &str) -> Arc<dyn QueueClient> {
        self.account
            .queue_client(&QueueName::new(queue).expect("valid queue name"))
    }

    pub fn container(&self) -> Arc<dyn BlobContainerClient> {
        self.account.blob_container_client(
            &ContainerName::new(DEFAULT_CONTAINER_NAME).expect("valid container name"),
        )
    }

    pub async fn blob_names(&self) -> Vec<BlobName> {
        self.container()
            .list(&RequestContext::default())
            .await
            .expect("Failed to list blobs")
    }
}

/// Record used by most scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub sequence: u32,
    pub data: String,
}

impl Record {
    pub fn new(sequence: u32, size: usize) -> Self {
        Self {
            sequence,
            data: "r".repeat(size),
        }
    }
}

/// Generate one `#[tokio::test]` per backend for each scenario function
macro_rules! backend_tests {
    ($($scenario:ident),+ $(,)?) => {
        mod memory {
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $scenario() {
                    super::$scenario(&crate::common::TestEnv::new(crate::common::Backend::Memory)).await;
                }
            )+
        }

        mod filesystem {
            $(
                #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
                async fn $scenario() {
                    super::$scenario(&crate::common::TestEnv::new(crate::common::Backend::Filesystem)).await;
                }
            )+
        }
    };
}
