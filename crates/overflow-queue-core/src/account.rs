//! Storage account capability that hands out queue and blob clients.

use crate::blob_client::BlobContainerClient;
use crate::queue_client::QueueClient;
use crate::{ContainerName, QueueName};
use std::sync::Arc;

/// Factory for collaborator clients bound to one storage account
///
/// Credential handling and endpoint resolution belong to the implementation;
/// creating a client performs no network call.
pub trait StorageAccount: Send + Sync {
    /// Account name (used for logging and signatures)
    fn account_name(&self) -> &str;

    /// Client for a queue in this account
    fn queue_client(&self, queue: &QueueName) -> Arc<dyn QueueClient>;

    /// Client for a blob container in this account
    fn blob_container_client(&self, container: &ContainerName) -> Arc<dyn BlobContainerClient>;
}
