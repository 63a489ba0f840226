//! # Blob Container Interface
//!
//! Byte blob storage used to hold payloads that exceed the queue's size limit.

use crate::error::BlobError;
use crate::options::RequestContext;
use crate::{BlobName, ContainerName};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Public read access level of a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicAccess {
    /// Only authorized requests may read
    #[default]
    Off,
    /// Anonymous reads of individual blobs
    Blob,
    /// Anonymous reads and listing
    Container,
}

/// Interface to a single blob container
///
/// All implementations must provide read-after-write consistency for a
/// single blob and be safe for concurrent use.
#[async_trait]
pub trait BlobContainerClient: Send + Sync {
    /// Name of the container this client addresses
    fn name(&self) -> &ContainerName;

    /// Create the container; returns `false` when it already existed
    ///
    /// An existing container keeps its original access level.
    async fn create_if_not_exists(
        &self,
        access: PublicAccess,
        ctx: &RequestContext,
    ) -> Result<bool, BlobError>;

    /// Write (or overwrite) a blob
    async fn upload(
        &self,
        blob_name: &BlobName,
        data: Bytes,
        ctx: &RequestContext,
    ) -> Result<(), BlobError>;

    /// Read a blob
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if the blob does not exist.
    async fn download(&self, blob_name: &BlobName, ctx: &RequestContext)
        -> Result<Bytes, BlobError>;

    /// Delete a blob
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] if the blob does not exist.
    async fn delete(&self, blob_name: &BlobName, ctx: &RequestContext) -> Result<(), BlobError>;

    /// Check whether a blob exists
    async fn exists(&self, blob_name: &BlobName, ctx: &RequestContext) -> Result<bool, BlobError>;

    /// List blob names in the container, sorted
    async fn list(&self, ctx: &RequestContext) -> Result<Vec<BlobName>, BlobError>;
}
