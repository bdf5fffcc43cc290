//! Core trait and types for the blob store collaborator.

use bytes::Bytes;
use dedup_types::SegmentRef;

use crate::error::StoreError;

/// Outcome of [`BlobStore::ensure_container`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// The container was already there.
    Existing,
    /// The store created the container on demand.
    Created,
}

/// An object store exposing containers of named blobs.
///
/// All implementations must be `Send + Sync` for use across async tasks.
/// Data is passed as [`Bytes`] to avoid copies between staging and upload.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Make sure `container` exists.
    ///
    /// Stores that create containers on demand return
    /// [`ContainerStatus::Created`]; stores that cannot return
    /// [`StoreError::ContainerNotFound`].
    async fn ensure_container(&self, container: &str) -> Result<ContainerStatus, StoreError>;

    /// Check whether an object (blob or composite) exists.
    async fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError>;

    /// Store a blob, replacing any object of the same name.
    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StoreError>;

    /// Store a composite object whose content is the concatenation of `segments`.
    ///
    /// Fails with [`StoreError::SegmentMissing`] if any segment is absent at
    /// upload time. Re-putting the same segment list is a no-op in effect.
    async fn put_multipart_manifest(
        &self,
        container: &str,
        name: &str,
        segments: &[SegmentRef],
    ) -> Result<(), StoreError>;

    /// Read an object. Composite objects are reassembled from their segments.
    async fn get(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError>;

    /// List object names in a container, sorted.
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError>;

    /// Reject an object name this store could never hold, without I/O.
    ///
    /// Lets callers fail before any upload. The default accepts every name.
    fn check_object_name(&self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }
}
