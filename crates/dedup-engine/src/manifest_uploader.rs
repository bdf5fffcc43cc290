//! Upload of the composite manifest object.

use std::sync::Arc;

use dedup_store::{BlobStore, ErrorKind, StoreError};
use dedup_types::{Fingerprint, Manifest};
use tracing::info;

use crate::error::{EngineError, Phase};
use crate::retry::{RetryPolicy, with_retry};

/// Publishes a [`Manifest`] as a multi-segment object.
///
/// Segment existence is checked by the store, not re-validated here. The
/// upload is idempotent, so transient failures retry the whole request.
pub struct ManifestUploader {
    store: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl ManifestUploader {
    /// Create an uploader.
    pub fn new(store: Arc<dyn BlobStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Upload `manifest` as `container/name`.
    ///
    /// `orphans` are the chunks this run stored; they are attached to the
    /// error if the manifest cannot be published.
    pub async fn upload_manifest(
        &self,
        container: &str,
        name: &str,
        manifest: &Manifest,
        orphans: &[Fingerprint],
    ) -> Result<(), EngineError> {
        let target = format!("{container}/{name}");

        with_retry(&self.retry, "ensure_container", container, || {
            let store = self.store.clone();
            let container = container.to_string();
            async move { store.ensure_container(&container).await }
        })
        .await
        .map_err(|e| EngineError::from_store(Phase::ManifestUpload, e, orphans.to_vec()))?;

        let segments = manifest.segment_refs();
        with_retry(&self.retry, "put_multipart_manifest", &target, || {
            let store = self.store.clone();
            let (container, name) = (container.to_string(), name.to_string());
            let segments = segments.clone();
            async move {
                store
                    .put_multipart_manifest(&container, &name, &segments)
                    .await
            }
        })
        .await
        .map_err(|e| classify(name, e, orphans))?;

        info!(
            container,
            name,
            segments = segments.len(),
            total_size = manifest.total_size,
            "manifest uploaded"
        );
        Ok(())
    }
}

fn classify(name: &str, err: StoreError, orphans: &[Fingerprint]) -> EngineError {
    match err.kind() {
        ErrorKind::SegmentMissing | ErrorKind::Conflict => EngineError::ManifestUpload {
            name: name.to_string(),
            source: err,
            orphans: orphans.to_vec(),
        },
        _ => EngineError::from_store(Phase::ManifestUpload, err, orphans.to_vec()),
    }
}
