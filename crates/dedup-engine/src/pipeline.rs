//! End-to-end dedup run: stage, chunk, upload chunks, upload manifest, clean up.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use dedup_cas::{CasError, Chunker, build_manifest, serialize_manifest, stage_file};
use dedup_store::{BlobStore, StoreError};
use dedup_types::Manifest;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::config::UploadConfig;
use crate::error::{EngineError, Phase};
use crate::manifest_uploader::ManifestUploader;
use crate::session::StagingArea;
use crate::uploader::{ChunkUploader, UploadReport};

/// File name of the local manifest artifact inside the staging directory.
pub const MANIFEST_ARTIFACT: &str = "manifest.postcard";

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Name of the manifest object in the manifest container.
    pub manifest_name: String,
    /// The uploaded manifest.
    pub manifest: Manifest,
    /// Per-chunk upload results.
    pub report: UploadReport,
    /// Distinct chunks produced by the chunker.
    pub distinct_chunks: usize,
}

/// Runs the whole pipeline for one source file at a time.
pub struct DedupPipeline {
    store: Arc<dyn BlobStore>,
    config: UploadConfig,
    cancel: Cancellation,
}

impl DedupPipeline {
    /// Create a pipeline, validating `config`.
    pub fn new(store: Arc<dyn BlobStore>, config: UploadConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            cancel: Cancellation::never(),
        })
    }

    /// Observe `cancel` during chunking and chunk upload.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// The configuration this pipeline runs with.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Deduplicate and upload `source`, staging chunks in `staging`.
    ///
    /// The staging directory is released on every exit path. On failure the
    /// error names the phase and any chunks left unreferenced in the store.
    #[tracing::instrument(
        skip(self, source, staging),
        fields(source = %source.display(), staging = %staging.display())
    )]
    pub async fn run(&self, source: &Path, staging: &Path) -> Result<RunSummary, EngineError> {
        let manifest_name = manifest_name(source)?;
        self.store
            .check_object_name(&manifest_name)
            .map_err(|e| EngineError::from_store(Phase::Setup, e, Vec::new()))?;
        let area = StagingArea::acquire(staging)?;

        let source_len = tokio::fs::metadata(source)
            .await
            .map_err(|source| EngineError::Io {
                phase: Phase::Chunking,
                source,
            })?
            .len();
        let params = self.config.params_for(source_len);
        let engine = self.config.engine;
        debug!(
            engine = %engine,
            min_size = params.min_size,
            target_size = params.target_size,
            max_size = params.max_size,
            "chunking parameters"
        );

        // Chunking is a single sequential scan; keep it off the async workers.
        let staged = {
            let source = source.to_path_buf();
            let staging_dir = area.path().to_path_buf();
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || {
                let chunker = Chunker::new(engine, params)?;
                stage_file(&chunker, &source, &staging_dir, &|| cancel.is_cancelled())
            })
            .await
            .map_err(|e| {
                EngineError::Chunking(CasError::Chunking(format!("chunking task failed: {e}")))
            })?
            .map_err(|e| EngineError::from_cas(Phase::Chunking, e))?
        };

        let manifest = build_manifest(
            &self.config.chunk_container,
            &staged.chunks,
            staged.file_hash,
        )
        .map_err(|e| EngineError::from_cas(Phase::Chunking, e))?;

        let artifact = area.path().join(MANIFEST_ARTIFACT);
        write_artifact(&artifact, &manifest).await?;

        let report = ChunkUploader::new(self.store.clone(), self.config.workers, self.config.retry)
            .with_cancellation(self.cancel.clone())
            .upload_all(&self.config.chunk_container, area.path())
            .await?;
        if report.cancelled {
            return Err(EngineError::Cancelled {
                phase: Phase::ChunkUpload,
                orphans: report.uploaded.clone(),
            });
        }
        // Barrier: every referenced chunk must be stored before the manifest goes up.
        report.ensure_covers(&manifest)?;

        ManifestUploader::new(self.store.clone(), self.config.retry)
            .upload_manifest(
                &self.config.manifest_container,
                &manifest_name,
                &manifest,
                &report.uploaded,
            )
            .await?;

        // The manifest is published; leftovers are the staging cleanup's concern.
        if let Err(e) = tokio::fs::remove_file(&artifact).await {
            warn!(path = %artifact.display(), error = %e, "failed to remove manifest artifact");
        }
        area.cleanup()?;

        info!(
            manifest = %format!("{}/{manifest_name}", self.config.manifest_container),
            total_size = manifest.total_size,
            segments = manifest.segment_count(),
            distinct_chunks = staged.distinct_chunks,
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            "dedup run complete"
        );

        Ok(RunSummary {
            manifest_name,
            manifest,
            report,
            distinct_chunks: staged.distinct_chunks,
        })
    }
}

/// Read a stored file back, reassembling composite objects.
pub async fn reassemble(
    store: &dyn BlobStore,
    container: &str,
    name: &str,
) -> Result<Bytes, EngineError> {
    match store.get(container, name).await {
        Ok(Some(data)) => Ok(data),
        Ok(None) => Err(EngineError::from_store(
            Phase::Reassembly,
            StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            },
            Vec::new(),
        )),
        Err(e) => Err(EngineError::from_store(Phase::Reassembly, e, Vec::new())),
    }
}

/// Manifest object name for `source`: its base name.
pub fn manifest_name(source: &Path) -> Result<String, EngineError> {
    source
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| EngineError::Io {
            phase: Phase::Setup,
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no UTF-8 file name", source.display()),
            ),
        })
}

async fn write_artifact(path: &Path, manifest: &Manifest) -> Result<(), EngineError> {
    let bytes =
        serialize_manifest(manifest).map_err(|e| EngineError::from_cas(Phase::Chunking, e))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| EngineError::Io {
            phase: Phase::Staging,
            source,
        })?;
    debug!(path = %path.display(), "persisted manifest artifact");
    Ok(())
}
