//! Dedup-aware upload of staged chunks.
//!
//! Every distinct staged chunk is checked against the container first and
//! only transferred when absent. Uploads run concurrently on a bounded
//! worker pool; there is no ordering between them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use dedup_store::{BlobStore, ContainerStatus, StoreError};
use dedup_types::{Fingerprint, Manifest};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cancel::Cancellation;
use crate::error::{EngineError, Phase};
use crate::retry::{RetryPolicy, with_retry};

/// Terminal state of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Uploaded,
    Skipped,
    /// `permanent` failures stop dispatch of further chunks.
    Failed { reason: String, permanent: bool },
}

impl Outcome {
    fn store_failure(err: StoreError) -> Self {
        Self::Failed {
            permanent: !err.is_transient(),
            reason: err.to_string(),
        }
    }

    fn local_failure(reason: String) -> Self {
        Self::Failed {
            reason,
            permanent: true,
        }
    }
}

/// What happened to every staged chunk in one `upload_all` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Target container.
    pub container: String,
    /// Whether the container already existed or was created for this run.
    pub container_status: ContainerStatus,
    /// Chunks transferred by this run.
    pub uploaded: Vec<Fingerprint>,
    /// Chunks already present in the container.
    pub skipped: Vec<Fingerprint>,
    /// Chunks that could not be stored, with the reason.
    pub failed: Vec<(Fingerprint, String)>,
    /// Chunks never dispatched because uploads were stopped.
    pub not_attempted: Vec<Fingerprint>,
    /// Whether dispatch stopped because of cancellation.
    pub cancelled: bool,
}

impl UploadReport {
    fn new(container: &str, container_status: ContainerStatus) -> Self {
        Self {
            container: container.to_string(),
            container_status,
            uploaded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            not_attempted: Vec::new(),
            cancelled: false,
        }
    }

    /// Every staged chunk is now in the store.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty() && !self.cancelled
    }

    /// Chunks known to be in the store after this run.
    pub fn stored(&self) -> BTreeSet<Fingerprint> {
        self.uploaded.iter().chain(&self.skipped).copied().collect()
    }

    /// Fail unless every chunk `manifest` references is in the store.
    pub fn ensure_covers(&self, manifest: &Manifest) -> Result<(), EngineError> {
        let stored = self.stored();
        let missing: Vec<Fingerprint> = manifest
            .distinct_fingerprints()
            .into_iter()
            .filter(|fp| !stored.contains(fp))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        if self.cancelled {
            return Err(EngineError::Cancelled {
                phase: Phase::ChunkUpload,
                orphans: self.uploaded.clone(),
            });
        }

        let mut failed = self.failed.clone();
        for fp in &missing {
            let known = failed.iter().any(|(f, _)| f == fp) || self.not_attempted.contains(fp);
            if !known {
                failed.push((*fp, "chunk was not staged".to_string()));
            }
        }
        Err(EngineError::ChunkUpload {
            failed,
            not_attempted: self.not_attempted.len(),
            orphans: self.uploaded.clone(),
        })
    }

    fn record(&mut self, fingerprint: Fingerprint, outcome: Outcome) {
        match outcome {
            Outcome::Uploaded => self.uploaded.push(fingerprint),
            Outcome::Skipped => self.skipped.push(fingerprint),
            Outcome::Failed { reason, .. } => self.failed.push((fingerprint, reason)),
        }
    }

    fn sort(&mut self) {
        self.uploaded.sort();
        self.skipped.sort();
        self.failed.sort_by(|a, b| a.0.cmp(&b.0));
        self.not_attempted.sort();
    }
}

/// Uploads staged chunks to a container with skip-identical semantics.
pub struct ChunkUploader {
    store: Arc<dyn BlobStore>,
    workers: usize,
    retry: RetryPolicy,
    cancel: Cancellation,
}

impl ChunkUploader {
    /// Create an uploader with at most `workers` uploads in flight.
    pub fn new(store: Arc<dyn BlobStore>, workers: usize, retry: RetryPolicy) -> Self {
        Self {
            store,
            workers: workers.max(1),
            retry,
            cancel: Cancellation::never(),
        }
    }

    /// Stop dispatching new uploads once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Upload every distinct chunk staged in `staging_dir` to `container`.
    ///
    /// Per-chunk failures are collected in the report rather than returned.
    /// A permanent failure stops dispatch of further chunks, while uploads
    /// already in flight run to completion. Errors are returned only when the
    /// container is unusable or the staging directory cannot be listed.
    #[tracing::instrument(skip(self, staging_dir), fields(staging = %staging_dir.display()))]
    pub async fn upload_all(
        &self,
        container: &str,
        staging_dir: &Path,
    ) -> Result<UploadReport, EngineError> {
        let status = with_retry(&self.retry, "ensure_container", container, || {
            let store = self.store.clone();
            let container = container.to_string();
            async move { store.ensure_container(&container).await }
        })
        .await
        .map_err(|e| EngineError::from_store(Phase::ChunkUpload, e, Vec::new()))?;
        if status == ContainerStatus::Created {
            info!(container, "container created on demand");
        }

        let staged = list_staged(staging_dir).await?;
        let mut report = UploadReport::new(container, status);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let stop = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();
        let mut pending = staged.iter().copied();

        for fingerprint in pending.by_ref() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.not_attempted.push(fingerprint);
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit,
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    report.not_attempted.push(fingerprint);
                    break;
                }
            };
            let Ok(permit) = permit else {
                report.not_attempted.push(fingerprint);
                break;
            };

            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.not_attempted.push(fingerprint);
                break;
            }
            if stop.load(Ordering::SeqCst) {
                report.not_attempted.push(fingerprint);
                break;
            }

            let job = UploadJob {
                store: self.store.clone(),
                container: container.to_string(),
                path: staging_dir.join(fingerprint.to_string()),
                fingerprint,
                retry: self.retry,
            };
            let stop = stop.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = job.run().await;
                if let Outcome::Failed {
                    permanent: true, ..
                } = outcome
                {
                    stop.store(true, Ordering::SeqCst);
                }
                (job.fingerprint, outcome)
            });
        }
        report.not_attempted.extend(pending);

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((fingerprint, outcome)) => report.record(fingerprint, outcome),
                Err(e) => warn!(error = %e, "chunk upload task panicked"),
            }
        }

        // A panicked task leaves its chunk unaccounted for.
        let accounted: BTreeSet<Fingerprint> = report
            .stored()
            .into_iter()
            .chain(report.failed.iter().map(|(fp, _)| *fp))
            .chain(report.not_attempted.iter().copied())
            .collect();
        for fingerprint in staged.difference(&accounted) {
            report
                .failed
                .push((*fingerprint, "upload task panicked".to_string()));
        }

        report.sort();
        info!(
            container,
            uploaded = report.uploaded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            not_attempted = report.not_attempted.len(),
            cancelled = report.cancelled,
            "chunk upload finished"
        );
        Ok(report)
    }
}

/// One chunk's upload, run on a worker task.
struct UploadJob {
    store: Arc<dyn BlobStore>,
    container: String,
    path: PathBuf,
    fingerprint: Fingerprint,
    retry: RetryPolicy,
}

impl UploadJob {
    async fn run(&self) -> Outcome {
        let name = self.fingerprint.to_string();

        let exists = with_retry(&self.retry, "exists", &name, || {
            let store = self.store.clone();
            let (container, name) = (self.container.clone(), name.clone());
            async move { store.exists(&container, &name).await }
        })
        .await;
        match exists {
            Ok(true) => {
                debug!(fingerprint = %self.fingerprint, "chunk already stored, skipping");
                self.release_staged().await;
                return Outcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => return Outcome::store_failure(e),
        }

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => Bytes::from(data),
            Err(e) => return Outcome::local_failure(format!("cannot read staged chunk: {e}")),
        };
        let actual = Fingerprint::from_data(&data);
        if actual != self.fingerprint {
            warn!(fingerprint = %self.fingerprint, %actual, "staged chunk corrupted");
            return Outcome::local_failure(format!("staged chunk is corrupt (hashes to {actual})"));
        }

        let put = with_retry(&self.retry, "put", &name, || {
            let store = self.store.clone();
            let (container, name) = (self.container.clone(), name.clone());
            let data = data.clone();
            async move { store.put(&container, &name, data).await }
        })
        .await;
        match put {
            Ok(()) => {
                debug!(fingerprint = %self.fingerprint, size = data.len(), "chunk uploaded");
                self.release_staged().await;
                Outcome::Uploaded
            }
            Err(e) => Outcome::store_failure(e),
        }
    }

    /// Drop the staged copy once the store holds the chunk.
    async fn release_staged(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!(path = %self.path.display(), error = %e, "could not remove staged chunk");
        }
    }
}

/// Distinct fingerprint-named files in the staging directory.
async fn list_staged(staging_dir: &Path) -> Result<BTreeSet<Fingerprint>, EngineError> {
    let io_err = |source| EngineError::Io {
        phase: Phase::ChunkUpload,
        source,
    };

    let mut staged = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(staging_dir).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        match name.parse::<Fingerprint>() {
            Ok(fp) if fp.to_string() == name => {
                staged.insert(fp);
            }
            _ => debug!(name, "ignoring non-chunk staging entry"),
        }
    }
    Ok(staged)
}
