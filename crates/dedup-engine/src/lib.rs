//! Upload session orchestration for dedup.
//!
//! The [`DedupPipeline`] owns one run: it acquires a [`StagingArea`],
//! chunks the source into it, uploads distinct chunks with the
//! [`ChunkUploader`], publishes the manifest with the [`ManifestUploader`]
//! and releases the staging area on every exit path.

pub mod cancel;
pub mod config;
pub mod error;
pub mod manifest_uploader;
pub mod pipeline;
pub mod retry;
pub mod session;
pub mod uploader;

pub use cancel::{CancelHandle, Cancellation};
pub use config::{
    DEFAULT_CHUNK_CONTAINER, DEFAULT_MANIFEST_CONTAINER, DEFAULT_WORKERS, UploadConfig,
};
pub use error::{EngineError, Phase};
pub use manifest_uploader::ManifestUploader;
pub use pipeline::{DedupPipeline, MANIFEST_ARTIFACT, RunSummary, manifest_name, reassemble};
pub use retry::{RetryPolicy, with_retry};
pub use session::{SESSION_LOCK, StagingArea};
pub use uploader::{ChunkUploader, UploadReport};

#[cfg(test)]
mod tests;
