//! Error types for chunking, staging and manifest operations.

use std::path::PathBuf;

/// Errors that can occur during CAS operations.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// The source file could not be opened or read.
    #[error("cannot read source {path}: {source}")]
    SourceUnreadable {
        /// Path of the source file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A chunk could not be written to the staging directory.
    #[error("cannot write staging file {path}: {source}")]
    StagingWrite {
        /// Path of the staging file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunking parameters are inconsistent or outside the engine's range.
    #[error("invalid chunking parameters: {0}")]
    InvalidParams(String),

    /// The boundary function could not make progress.
    #[error("chunking failed: {0}")]
    Chunking(String),

    /// Chunking was cancelled before the scan finished.
    #[error("chunking cancelled")]
    Cancelled,

    /// A manifest needs at least one segment.
    #[error("empty input: a manifest needs at least one chunk")]
    EmptyInput,

    /// Segment list does not describe a contiguous file.
    #[error("invalid segment list: {0}")]
    InvalidSegments(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Manifest has an unsupported version.
    #[error("unsupported manifest version {found}, this build supports version {supported}")]
    UnsupportedVersion {
        /// Version found in the manifest.
        found: u8,
        /// Version this build supports.
        supported: u8,
    },

    /// Reassembled data does not match the manifest.
    #[error("reassembly mismatch: {0}")]
    Mismatch(String),
}
