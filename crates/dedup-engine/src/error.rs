//! Error types for the upload pipeline.

use std::fmt;
use std::path::PathBuf;

use dedup_cas::CasError;
use dedup_store::{ErrorKind, StoreError};
use dedup_types::Fingerprint;

/// Stage of a run in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Validating configuration before anything is touched.
    Setup,
    /// Acquiring or releasing the staging directory.
    Staging,
    /// Scanning the source and building the manifest.
    Chunking,
    /// Uploading staged chunks.
    ChunkUpload,
    /// Uploading the composite manifest.
    ManifestUpload,
    /// Reading a stored file back.
    Reassembly,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Staging => "staging",
            Self::Chunking => "chunking",
            Self::ChunkUpload => "chunk upload",
            Self::ManifestUpload => "manifest upload",
            Self::Reassembly => "reassembly",
        })
    }
}

/// Errors that can end a run.
///
/// `orphans` lists chunks stored by this run that no uploaded manifest
/// references. They are safe to leave behind.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration was rejected before the run started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The staging directory holds files from an earlier run.
    #[error("staging directory {} is not empty ({entries} entries)", .path.display())]
    StagingConflict {
        /// The staging directory.
        path: PathBuf,
        /// Number of entries found in it.
        entries: usize,
    },

    /// Local I/O failure (source unreadable, staging unwritable).
    #[error("{phase} failed: {source}")]
    Io {
        /// Phase that failed.
        phase: Phase,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The chunking engine failed or was misconfigured.
    #[error("chunking failed: {0}")]
    Chunking(#[source] CasError),

    /// The source file is empty.
    #[error("source is empty, nothing to upload")]
    EmptyInput,

    /// The store does not have the container and will not create it.
    #[error("{phase} failed: container {container} does not exist")]
    ContainerNotFound {
        /// Phase that failed.
        phase: Phase,
        /// The missing container.
        container: String,
        /// Chunks stored by this run but left unreferenced.
        orphans: Vec<Fingerprint>,
    },

    /// The store rejected our credentials.
    #[error("{phase} failed: authentication rejected: {message}")]
    Auth {
        /// Phase that failed.
        phase: Phase,
        /// Store message.
        message: String,
        /// Chunks stored by this run but left unreferenced.
        orphans: Vec<Fingerprint>,
    },

    /// A transient store failure outlasted the retry budget.
    #[error("{phase} failed: store unavailable after retries: {message}")]
    Transient {
        /// Phase that failed.
        phase: Phase,
        /// Store message.
        message: String,
        /// Chunks stored by this run but left unreferenced.
        orphans: Vec<Fingerprint>,
    },

    /// Some referenced chunks could not be stored.
    #[error("chunk upload failed: {}", describe_failures(.failed, .not_attempted))]
    ChunkUpload {
        /// Failed chunks with the reason for each.
        failed: Vec<(Fingerprint, String)>,
        /// Chunks never dispatched after uploads were stopped.
        not_attempted: usize,
        /// Chunks stored by this run but left unreferenced.
        orphans: Vec<Fingerprint>,
    },

    /// The store refused the composite manifest.
    #[error("manifest upload of {name} failed: {source}")]
    ManifestUpload {
        /// Manifest object name.
        name: String,
        /// Store error.
        #[source]
        source: StoreError,
        /// Chunks stored by this run but left unreferenced.
        orphans: Vec<Fingerprint>,
    },

    /// Any other store failure.
    #[error("{phase} failed: {source}")]
    Store {
        /// Phase that failed.
        phase: Phase,
        /// Store error.
        #[source]
        source: StoreError,
        /// Chunks stored by this run but left unreferenced.
        orphans: Vec<Fingerprint>,
    },

    /// The run was cancelled.
    #[error("cancelled during {phase}")]
    Cancelled {
        /// Phase that was interrupted.
        phase: Phase,
        /// Chunks stored by this run but left unreferenced.
        orphans: Vec<Fingerprint>,
    },
}

impl EngineError {
    /// Phase of the run in which this error occurred.
    pub fn phase(&self) -> Phase {
        match self {
            Self::InvalidConfig(_) => Phase::Setup,
            Self::StagingConflict { .. } => Phase::Staging,
            Self::Chunking(_) | Self::EmptyInput => Phase::Chunking,
            Self::ChunkUpload { .. } => Phase::ChunkUpload,
            Self::ManifestUpload { .. } => Phase::ManifestUpload,
            Self::Io { phase, .. }
            | Self::ContainerNotFound { phase, .. }
            | Self::Auth { phase, .. }
            | Self::Transient { phase, .. }
            | Self::Store { phase, .. }
            | Self::Cancelled { phase, .. } => *phase,
        }
    }

    /// Chunks stored by this run that no uploaded manifest references.
    pub fn orphans(&self) -> &[Fingerprint] {
        match self {
            Self::ContainerNotFound { orphans, .. }
            | Self::Auth { orphans, .. }
            | Self::Transient { orphans, .. }
            | Self::ChunkUpload { orphans, .. }
            | Self::ManifestUpload { orphans, .. }
            | Self::Store { orphans, .. }
            | Self::Cancelled { orphans, .. } => orphans,
            _ => &[],
        }
    }

    /// Classify a store failure.
    pub fn from_store(phase: Phase, err: StoreError, orphans: Vec<Fingerprint>) -> Self {
        match err {
            StoreError::ContainerNotFound(container) => Self::ContainerNotFound {
                phase,
                container,
                orphans,
            },
            StoreError::Auth(message) => Self::Auth {
                phase,
                message,
                orphans,
            },
            StoreError::Transient(message) => Self::Transient {
                phase,
                message,
                orphans,
            },
            source => Self::Store {
                phase,
                source,
                orphans,
            },
        }
    }

    /// Classify a chunking or staging failure.
    pub fn from_cas(phase: Phase, err: CasError) -> Self {
        match err {
            CasError::SourceUnreadable { source, .. }
            | CasError::StagingWrite { source, .. }
            | CasError::Io(source) => Self::Io { phase, source },
            CasError::EmptyInput => Self::EmptyInput,
            CasError::Cancelled => Self::Cancelled {
                phase,
                orphans: Vec::new(),
            },
            other => Self::Chunking(other),
        }
    }

    /// Whether the store classified the underlying failure as `kind`.
    pub fn is_store_kind(&self, kind: ErrorKind) -> bool {
        match self {
            Self::ContainerNotFound { .. } => kind == ErrorKind::ContainerNotFound,
            Self::Auth { .. } => kind == ErrorKind::Auth,
            Self::Transient { .. } => kind == ErrorKind::Transient,
            Self::ManifestUpload { source, .. } | Self::Store { source, .. } => {
                source.kind() == kind
            }
            _ => false,
        }
    }
}

fn describe_failures(failed: &[(Fingerprint, String)], not_attempted: &usize) -> String {
    let mut out = match failed.first() {
        Some((fingerprint, reason)) if failed.len() == 1 => {
            format!("chunk {fingerprint} failed: {reason}")
        }
        Some((fingerprint, reason)) => format!(
            "{} chunks failed, first {fingerprint}: {reason}",
            failed.len()
        ),
        None => "no chunk failed".to_string(),
    };
    if *not_attempted > 0 {
        out.push_str(&format!(" ({not_attempted} not attempted)"));
    }
    out
}
