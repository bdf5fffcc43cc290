//! Error types for blob store operations.

/// Classification of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The object does not exist.
    NotFound,
    /// The container does not exist and the store will not create it.
    ContainerNotFound,
    /// Credentials were rejected.
    Auth,
    /// A temporary network or service failure; safe to retry.
    Transient,
    /// The request conflicts with the store's current state.
    Conflict,
    /// A composite object references a segment the store does not hold.
    SegmentMissing,
    /// Local I/O failure inside the store.
    Io,
}

/// Errors that can occur during blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {container}/{name}")]
    NotFound {
        /// Container name.
        container: String,
        /// Object name.
        name: String,
    },

    /// The container does not exist.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Authentication or authorization failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Temporary failure (timeout, connection reset, 5xx).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Conflicting state, such as a size mismatch or a reserved name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A composite manifest references a segment that is not stored.
    #[error("segment missing: {container}/{object}")]
    SegmentMissing {
        /// Container of the missing segment.
        container: String,
        /// Object name of the missing segment.
        object: String,
    },

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ContainerNotFound(_) => ErrorKind::ContainerNotFound,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::SegmentMissing { .. } => ErrorKind::SegmentMissing,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Build a representative error of the given kind for `container/name`.
    pub fn synthetic(kind: ErrorKind, container: &str, name: &str) -> Self {
        let target = format!("{container}/{name}");
        match kind {
            ErrorKind::NotFound => Self::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            },
            ErrorKind::ContainerNotFound => Self::ContainerNotFound(container.to_string()),
            ErrorKind::Auth => Self::Auth(format!("injected auth failure for {target}")),
            ErrorKind::Transient => Self::Transient(format!("injected failure for {target}")),
            ErrorKind::Conflict => Self::Conflict(format!("injected conflict for {target}")),
            ErrorKind::SegmentMissing => Self::SegmentMissing {
                container: container.to_string(),
                object: name.to_string(),
            },
            ErrorKind::Io => Self::Io(std::io::Error::other(format!(
                "injected io failure for {target}"
            ))),
        }
    }
}
