//! Upload session configuration.

use dedup_cas::{fit_params, validate_params};
use dedup_types::{ChunkingParams, EngineKind};

use crate::error::EngineError;
use crate::retry::RetryPolicy;

/// Default container holding chunk objects.
pub const DEFAULT_CHUNK_CONTAINER: &str = "chunks";

/// Default container holding manifests.
pub const DEFAULT_MANIFEST_CONTAINER: &str = "dedup";

/// Default number of concurrent chunk uploads.
pub const DEFAULT_WORKERS: usize = 8;

/// Everything one upload session needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Container that receives chunk objects.
    pub chunk_container: String,
    /// Container that receives the composite manifest.
    pub manifest_container: String,
    /// Maximum chunk uploads in flight.
    pub workers: usize,
    /// Retry policy for transient store failures.
    pub retry: RetryPolicy,
    /// Boundary function.
    pub engine: EngineKind,
    /// Chunk size bounds, used as-is unless `adaptive_divisor` is set.
    pub chunking: ChunkingParams,
    /// Derive chunk sizes from the source length (`len / divisor`).
    pub adaptive_divisor: Option<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_container: DEFAULT_CHUNK_CONTAINER.to_string(),
            manifest_container: DEFAULT_MANIFEST_CONTAINER.to_string(),
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            engine: EngineKind::default(),
            chunking: ChunkingParams::default(),
            adaptive_divisor: None,
        }
    }
}

impl UploadConfig {
    /// Check the configuration, failing fast on invalid combinations.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chunk_container.is_empty() || self.manifest_container.is_empty() {
            return Err(EngineError::InvalidConfig(
                "container names must not be empty".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(EngineError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.adaptive_divisor == Some(0) {
            return Err(EngineError::InvalidConfig(
                "adaptive divisor must be at least 1".to_string(),
            ));
        }
        if self.adaptive_divisor.is_none() {
            validate_params(self.engine, &self.chunking)
                .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }

    /// Chunking parameters for a source of `file_len` bytes.
    ///
    /// Adaptive sizes are clamped into the engine's range, so any length
    /// yields parameters that `validate()` would accept.
    pub fn params_for(&self, file_len: u64) -> ChunkingParams {
        match self.adaptive_divisor {
            Some(divisor) => fit_params(self.engine, ChunkingParams::adaptive(file_len, divisor)),
            None => self.chunking,
        }
    }
}
