//! TOML configuration for the `dedup` binary.
//!
//! Every section and field is optional; a missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use dedup_engine::{
    DEFAULT_CHUNK_CONTAINER, DEFAULT_MANIFEST_CONTAINER, DEFAULT_WORKERS, RetryPolicy,
    UploadConfig,
};
use dedup_types::{ChunkingParams, DEFAULT_ADAPTIVE_DIVISOR, EngineKind};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Object store backend.
    pub store: StoreSection,
    /// Container names.
    pub containers: ContainersSection,
    /// Chunk boundary tuning.
    pub chunking: ChunkingSection,
    /// Upload concurrency and retries.
    pub upload: UploadSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[store]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Root directory of the file backend.
    pub root: PathBuf,
    /// Create missing containers on first use.
    pub create_containers: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        let root = dirs::data_dir()
            .map(|d| d.join("dedup"))
            .unwrap_or_else(|| PathBuf::from(".dedup"));
        Self {
            backend: "file".to_string(),
            root,
            create_containers: true,
        }
    }
}

/// `[containers]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ContainersSection {
    /// Container receiving chunk objects.
    pub chunks: String,
    /// Container receiving manifests.
    pub manifests: String,
}

impl Default for ContainersSection {
    fn default() -> Self {
        Self {
            chunks: DEFAULT_CHUNK_CONTAINER.to_string(),
            manifests: DEFAULT_MANIFEST_CONTAINER.to_string(),
        }
    }
}

/// `[chunking]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    /// `"rolling"` (default), `"fastcdc"` or `"fixed"`.
    pub engine: String,
    /// Smallest chunk the engine may cut. Defaults to 85% of the target.
    pub min_size: Option<u64>,
    /// Expected chunk size. When set alone, min and max are derived from it.
    pub target_size: Option<u64>,
    /// Largest chunk the engine may cut. Defaults to twice the target.
    pub max_size: Option<u64>,
    /// Rolling hash window in bytes. Defaults to 48.
    pub window_size: Option<u64>,
    /// Residue of `hash % target_size` that marks a rolling boundary. Defaults to 23.
    pub boundary_value: Option<u64>,
    /// Size chunks relative to the source length instead.
    pub adaptive: bool,
    /// Divisor for adaptive sizing. Defaults to 64.
    pub divisor: Option<u64>,
}

impl Default for ChunkingSection {
    fn default() -> Self {
        Self {
            engine: EngineKind::default().to_string(),
            min_size: None,
            target_size: None,
            max_size: None,
            window_size: None,
            boundary_value: None,
            adaptive: false,
            divisor: None,
        }
    }
}

/// `[upload]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    /// Concurrent chunk uploads. Defaults to 8.
    pub workers: Option<usize>,
    /// Attempts per request, the first one included. Defaults to 3.
    pub max_attempts: Option<u32>,
    /// Backoff after the first failure. Defaults to 100 ms.
    pub base_delay_ms: Option<u64>,
    /// Backoff ceiling. Defaults to 5 s.
    pub max_delay_ms: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective chunking engine.
    pub fn engine(&self) -> anyhow::Result<EngineKind> {
        self.chunking
            .engine
            .parse::<EngineKind>()
            .map_err(anyhow::Error::msg)
    }

    /// Effective chunk size bounds for non-adaptive runs.
    pub fn chunking_params(&self) -> ChunkingParams {
        let section = &self.chunking;
        let mut params = match section.target_size {
            Some(target) => ChunkingParams::new(target * 85 / 100, target, target * 2),
            None => ChunkingParams::default(),
        };
        if let Some(min) = section.min_size {
            params.min_size = min;
        }
        if let Some(max) = section.max_size {
            params.max_size = max;
        }
        if let Some(window) = section.window_size {
            params.window_size = window;
        }
        if let Some(boundary) = section.boundary_value {
            params.boundary_value = boundary;
        }
        params
    }

    /// Effective retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.upload.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self
                .upload
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: self
                .upload
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Build the pipeline configuration. Validation happens in the pipeline.
    pub fn upload_config(&self) -> anyhow::Result<UploadConfig> {
        Ok(UploadConfig {
            chunk_container: self.containers.chunks.clone(),
            manifest_container: self.containers.manifests.clone(),
            workers: self.upload.workers.unwrap_or(DEFAULT_WORKERS),
            retry: self.retry_policy(),
            engine: self.engine()?,
            chunking: self.chunking_params(),
            adaptive_divisor: self
                .chunking
                .adaptive
                .then(|| self.chunking.divisor.unwrap_or(DEFAULT_ADAPTIVE_DIVISOR)),
        })
    }
}
