//! Shared test harness for dedup integration tests.
//!
//! Provides [`TestBed`]: a temp directory holding source files, staging
//! directories and a [`FileStore`], wired to a [`DedupPipeline`].

use std::path::PathBuf;
use std::sync::Arc;

use dedup_engine::{DedupPipeline, RetryPolicy, RunSummary, UploadConfig, reassemble};
use dedup_store::{BlobStore, FileStore};
use dedup_types::{ChunkingParams, EngineKind};
use tempfile::TempDir;

/// A store, a source directory and fresh staging paths under one temp dir.
pub struct TestBed {
    dir: TempDir,
    pub store: Arc<FileStore>,
    staging_runs: std::sync::atomic::AtomicUsize,
}

impl TestBed {
    /// File store that creates containers on demand.
    pub fn new() -> Self {
        Self::with_store_options(true)
    }

    /// File store that never creates containers.
    pub fn strict() -> Self {
        Self::with_store_options(false)
    }

    fn with_store_options(create_containers: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().join("store"), create_containers).unwrap());
        std::fs::create_dir(dir.path().join("sources")).unwrap();
        Self {
            dir,
            store,
            staging_runs: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Write `data` as a source file called `name`.
    pub fn write_source(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.dir.path().join("sources").join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    /// A staging path that does not exist yet.
    pub fn staging(&self) -> PathBuf {
        let n = self
            .staging_runs
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.dir.path().join(format!("staging-{n}"))
    }

    /// Root directory of the file store.
    pub fn store_root(&self) -> PathBuf {
        self.store.root().to_path_buf()
    }

    pub fn pipeline(&self, config: UploadConfig) -> DedupPipeline {
        DedupPipeline::new(self.store.clone(), config).unwrap()
    }

    /// Write `data` as `name` and upload it with a fresh staging directory.
    pub async fn upload(&self, name: &str, data: &[u8], config: UploadConfig) -> RunSummary {
        let source = self.write_source(name, data);
        self.pipeline(config)
            .run(&source, &self.staging())
            .await
            .unwrap()
    }

    /// Read `name` back from the manifest container of `config`.
    pub async fn read_back(&self, config: &UploadConfig, name: &str) -> Vec<u8> {
        reassemble(self.store.as_ref(), &config.manifest_container, name)
            .await
            .unwrap()
            .to_vec()
    }

    /// Number of chunk objects in the chunk container of `config`.
    pub async fn chunk_objects(&self, config: &UploadConfig) -> usize {
        self.store
            .list(&config.chunk_container)
            .await
            .map(|names| names.len())
            .unwrap_or(0)
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

/// Small chunks and no retry delay, so tests stay fast.
pub fn small_config() -> UploadConfig {
    UploadConfig {
        workers: 4,
        retry: RetryPolicy::immediate(3),
        engine: EngineKind::Rolling,
        chunking: ChunkingParams::new(2048, 8192, 32 * 1024),
        ..UploadConfig::default()
    }
}

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    test_data_seeded(size, 0xDEAD_BEEF)
}

/// Generate test data with a specific seed (for unique files).
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}
