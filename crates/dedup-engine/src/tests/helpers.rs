//! Shared test utilities for dedup-engine tests.

use std::path::PathBuf;
use std::sync::Arc;

use dedup_cas::Chunker;
use dedup_store::{BlobStore, MemoryStore};
use dedup_types::{ChunkingParams, EngineKind, Fingerprint};
use tempfile::TempDir;

use crate::config::UploadConfig;
use crate::pipeline::DedupPipeline;
use crate::retry::RetryPolicy;

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    test_data_seeded(size, 0xDEAD_BEEF)
}

/// Like [`test_data`] with a caller-chosen seed.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// A source file and a (not yet created) staging path in a temp dir.
pub struct Fixture {
    pub _dir: TempDir,
    pub source: PathBuf,
    pub staging: PathBuf,
}

pub fn fixture(name: &str, data: &[u8]) -> Fixture {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join(name);
    std::fs::write(&source, data).unwrap();
    let staging = dir.path().join("staging");
    Fixture {
        _dir: dir,
        source,
        staging,
    }
}

/// Small chunks so tests produce many of them quickly.
pub fn small_config() -> UploadConfig {
    UploadConfig {
        workers: 4,
        retry: RetryPolicy::immediate(3),
        engine: EngineKind::Rolling,
        chunking: ChunkingParams::new(1024, 4096, 16 * 1024),
        ..UploadConfig::default()
    }
}

/// Fixed 1 KiB chunks, for tests that need to predict chunk contents.
pub fn fixed_config() -> UploadConfig {
    UploadConfig {
        engine: EngineKind::Fixed,
        chunking: ChunkingParams::new(512, 1024, 1024),
        ..small_config()
    }
}

pub fn memory_pipeline(config: UploadConfig) -> (Arc<MemoryStore>, DedupPipeline) {
    let store = Arc::new(MemoryStore::new());
    let pipeline = DedupPipeline::new(store.clone(), config).unwrap();
    (store, pipeline)
}

pub fn pipeline_over(store: Arc<dyn BlobStore>, config: UploadConfig) -> DedupPipeline {
    DedupPipeline::new(store, config).unwrap()
}

/// Fingerprints the pipeline will produce for `data`, in file order.
pub fn chunk_fingerprints(config: &UploadConfig, data: &[u8]) -> Vec<Fingerprint> {
    Chunker::new(config.engine, config.chunking)
        .unwrap()
        .chunk(data)
        .unwrap()
        .iter()
        .map(|c| c.fingerprint)
        .collect()
}
