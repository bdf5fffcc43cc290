//! Content-defined chunking, staging, and manifest building.
//!
//! This crate provides:
//! - [`ChunkingEngine`]: the pluggable boundary function, with rolling-hash,
//!   FastCDC and fixed-size implementations selected by [`EngineKind`](dedup_types::EngineKind).
//! - [`Chunker`]: drives an engine over a stream, fingerprinting each chunk with BLAKE3.
//! - [`stage_file`]: chunks a source file into a staging directory, one file per
//!   distinct fingerprint.
//! - [`build_manifest`] / [`ManifestBuilder`]: construct the ordered [`Manifest`](dedup_types::Manifest).

mod chunker;
mod engine;
mod error;
mod manifest;
mod staging;

pub use chunker::{Chunk, Chunker, StreamSummary};
pub use engine::{
    ChunkingEngine, FastCdcEngine, FixedSizeEngine, ROLLING_MULTIPLIER, RollingHashEngine,
    build_engine, fit_params, validate_params,
};
pub use error::CasError;
pub use manifest::{
    ManifestBuilder, build_manifest, build_manifest_from_parts, build_manifest_with_timestamp,
    deserialize_manifest, serialize_manifest, to_slo_json, verify_reassembly,
};
pub use staging::{StagedFile, stage_file, staged_chunk_path};
