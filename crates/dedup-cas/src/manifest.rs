//! Manifest building and serialization.
//!
//! A [`Manifest`] is the reconstruction recipe for one source file: the
//! ordered list of chunk occurrences plus the container that holds them.
//! Locally it is persisted with postcard; remotely it is uploaded as a
//! composite object whose segments are the chunk objects in file order.

use dedup_types::{ChunkRef, FileHash, Fingerprint, MANIFEST_VERSION, Manifest};
use serde::Serialize;

use crate::error::CasError;

/// Incrementally accumulates chunk occurrences in file order.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    chunk_container: String,
    segments: Vec<ChunkRef>,
    next_offset: u64,
}

impl ManifestBuilder {
    /// Start a manifest whose chunks live in `chunk_container`.
    pub fn new(chunk_container: impl Into<String>) -> Self {
        Self {
            chunk_container: chunk_container.into(),
            segments: Vec::new(),
            next_offset: 0,
        }
    }

    /// Append the next chunk occurrence. Offsets are derived from the sizes.
    pub fn push(&mut self, fingerprint: Fingerprint, size: u64) -> &mut Self {
        self.segments.push(ChunkRef {
            fingerprint,
            offset: self.next_offset,
            size,
        });
        self.next_offset += size;
        self
    }

    /// Number of occurrences pushed so far.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Finish the manifest.
    pub fn build(self, file_hash: FileHash) -> Result<Manifest, CasError> {
        build_manifest(&self.chunk_container, &self.segments, file_hash)
    }
}

/// Build a [`Manifest`] from parallel fingerprint and size lists.
pub fn build_manifest_from_parts(
    chunk_container: &str,
    fingerprints: &[Fingerprint],
    sizes: &[u64],
    file_hash: FileHash,
) -> Result<Manifest, CasError> {
    if fingerprints.len() != sizes.len() {
        return Err(CasError::InvalidSegments(format!(
            "{} fingerprints but {} sizes",
            fingerprints.len(),
            sizes.len()
        )));
    }
    let mut builder = ManifestBuilder::new(chunk_container);
    for (fingerprint, size) in fingerprints.iter().zip(sizes) {
        builder.push(*fingerprint, *size);
    }
    builder.build(file_hash)
}

/// Build a [`Manifest`] from the ordered chunk list produced by staging.
///
/// Fails with [`CasError::EmptyInput`] for an empty list and with
/// [`CasError::InvalidSegments`] if the chunks do not tile the file
/// contiguously from offset 0.
pub fn build_manifest(
    chunk_container: &str,
    chunks: &[ChunkRef],
    file_hash: FileHash,
) -> Result<Manifest, CasError> {
    build_manifest_with_timestamp(chunk_container, chunks, file_hash, now_secs())
}

/// Build a manifest with an explicit timestamp (for deterministic testing).
pub fn build_manifest_with_timestamp(
    chunk_container: &str,
    chunks: &[ChunkRef],
    file_hash: FileHash,
    created_at: u64,
) -> Result<Manifest, CasError> {
    if chunks.is_empty() {
        return Err(CasError::EmptyInput);
    }

    let mut expected_offset = 0u64;
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.size == 0 {
            return Err(CasError::InvalidSegments(format!("segment {i} is empty")));
        }
        if chunk.offset != expected_offset {
            return Err(CasError::InvalidSegments(format!(
                "segment {i} starts at {} but previous segments end at {expected_offset}",
                chunk.offset
            )));
        }
        expected_offset += chunk.size;
    }

    Ok(Manifest {
        version: MANIFEST_VERSION,
        chunk_container: chunk_container.to_string(),
        total_size: expected_offset,
        file_hash,
        created_at,
        segments: chunks.to_vec(),
    })
}

/// Serialize a manifest to postcard bytes.
pub fn serialize_manifest(manifest: &Manifest) -> Result<Vec<u8>, CasError> {
    postcard::to_allocvec(manifest).map_err(|e| CasError::Serialization(e.to_string()))
}

/// Deserialize a manifest from postcard bytes.
///
/// Rejects manifests with unknown version numbers.
pub fn deserialize_manifest(bytes: &[u8]) -> Result<Manifest, CasError> {
    let manifest: Manifest =
        postcard::from_bytes(bytes).map_err(|e| CasError::Serialization(e.to_string()))?;
    if manifest.version != MANIFEST_VERSION {
        return Err(CasError::UnsupportedVersion {
            found: manifest.version,
            supported: MANIFEST_VERSION,
        });
    }
    Ok(manifest)
}

#[derive(Serialize)]
struct SloSegment {
    path: String,
    size_bytes: u64,
}

/// Render the manifest as static-large-object JSON:
/// `[{"path": "/<container>/<fingerprint>", "size_bytes": N}, ...]`.
pub fn to_slo_json(manifest: &Manifest) -> Result<String, CasError> {
    let segments: Vec<SloSegment> = manifest
        .segment_refs()
        .into_iter()
        .map(|r| SloSegment {
            path: r.path(),
            size_bytes: r.size_bytes,
        })
        .collect();
    serde_json::to_string(&segments).map_err(|e| CasError::Serialization(e.to_string()))
}

/// Check reassembled bytes against the manifest's size and file hash.
pub fn verify_reassembly(manifest: &Manifest, data: &[u8]) -> Result<(), CasError> {
    if data.len() as u64 != manifest.total_size {
        return Err(CasError::Mismatch(format!(
            "expected {} bytes, got {}",
            manifest.total_size,
            data.len()
        )));
    }
    let actual = FileHash::from_data(data);
    if actual != manifest.file_hash {
        return Err(CasError::Mismatch(format!(
            "expected file hash {}, got {actual}",
            manifest.file_hash
        )));
    }
    Ok(())
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
