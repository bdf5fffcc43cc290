//! Chunk a source file into a staging directory.
//!
//! Each distinct chunk is written once as `{staging_dir}/{fingerprint}`.
//! Writes are atomic (temp file + rename) so a crash never leaves a
//! half-written chunk under a valid fingerprint name.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use dedup_types::{ChunkRef, FileHash, Fingerprint};
use tracing::{debug, info};

use crate::chunker::Chunker;
use crate::error::CasError;

/// Suffix of in-progress staging writes.
const TMP_SUFFIX: &str = "tmp";

/// Result of staging one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Chunk occurrences in file order (repeats included).
    pub chunks: Vec<ChunkRef>,
    /// Size of the source in bytes.
    pub total_size: u64,
    /// Hash of the whole source.
    pub file_hash: FileHash,
    /// Number of distinct chunk files written to the staging directory.
    pub distinct_chunks: usize,
}

/// Path of the staging file for `fingerprint`.
pub fn staged_chunk_path(staging_dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
    staging_dir.join(fingerprint.to_string())
}

/// Chunk `source` and write every distinct chunk into `staging_dir`.
///
/// `should_stop` is polled between chunks; returning `true` aborts the scan
/// with [`CasError::Cancelled`]. Returns the ordered chunk list. An empty
/// source yields an empty list; rejecting it is the manifest builder's job.
pub fn stage_file(
    chunker: &Chunker,
    source: &Path,
    staging_dir: &Path,
    should_stop: &dyn Fn() -> bool,
) -> Result<StagedFile, CasError> {
    let file = File::open(source).map_err(|e| CasError::SourceUnreadable {
        path: source.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let mut chunks = Vec::new();
    let mut distinct_chunks = 0usize;

    let summary = chunker
        .chunk_reader(reader, |chunk| {
            if should_stop() {
                return Err(CasError::Cancelled);
            }

            let path = staged_chunk_path(staging_dir, &chunk.fingerprint);
            if write_once(&path, &chunk.data)? {
                distinct_chunks += 1;
                debug!(fingerprint = %chunk.fingerprint, size = chunk.data.len(), "staged chunk");
            }

            chunks.push(ChunkRef {
                fingerprint: chunk.fingerprint,
                offset: chunk.offset,
                size: chunk.data.len() as u64,
            });
            Ok(())
        })
        .map_err(|e| match e {
            CasError::Io(source_err) => CasError::SourceUnreadable {
                path: source.to_path_buf(),
                source: source_err,
            },
            other => other,
        })?;

    info!(
        source = %source.display(),
        engine = chunker.engine_name(),
        total_size = summary.total_size,
        chunks = chunks.len(),
        distinct_chunks,
        "staged source file"
    );

    Ok(StagedFile {
        chunks,
        total_size: summary.total_size,
        file_hash: summary.file_hash,
        distinct_chunks,
    })
}

/// Write `data` to `path` unless it already exists.
///
/// Returns `true` if a new file was written. Identical content always maps to
/// the same fingerprint, so an existing file is never rewritten.
fn write_once(path: &Path, data: &[u8]) -> Result<bool, CasError> {
    if path.exists() {
        return Ok(false);
    }

    let staging_err = |e: std::io::Error| CasError::StagingWrite {
        path: path.to_path_buf(),
        source: e,
    };

    let tmp_path = path.with_extension(TMP_SUFFIX);
    std::fs::write(&tmp_path, data).map_err(staging_err)?;
    std::fs::rename(&tmp_path, path).map_err(staging_err)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dedup_types::{ChunkingParams, EngineKind};
    use tempfile::TempDir;

    use super::*;

    fn test_data(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut state: u32 = 0xDEAD_BEEF;
        for _ in 0..size {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            data.push((state >> 16) as u8);
        }
        data
    }

    fn setup(data: &[u8]) -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, data).unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir(&staging).unwrap();
        (dir, source, staging)
    }

    fn staged_names(staging: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(staging)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_stage_file_writes_one_file_per_distinct_chunk() {
        let block = test_data(1024);
        let data = [block.clone(), test_data(512), block].concat();
        let (_dir, source, staging) = setup(&data);

        let chunker = Chunker::new(EngineKind::Fixed, ChunkingParams::new(512, 1024, 1024)).unwrap();
        let staged = stage_file(&chunker, &source, &staging, &|| false).unwrap();

        // [block][512 bytes + first half of block][second half of block]
        assert_eq!(staged.total_size, data.len() as u64);
        assert_eq!(staged.chunks.len(), 3);
        assert_eq!(staged.distinct_chunks, staged_names(&staging).len());

        for chunk in &staged.chunks {
            let on_disk = std::fs::read(staged_chunk_path(&staging, &chunk.fingerprint)).unwrap();
            let start = chunk.offset as usize;
            assert_eq!(on_disk, &data[start..start + chunk.size as usize]);
        }
    }

    #[test]
    fn test_repeated_chunk_staged_once() {
        let block = test_data(1024);
        let data = [block.clone(), block.clone(), block].concat();
        let (_dir, source, staging) = setup(&data);

        let chunker = Chunker::new(EngineKind::Fixed, ChunkingParams::new(512, 1024, 1024)).unwrap();
        let staged = stage_file(&chunker, &source, &staging, &|| false).unwrap();

        assert_eq!(staged.chunks.len(), 3);
        assert_eq!(staged.distinct_chunks, 1);
        assert_eq!(staged_names(&staging), vec![staged.chunks[0].fingerprint.to_string()]);
    }

    #[test]
    fn test_no_tmp_files_left() {
        let (_dir, source, staging) = setup(&test_data(20_000));
        let chunker = Chunker::new(EngineKind::Rolling, ChunkingParams::new(256, 1024, 4096)).unwrap();
        stage_file(&chunker, &source, &staging, &|| false).unwrap();

        for name in staged_names(&staging) {
            assert!(!name.ends_with(".tmp"), "leftover temp file {name}");
            assert!(name.parse::<Fingerprint>().is_ok(), "unexpected file {name}");
        }
    }

    #[test]
    fn test_missing_source_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let chunker = Chunker::new(EngineKind::Fixed, ChunkingParams::new(16, 32, 64)).unwrap();
        let err = stage_file(&chunker, &dir.path().join("nope"), dir.path(), &|| false).unwrap_err();
        assert!(matches!(err, CasError::SourceUnreadable { .. }), "got {err:?}");
    }

    #[test]
    fn test_empty_source_stages_nothing() {
        let (_dir, source, staging) = setup(b"");
        let chunker = Chunker::new(EngineKind::Rolling, ChunkingParams::new(256, 1024, 4096)).unwrap();
        let staged = stage_file(&chunker, &source, &staging, &|| false).unwrap();
        assert!(staged.chunks.is_empty());
        assert_eq!(staged.total_size, 0);
        assert!(staged_names(&staging).is_empty());
    }

    #[test]
    fn test_stop_signal_aborts_scan() {
        let (_dir, source, staging) = setup(&test_data(10_000));
        let chunker = Chunker::new(EngineKind::Fixed, ChunkingParams::new(512, 1024, 1024)).unwrap();

        let polls = AtomicUsize::new(0);
        let stop = || polls.fetch_add(1, Ordering::SeqCst) >= 3;
        let err = stage_file(&chunker, &source, &staging, &stop).unwrap_err();

        assert!(matches!(err, CasError::Cancelled));
        assert_eq!(staged_names(&staging).len(), 3);
    }
}
