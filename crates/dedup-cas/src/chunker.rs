//! Streaming chunker driving a [`ChunkingEngine`] over a byte stream.

use std::io::{ErrorKind, Read};

use bytes::Bytes;
use dedup_types::{ChunkingParams, EngineKind, FileHash, Fingerprint};
use tracing::trace;

use crate::engine::{ChunkingEngine, build_engine, validate_params};
use crate::error::CasError;

/// A single chunk of data with its content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Content fingerprint: `blake3(data)`.
    pub fingerprint: Fingerprint,
    /// Byte offset within the source stream.
    pub offset: u64,
    /// The raw chunk data.
    pub data: Bytes,
}

/// Totals for one pass over a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Bytes consumed.
    pub total_size: u64,
    /// Number of chunks emitted.
    pub chunk_count: usize,
    /// Hash of the whole stream.
    pub file_hash: FileHash,
}

/// Splits a stream into chunks using a pluggable boundary function.
///
/// The stream is read once, in batches of at most `max_size` bytes ahead of
/// the current chunk start. Every emitted chunk satisfies
/// `min_size <= len <= max_size`, except the final chunk which may be shorter.
pub struct Chunker {
    engine: Box<dyn ChunkingEngine>,
    params: ChunkingParams,
}

impl Chunker {
    /// Build a chunker for the given engine kind, validating `params`.
    pub fn new(kind: EngineKind, params: ChunkingParams) -> Result<Self, CasError> {
        let engine = build_engine(kind, &params)?;
        Ok(Self { engine, params })
    }

    /// Build a chunker around a custom engine.
    ///
    /// Only the structural size rules are checked here; the engine is trusted
    /// to honour its own limits, and [`Chunker::chunk_reader`] rejects any cut
    /// that leaves `[min_size, max_size]`.
    pub fn with_engine(
        engine: Box<dyn ChunkingEngine>,
        params: ChunkingParams,
    ) -> Result<Self, CasError> {
        validate_params(EngineKind::Fixed, &params)?;
        Ok(Self { engine, params })
    }

    /// The parameters this chunker was built with.
    pub fn params(&self) -> &ChunkingParams {
        &self.params
    }

    /// Name of the boundary function.
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Split an in-memory buffer into chunks.
    ///
    /// Returns an empty vec for empty input.
    pub fn chunk(&self, data: &[u8]) -> Result<Vec<Chunk>, CasError> {
        let mut chunks = Vec::new();
        self.chunk_reader(data, |chunk| {
            chunks.push(chunk);
            Ok(())
        })?;
        Ok(chunks)
    }

    /// Split a stream into chunks, handing each to `on_chunk` in stream order.
    ///
    /// An error from `on_chunk` aborts the scan and is returned unchanged.
    pub fn chunk_reader<R, F>(&self, mut reader: R, mut on_chunk: F) -> Result<StreamSummary, CasError>
    where
        R: Read,
        F: FnMut(Chunk) -> Result<(), CasError>,
    {
        let min_size = self.params.min_size as usize;
        let max_size = self.params.max_size as usize;

        let mut buf: Vec<u8> = Vec::with_capacity(max_size);
        let mut hasher = blake3::Hasher::new();
        let mut offset = 0u64;
        let mut chunk_count = 0usize;
        let mut eof = false;

        loop {
            if !eof {
                eof = fill(&mut reader, &mut buf, max_size)?;
            }
            if buf.is_empty() {
                break;
            }

            let cut = self.engine.cut_point(&buf);
            let is_tail = eof && cut == buf.len();
            if cut == 0 || cut > buf.len() {
                return Err(CasError::Chunking(format!(
                    "{} engine returned cut {cut} for {} buffered bytes at offset {offset}",
                    self.engine.name(),
                    buf.len()
                )));
            }
            if cut > max_size || (cut < min_size && !is_tail) {
                return Err(CasError::Chunking(format!(
                    "{} engine cut {cut} bytes at offset {offset}, outside [{min_size}, {max_size}]",
                    self.engine.name()
                )));
            }

            let data = Bytes::copy_from_slice(&buf[..cut]);
            hasher.update(&data);
            let fingerprint = Fingerprint::from_data(&data);
            trace!(%fingerprint, offset, len = cut, "chunk boundary");

            on_chunk(Chunk {
                fingerprint,
                offset,
                data,
            })?;

            offset += cut as u64;
            chunk_count += 1;
            buf.drain(..cut);
        }

        Ok(StreamSummary {
            total_size: offset,
            chunk_count,
            file_hash: FileHash::from(hasher.finalize()),
        })
    }
}

/// Read until `buf` holds `target` bytes or the stream ends.
///
/// Returns `true` once the stream is exhausted.
fn fill<R: Read>(reader: &mut R, buf: &mut Vec<u8>, target: usize) -> Result<bool, CasError> {
    while buf.len() < target {
        let start = buf.len();
        buf.resize(target, 0);
        match reader.read(&mut buf[start..]) {
            Ok(0) => {
                buf.truncate(start);
                return Ok(true);
            }
            Ok(n) => buf.truncate(start + n),
            Err(e) if e.kind() == ErrorKind::Interrupted => buf.truncate(start),
            Err(e) => {
                buf.truncate(start);
                return Err(CasError::Io(e));
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

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

    fn small_chunker(kind: EngineKind) -> Chunker {
        Chunker::new(kind, ChunkingParams::new(256, 1024, 4096)).unwrap()
    }

    #[test]
    fn test_chunk_empty_data() {
        let chunker = small_chunker(EngineKind::Rolling);
        assert!(chunker.chunk(b"").unwrap().is_empty());
    }

    #[test]
    fn test_small_input_single_chunk() {
        let chunker = small_chunker(EngineKind::Rolling);
        let data = vec![0xABu8; 100];
        let chunks = chunker.chunk(&data).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data.as_ref(), data.as_slice());
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn test_chunk_sizes_within_bounds_all_engines() {
        let data = test_data(300_000);
        for kind in [EngineKind::Rolling, EngineKind::FastCdc, EngineKind::Fixed] {
            let chunker = small_chunker(kind);
            let chunks = chunker.chunk(&data).unwrap();
            assert!(chunks.len() > 1, "{kind}: expected several chunks");
            for (i, chunk) in chunks.iter().enumerate() {
                let len = chunk.data.len();
                assert!(len <= 4096, "{kind}: chunk {i} size {len} > max");
                if i < chunks.len() - 1 {
                    assert!(len >= 256, "{kind}: chunk {i} size {len} < min");
                }
            }
        }
    }

    #[test]
    fn test_offsets_contiguous_and_reassemble() {
        let chunker = small_chunker(EngineKind::Rolling);
        let data = test_data(200_000);
        let chunks = chunker.chunk(&data).unwrap();

        let mut expected_offset = 0u64;
        let mut rebuilt = Vec::with_capacity(data.len());
        for chunk in &chunks {
            assert_eq!(chunk.offset, expected_offset);
            expected_offset += chunk.data.len() as u64;
            rebuilt.extend_from_slice(&chunk.data);
        }
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_deterministic() {
        let chunker = small_chunker(EngineKind::Rolling);
        let data = test_data(150_000);
        let a: Vec<_> = chunker.chunk(&data).unwrap().iter().map(|c| c.fingerprint).collect();
        let b: Vec<_> = chunker.chunk(&data).unwrap().iter().map(|c| c.fingerprint).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_identical_content_same_fingerprint() {
        // Fixed 1024-byte cuts over a repeated 1024-byte block.
        let chunker = small_chunker(EngineKind::Fixed);
        let block = test_data(1024);
        let data = [block.clone(), block.clone(), block].concat();
        let chunks = chunker.chunk(&data).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].fingerprint, chunks[1].fingerprint);
        assert_eq!(chunks[1].fingerprint, chunks[2].fingerprint);
    }

    #[test]
    fn test_boundary_locality_after_prefix_edit() {
        // Insert bytes at the front: chunks past the resync point are reused.
        let chunker = small_chunker(EngineKind::Rolling);
        let v1 = test_data(256 * 1024);
        let mut v2 = b"inserted prefix bytes".to_vec();
        v2.extend_from_slice(&v1);

        let ids_v1: HashSet<_> = chunker.chunk(&v1).unwrap().iter().map(|c| c.fingerprint).collect();
        let ids_v2: HashSet<_> = chunker.chunk(&v2).unwrap().iter().map(|c| c.fingerprint).collect();
        let shared = ids_v1.intersection(&ids_v2).count();
        let ratio = shared as f64 / ids_v1.len() as f64;

        assert!(
            ratio > 0.80,
            "expected >80% chunk reuse, got {:.1}% ({shared}/{})",
            ratio * 100.0,
            ids_v1.len()
        );
    }

    #[test]
    fn test_stream_summary_matches_data() {
        let chunker = small_chunker(EngineKind::FastCdc);
        let data = test_data(50_000);
        let mut count = 0;
        let summary = chunker
            .chunk_reader(data.as_slice(), |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(summary.total_size, 50_000);
        assert_eq!(summary.chunk_count, count);
        assert_eq!(summary.file_hash, FileHash::from_data(&data));
    }

    #[test]
    fn test_callback_error_aborts_scan() {
        let chunker = small_chunker(EngineKind::Fixed);
        let data = test_data(10_000);
        let mut seen = 0;
        let err = chunker
            .chunk_reader(data.as_slice(), |_| {
                seen += 1;
                if seen == 2 { Err(CasError::Cancelled) } else { Ok(()) }
            })
            .unwrap_err();
        assert!(matches!(err, CasError::Cancelled));
        assert_eq!(seen, 2);
    }

    struct StuckEngine;

    impl ChunkingEngine for StuckEngine {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn cut_point(&self, _data: &[u8]) -> usize {
            0
        }
    }

    #[test]
    fn test_engine_without_progress_is_chunking_error() {
        let chunker =
            Chunker::with_engine(Box::new(StuckEngine), ChunkingParams::new(16, 32, 64)).unwrap();
        let err = chunker.chunk(&[1u8; 100]).unwrap_err();
        assert!(matches!(err, CasError::Chunking(_)), "got {err:?}");
    }

    /// A reader that hands out one byte per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() || out.is_empty() {
                return Ok(0);
            }
            out[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn test_short_reads_match_buffered() {
        let chunker = small_chunker(EngineKind::Rolling);
        let data = test_data(40_000);
        let expected: Vec<_> = chunker.chunk(&data).unwrap().iter().map(|c| c.fingerprint).collect();

        let mut streamed = Vec::new();
        chunker
            .chunk_reader(Trickle(&data), |c| {
                streamed.push(c.fingerprint);
                Ok(())
            })
            .unwrap();
        assert_eq!(streamed, expected);
    }
}
