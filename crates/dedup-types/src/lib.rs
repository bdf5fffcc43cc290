//! Shared types and identifiers for dedup.
//!
//! This crate defines the core types used across the workspace:
//! identifiers ([`Fingerprint`], [`FileHash`]), data structures
//! ([`ChunkRef`], [`Manifest`], [`SegmentRef`]), and chunking
//! configuration ([`ChunkingParams`], [`EngineKind`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

/// Error returned when parsing a hex identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier {input:?}: expected 64 hex characters")]
pub struct ParseIdError {
    /// The rejected input.
    pub input: String,
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse a 64-character hex string.
            pub fn from_hex(hex: &str) -> Result<Self, ParseIdError> {
                hex_to_bytes(hex).map(Self).ok_or_else(|| ParseIdError {
                    input: hex.to_string(),
                })
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl From<blake3::Hash> for $name {
            fn from(hash: blake3::Hash) -> Self {
                Self(hash.into())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Content fingerprint of a chunk: `blake3(chunk_data)`.
    ///
    /// Doubles as the dedup key and as the chunk's object name in the store.
    Fingerprint
);

define_id!(
    /// Hash of an entire source file: `blake3(file_data)`.
    FileHash
);

/// Decode a 64-character hex string into a `[u8; 32]`.
fn hex_to_bytes(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 {
        return None;
    }
    let raw = hex.as_bytes();
    let mut bytes = [0u8; 32];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (hex_nibble(raw[i * 2])? << 4) | hex_nibble(raw[i * 2 + 1])?;
    }
    Some(bytes)
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// Current manifest format version.
pub const MANIFEST_VERSION: u8 = 1;

/// One logical chunk occurrence in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Content fingerprint (and stored object name).
    pub fingerprint: Fingerprint,
    /// Byte offset of this chunk within the source file.
    pub offset: u64,
    /// Length of this chunk in bytes.
    pub size: u64,
}

/// Reconstruction recipe for one source file.
///
/// `segments` is in file order. A fingerprint that occurs several times in
/// the file appears once per occurrence, each referencing the same stored
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version, see [`MANIFEST_VERSION`].
    pub version: u8,
    /// Container holding the chunk objects.
    pub chunk_container: String,
    /// Total size of the source file in bytes.
    pub total_size: u64,
    /// Hash of the full source file.
    pub file_hash: FileHash,
    /// Unix timestamp (seconds) when the manifest was built.
    pub created_at: u64,
    /// Ordered chunk occurrences.
    pub segments: Vec<ChunkRef>,
}

impl Manifest {
    /// Number of segments (logical chunk occurrences).
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Distinct fingerprints referenced by this manifest, in first-seen order.
    pub fn distinct_fingerprints(&self) -> Vec<Fingerprint> {
        let mut seen = std::collections::HashSet::with_capacity(self.segments.len());
        self.segments
            .iter()
            .filter(|s| seen.insert(s.fingerprint))
            .map(|s| s.fingerprint)
            .collect()
    }

    /// Composite-object representation: one [`SegmentRef`] per segment, in order.
    pub fn segment_refs(&self) -> Vec<SegmentRef> {
        self.segments
            .iter()
            .map(|s| SegmentRef {
                container: self.chunk_container.clone(),
                object: s.fingerprint.to_string(),
                size_bytes: s.size,
            })
            .collect()
    }
}

/// Reference to one segment object of a composite (multi-segment) object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentRef {
    /// Container holding the segment.
    pub container: String,
    /// Object name within the container.
    pub object: String,
    /// Expected size of the segment in bytes.
    pub size_bytes: u64,
}

impl SegmentRef {
    /// Store path of the segment, `/<container>/<object>`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.container, self.object)
    }
}

// ---------------------------------------------------------------------------
// Chunking configuration
// ---------------------------------------------------------------------------

/// Default target chunk size (4 MiB). Also the modulus of the rolling boundary test.
pub const DEFAULT_TARGET_SIZE: u64 = 4_194_304;

/// Default minimum chunk size: 85% of the target.
pub const DEFAULT_MIN_SIZE: u64 = DEFAULT_TARGET_SIZE * 85 / 100;

/// Default maximum chunk size: twice the target.
pub const DEFAULT_MAX_SIZE: u64 = DEFAULT_TARGET_SIZE * 2;

/// Default rolling hash window in bytes.
pub const DEFAULT_WINDOW_SIZE: u64 = 48;

/// Default residue that marks a rolling boundary (`hash % target == value`).
pub const DEFAULT_BOUNDARY_VALUE: u64 = 23;

/// Default divisor for [`ChunkingParams::adaptive`]: aim for roughly this many chunks.
pub const DEFAULT_ADAPTIVE_DIVISOR: u64 = 64;

/// Smallest target size [`ChunkingParams::adaptive`] will pick (4 KiB).
pub const MIN_ADAPTIVE_TARGET: u64 = 4_096;

/// Which boundary function splits the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Rolling polynomial hash over a sliding window (reference engine).
    #[default]
    Rolling,
    /// FastCDC 2020 gear hash.
    FastCdc,
    /// Fixed-size cuts at `target_size` (no content awareness).
    Fixed,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rolling => "rolling",
            Self::FastCdc => "fastcdc",
            Self::Fixed => "fixed",
        })
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rolling" => Ok(Self::Rolling),
            "fastcdc" => Ok(Self::FastCdc),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!(
                "unknown chunking engine {other:?} (expected rolling, fastcdc or fixed)"
            )),
        }
    }
}

/// Chunk size bounds and boundary-function tuning.
///
/// **Parameters must stay fixed for a given chunk container**, otherwise
/// identical content produces different boundaries and deduplication breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    /// Smallest chunk the engine may cut (the final chunk may be shorter).
    pub min_size: u64,
    /// Expected chunk size; the modulus of the rolling boundary test.
    pub target_size: u64,
    /// Largest chunk the engine may cut.
    pub max_size: u64,
    /// Sliding window length for the rolling hash.
    pub window_size: u64,
    /// Residue of `hash % target_size` that marks a boundary.
    pub boundary_value: u64,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            target_size: DEFAULT_TARGET_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
            boundary_value: DEFAULT_BOUNDARY_VALUE,
        }
    }
}

impl ChunkingParams {
    /// Parameters with explicit bounds and the default window and boundary value.
    pub fn new(min_size: u64, target_size: u64, max_size: u64) -> Self {
        Self {
            min_size,
            target_size,
            max_size,
            ..Self::default()
        }
    }

    /// Derive parameters from the file length.
    ///
    /// The target is the next power of two at or above `file_len / divisor`
    /// (at least [`MIN_ADAPTIVE_TARGET`]); min is 85% of it and max twice it.
    pub fn adaptive(file_len: u64, divisor: u64) -> Self {
        let raw = file_len / divisor.max(1);
        let target = raw.max(MIN_ADAPTIVE_TARGET).next_power_of_two();
        Self::new(target * 85 / 100, target, target * 2)
    }
}
