//! Chunk boundary functions.
//!
//! A [`ChunkingEngine`] decides where the next chunk ends. Three engines are
//! provided and picked by [`EngineKind`] at configuration time:
//!
//! - [`RollingHashEngine`]: polynomial rolling hash over a sliding window.
//!   Boundaries depend only on the window contents, so an insertion near one
//!   boundary does not move boundaries elsewhere in the file.
//! - [`FastCdcEngine`]: FastCDC 2020 via the `fastcdc` crate.
//! - [`FixedSizeEngine`]: fixed-size cuts, no content awareness.

use dedup_types::{ChunkingParams, EngineKind};
use fastcdc::v2020::{
    AVERAGE_MAX, AVERAGE_MIN, FastCDC, MAXIMUM_MAX, MAXIMUM_MIN, MINIMUM_MAX, MINIMUM_MIN,
};

use crate::error::CasError;

/// Multiplier of the rolling polynomial hash.
pub const ROLLING_MULTIPLIER: u64 = 69_069;

/// A content-defined boundary function.
///
/// `data` starts at the beginning of the next chunk and holds at least
/// `max_size` bytes unless the stream has ended. The return value is the
/// length of the next chunk: within `[min_size, max_size]`, or `data.len()`
/// when fewer than `min_size` bytes remain.
pub trait ChunkingEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Length of the chunk starting at `data[0]`.
    fn cut_point(&self, data: &[u8]) -> usize;
}

/// Check `params` against the structural rules and the engine's own limits.
pub fn validate_params(kind: EngineKind, params: &ChunkingParams) -> Result<(), CasError> {
    let ChunkingParams {
        min_size,
        target_size,
        max_size,
        window_size,
        boundary_value,
    } = *params;

    if min_size == 0 {
        return Err(CasError::InvalidParams("min_size must be > 0".into()));
    }
    if min_size > target_size {
        return Err(CasError::InvalidParams(format!(
            "min_size ({min_size}) > target_size ({target_size})"
        )));
    }
    if target_size > max_size {
        return Err(CasError::InvalidParams(format!(
            "target_size ({target_size}) > max_size ({max_size})"
        )));
    }

    match kind {
        EngineKind::Rolling => {
            if window_size == 0 || window_size > min_size {
                return Err(CasError::InvalidParams(format!(
                    "window_size ({window_size}) must be in 1..=min_size ({min_size})"
                )));
            }
            if boundary_value >= target_size {
                return Err(CasError::InvalidParams(format!(
                    "boundary_value ({boundary_value}) must be < target_size ({target_size})"
                )));
            }
        }
        EngineKind::FastCdc => {
            check_range("min_size", min_size, MINIMUM_MIN, MINIMUM_MAX)?;
            check_range("target_size", target_size, AVERAGE_MIN, AVERAGE_MAX)?;
            check_range("max_size", max_size, MAXIMUM_MIN, MAXIMUM_MAX)?;
        }
        EngineKind::Fixed => {}
    }

    Ok(())
}

fn check_range(field: &str, value: u64, lo: u32, hi: u32) -> Result<(), CasError> {
    if value < u64::from(lo) || value > u64::from(hi) {
        return Err(CasError::InvalidParams(format!(
            "{field} ({value}) outside fastcdc range {lo}..={hi}"
        )));
    }
    Ok(())
}

/// Clamp derived `params` into the range `kind` accepts.
///
/// Only FastCDC has hard limits; the other engines take `params` unchanged.
/// Bounds stay ordered because each FastCDC range sits at or below the next.
pub fn fit_params(kind: EngineKind, params: ChunkingParams) -> ChunkingParams {
    match kind {
        EngineKind::FastCdc => {
            let clamp = |value: u64, lo: u32, hi: u32| value.clamp(u64::from(lo), u64::from(hi));
            ChunkingParams {
                min_size: clamp(params.min_size, MINIMUM_MIN, MINIMUM_MAX),
                target_size: clamp(params.target_size, AVERAGE_MIN, AVERAGE_MAX),
                max_size: clamp(params.max_size, MAXIMUM_MIN, MAXIMUM_MAX),
                ..params
            }
        }
        EngineKind::Rolling | EngineKind::Fixed => params,
    }
}

/// Validate `params` and build the engine selected by `kind`.
pub fn build_engine(
    kind: EngineKind,
    params: &ChunkingParams,
) -> Result<Box<dyn ChunkingEngine>, CasError> {
    validate_params(kind, params)?;
    Ok(match kind {
        EngineKind::Rolling => Box::new(RollingHashEngine::new(params)),
        EngineKind::FastCdc => Box::new(FastCdcEngine::new(params)),
        EngineKind::Fixed => Box::new(FixedSizeEngine::new(params.target_size as usize)),
    })
}

// ---------------------------------------------------------------------------
// Rolling hash
// ---------------------------------------------------------------------------

/// Rolling-hash boundary function.
///
/// Scanning starts at `min_size`. A chunk ends where the hash of the
/// trailing `window_size` bytes satisfies `hash % target_size == boundary_value`,
/// or at `max_size`, whichever comes first.
pub struct RollingHashEngine {
    min_size: usize,
    max_size: usize,
    window_size: usize,
    modulus: u64,
    boundary_value: u64,
    /// `ROLLING_MULTIPLIER ^ window_size`, used to drop the outgoing byte.
    factor: u64,
}

impl RollingHashEngine {
    /// Build from already-validated parameters.
    pub fn new(params: &ChunkingParams) -> Self {
        let window_size = params.window_size as usize;
        let factor = (0..window_size).fold(1u64, |f, _| f.wrapping_mul(ROLLING_MULTIPLIER));
        Self {
            min_size: params.min_size as usize,
            max_size: params.max_size as usize,
            window_size,
            modulus: params.target_size,
            boundary_value: params.boundary_value,
            factor,
        }
    }
}

impl ChunkingEngine for RollingHashEngine {
    fn name(&self) -> &'static str {
        "rolling"
    }

    fn cut_point(&self, data: &[u8]) -> usize {
        if data.len() <= self.min_size {
            return data.len();
        }

        let limit = data.len().min(self.max_size);
        let mut end = self.min_size;
        let mut hash = data[end - self.window_size..end]
            .iter()
            .fold(0u64, |h, &b| {
                h.wrapping_mul(ROLLING_MULTIPLIER).wrapping_add(u64::from(b))
            });

        while hash % self.modulus != self.boundary_value && end < limit {
            hash = hash
                .wrapping_mul(ROLLING_MULTIPLIER)
                .wrapping_add(u64::from(data[end]))
                .wrapping_sub(
                    self.factor
                        .wrapping_mul(u64::from(data[end - self.window_size])),
                );
            end += 1;
        }

        end
    }
}

// ---------------------------------------------------------------------------
// FastCDC
// ---------------------------------------------------------------------------

/// FastCDC 2020 boundary function.
pub struct FastCdcEngine {
    min_size: u32,
    avg_size: u32,
    max_size: u32,
}

impl FastCdcEngine {
    /// Build from already-validated parameters (all sizes fit in `u32`).
    pub fn new(params: &ChunkingParams) -> Self {
        Self {
            min_size: params.min_size as u32,
            avg_size: params.target_size as u32,
            max_size: params.max_size as u32,
        }
    }
}

impl ChunkingEngine for FastCdcEngine {
    fn name(&self) -> &'static str {
        "fastcdc"
    }

    fn cut_point(&self, data: &[u8]) -> usize {
        if data.len() <= self.min_size as usize {
            return data.len();
        }
        FastCDC::new(data, self.min_size, self.avg_size, self.max_size)
            .next()
            .map_or(data.len(), |entry| entry.length)
    }
}

// ---------------------------------------------------------------------------
// Fixed size
// ---------------------------------------------------------------------------

/// Fixed-size boundary function. The last chunk may be shorter.
pub struct FixedSizeEngine {
    chunk_size: usize,
}

impl FixedSizeEngine {
    /// Create an engine cutting every `chunk_size` bytes.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl ChunkingEngine for FixedSizeEngine {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn cut_point(&self, data: &[u8]) -> usize {
        data.len().min(self.chunk_size)
    }
}
