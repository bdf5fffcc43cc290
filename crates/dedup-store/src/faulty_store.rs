//! A [`BlobStore`] wrapper that injects latency and scripted failures.
//!
//! `FaultyStore` wraps any `Arc<dyn BlobStore>`. Before each write it sleeps
//! for a random duration (seeded RNG, reproducible across runs) and then
//! consults a per-object failure plan.
//!
//! # Example
//!
//! ```ignore
//! let store = FaultyStore::new(inner)
//!     .latency(1, 5)
//!     .seed(42)
//!     .fail_times(&fingerprint.to_string(), 2, ErrorKind::Transient);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dedup_types::SegmentRef;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::error::{ErrorKind, StoreError};
use crate::traits::{BlobStore, ContainerStatus};

#[derive(Debug, Clone, Copy)]
struct FailurePlan {
    kind: ErrorKind,
    /// Remaining failures; `None` fails forever.
    remaining: Option<u32>,
}

/// A [`BlobStore`] wrapper for chaos testing uploads.
///
/// Failures are keyed by object name and apply to `put` and
/// `put_multipart_manifest`. Reads pass straight through.
pub struct FaultyStore {
    inner: Arc<dyn BlobStore>,
    latency_ms: (u64, u64),
    rng: Mutex<StdRng>,
    plans: Mutex<HashMap<String, FailurePlan>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FaultyStore {
    /// Wrap an existing store with no latency and no failures.
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            latency_ms: (0, 0),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            plans: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Set the write latency range in milliseconds (uniform random).
    pub fn latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = (min_ms, max_ms);
        self
    }

    /// Set the RNG seed for deterministic behaviour.
    pub fn seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Fail the next `times` writes of `name` with an error of `kind`.
    pub fn fail_times(self, name: &str, times: u32, kind: ErrorKind) -> Self {
        self.plans.lock().expect("lock poisoned").insert(
            name.to_string(),
            FailurePlan {
                kind,
                remaining: Some(times),
            },
        );
        self
    }

    /// Fail every write of `name` with an error of `kind`.
    pub fn fail_always(self, name: &str, kind: ErrorKind) -> Self {
        self.plans.lock().expect("lock poisoned").insert(
            name.to_string(),
            FailurePlan {
                kind,
                remaining: None,
            },
        );
        self
    }

    /// Number of write attempts seen for `name`, failed ones included.
    pub fn put_attempts(&self, name: &str) -> u32 {
        self.attempts
            .lock()
            .expect("lock poisoned")
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Total write attempts across all names.
    pub fn total_put_attempts(&self) -> u32 {
        self.attempts.lock().expect("lock poisoned").values().sum()
    }

    async fn delay(&self) {
        let (min, max) = self.latency_ms;
        if max == 0 {
            return;
        }

        let ms = if min >= max {
            min
        } else {
            self.rng.lock().expect("lock poisoned").random_range(min..=max)
        };

        if ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        }
    }

    /// Record an attempt and return the injected error, if any.
    fn check(&self, container: &str, name: &str) -> Result<(), StoreError> {
        *self
            .attempts
            .lock()
            .expect("lock poisoned")
            .entry(name.to_string())
            .or_insert(0) += 1;

        let mut plans = self.plans.lock().expect("lock poisoned");
        let Some(plan) = plans.get_mut(name) else {
            return Ok(());
        };
        match plan.remaining {
            Some(0) => Ok(()),
            Some(ref mut n) => {
                *n -= 1;
                debug!(container, name, kind = ?plan.kind, "injecting failure");
                Err(StoreError::synthetic(plan.kind, container, name))
            }
            None => {
                debug!(container, name, kind = ?plan.kind, "injecting failure");
                Err(StoreError::synthetic(plan.kind, container, name))
            }
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for FaultyStore {
    async fn ensure_container(&self, container: &str) -> Result<ContainerStatus, StoreError> {
        self.inner.ensure_container(container).await
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        self.inner.exists(container, name).await
    }

    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.delay().await;
        self.check(container, name)?;
        self.inner.put(container, name, data).await
    }

    async fn put_multipart_manifest(
        &self,
        container: &str,
        name: &str,
        segments: &[SegmentRef],
    ) -> Result<(), StoreError> {
        self.delay().await;
        self.check(container, name)?;
        self.inner
            .put_multipart_manifest(container, name, segments)
            .await
    }

    async fn get(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        self.inner.get(container, name).await
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(container).await
    }

    fn check_object_name(&self, name: &str) -> Result<(), StoreError> {
        self.inner.check_object_name(name)
    }
}
