//! In-memory blob store backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use dedup_types::SegmentRef;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{BlobStore, ContainerStatus};

#[derive(Debug, Clone)]
enum StoredObject {
    Blob(Bytes),
    Composite(Vec<SegmentRef>),
}

type Containers = HashMap<String, BTreeMap<String, StoredObject>>;

/// In-memory blob store backed by a `RwLock<HashMap>`.
///
/// Useful for tests and dry runs. Counts successful blob writes so tests can
/// assert how many objects a run actually transferred.
pub struct MemoryStore {
    containers: RwLock<Containers>,
    create_containers: bool,
    blob_puts: AtomicUsize,
}

impl MemoryStore {
    /// Create a store that creates containers on demand.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            create_containers: true,
            blob_puts: AtomicUsize::new(0),
        }
    }

    /// Create a store that refuses to create containers.
    ///
    /// Only containers registered with [`MemoryStore::with_container`] exist.
    pub fn strict() -> Self {
        Self {
            create_containers: false,
            ..Self::new()
        }
    }

    /// Pre-create a container.
    pub fn with_container(self, container: &str) -> Self {
        self.containers
            .write()
            .expect("lock poisoned")
            .entry(container.to_string())
            .or_default();
        self
    }

    /// Number of successful blob `put` calls since creation.
    pub fn blob_puts(&self) -> usize {
        self.blob_puts.load(Ordering::SeqCst)
    }

    /// Number of objects in a container (0 if it does not exist).
    pub fn object_count(&self, container: &str) -> usize {
        let map = self.containers.read().expect("lock poisoned");
        map.get(container).map_or(0, BTreeMap::len)
    }

    /// Remove an object directly (for testing missing-segment paths).
    pub fn remove(&self, container: &str, name: &str) -> bool {
        let mut map = self.containers.write().expect("lock poisoned");
        map.get_mut(container)
            .and_then(|objects| objects.remove(name))
            .is_some()
    }

    fn blob<'a>(map: &'a Containers, container: &str, name: &str) -> Option<&'a Bytes> {
        match map.get(container)?.get(name)? {
            StoredObject::Blob(data) => Some(data),
            StoredObject::Composite(_) => None,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn ensure_container(&self, container: &str) -> Result<ContainerStatus, StoreError> {
        let mut map = self.containers.write().expect("lock poisoned");
        if map.contains_key(container) {
            return Ok(ContainerStatus::Existing);
        }
        if !self.create_containers {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        map.insert(container.to_string(), BTreeMap::new());
        debug!(container, "created container");
        Ok(ContainerStatus::Created)
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        let map = self.containers.read().expect("lock poisoned");
        let objects = map
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        Ok(objects.contains_key(name))
    }

    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StoreError> {
        let mut map = self.containers.write().expect("lock poisoned");
        let objects = map
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        debug!(container, name, size = data.len(), "storing blob in memory");
        objects.insert(name.to_string(), StoredObject::Blob(data));
        self.blob_puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_multipart_manifest(
        &self,
        container: &str,
        name: &str,
        segments: &[SegmentRef],
    ) -> Result<(), StoreError> {
        let mut map = self.containers.write().expect("lock poisoned");
        if !map.contains_key(container) {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }

        for segment in segments {
            let data = Self::blob(&map, &segment.container, &segment.object).ok_or_else(|| {
                StoreError::SegmentMissing {
                    container: segment.container.clone(),
                    object: segment.object.clone(),
                }
            })?;
            if data.len() as u64 != segment.size_bytes {
                return Err(StoreError::Conflict(format!(
                    "segment {} is {} bytes, manifest says {}",
                    segment.path(),
                    data.len(),
                    segment.size_bytes
                )));
            }
        }

        debug!(container, name, segments = segments.len(), "storing composite manifest");
        map.entry(container.to_string())
            .or_default()
            .insert(name.to_string(), StoredObject::Composite(segments.to_vec()));
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        let map = self.containers.read().expect("lock poisoned");
        let Some(object) = map.get(container).and_then(|objects| objects.get(name)) else {
            return Ok(None);
        };

        match object {
            StoredObject::Blob(data) => Ok(Some(data.clone())),
            StoredObject::Composite(segments) => {
                let total: u64 = segments.iter().map(|s| s.size_bytes).sum();
                let mut out = BytesMut::with_capacity(total as usize);
                for segment in segments {
                    let data = Self::blob(&map, &segment.container, &segment.object).ok_or_else(
                        || StoreError::SegmentMissing {
                            container: segment.container.clone(),
                            object: segment.object.clone(),
                        },
                    )?;
                    out.extend_from_slice(data);
                }
                Ok(Some(out.freeze()))
            }
        }
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let map = self.containers.read().expect("lock poisoned");
        let objects = map
            .get(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        Ok(objects.keys().cloned().collect())
    }
}
