//! Directory-backed blob store.
//!
//! Layout: `{root}/{container}/{name}` for blobs and
//! `{root}/{container}/{name}.manifest.json` for composite objects (a JSON
//! list of [`SegmentRef`]s). Reads of a composite name reassemble the segments.

use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use dedup_types::SegmentRef;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::{BlobStore, ContainerStatus};

/// Suffix marking a composite object's segment list.
const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Suffix of in-progress writes.
const TMP_SUFFIX: &str = ".tmp";

/// Blob store rooted at a local directory, one subdirectory per container.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place.
pub struct FileStore {
    root: PathBuf,
    create_containers: bool,
}

impl FileStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>, create_containers: bool) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            create_containers,
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        check_name(container)?;
        Ok(self.root.join(container))
    }

    fn blob_path(&self, container: &str, name: &str) -> Result<PathBuf, StoreError> {
        check_name(name)?;
        Ok(self.container_dir(container)?.join(name))
    }

    fn manifest_path(&self, container: &str, name: &str) -> Result<PathBuf, StoreError> {
        check_name(name)?;
        Ok(self
            .container_dir(container)?
            .join(format!("{name}{MANIFEST_SUFFIX}")))
    }

    async fn require_container(&self, container: &str) -> Result<PathBuf, StoreError> {
        let dir = self.container_dir(container)?;
        if !is_dir(&dir).await? {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        Ok(dir)
    }

    async fn read_blob(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.blob_path(container, name)?).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn read_segments(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<Vec<SegmentRef>>, StoreError> {
        match tokio::fs::read(self.manifest_path(container, name)?).await {
            Ok(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| {
                StoreError::Conflict(format!("corrupt manifest {container}/{name}: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Reject names that would escape the container or collide with store files.
fn check_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.ends_with(MANIFEST_SUFFIX)
        || name.ends_with(TMP_SUFFIX)
    {
        return Err(StoreError::Conflict(format!("invalid object name {name:?}")));
    }
    Ok(())
}

async fn is_dir(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Io(e)),
    }
}

async fn is_file(path: &Path) -> Result<bool, StoreError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Io(e)),
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp_path = PathBuf::from(tmp);
    tokio::fs::write(&tmp_path, data).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait::async_trait]
impl BlobStore for FileStore {
    async fn ensure_container(&self, container: &str) -> Result<ContainerStatus, StoreError> {
        let dir = self.container_dir(container)?;
        if is_dir(&dir).await? {
            return Ok(ContainerStatus::Existing);
        }
        if !self.create_containers {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        tokio::fs::create_dir_all(&dir).await?;
        debug!(container, path = %dir.display(), "created container directory");
        Ok(ContainerStatus::Created)
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool, StoreError> {
        self.require_container(container).await?;
        Ok(is_file(&self.blob_path(container, name)?).await?
            || is_file(&self.manifest_path(container, name)?).await?)
    }

    async fn put(&self, container: &str, name: &str, data: Bytes) -> Result<(), StoreError> {
        self.require_container(container).await?;
        let path = self.blob_path(container, name)?;
        write_atomic(&path, &data).await?;

        // A blob replaces any composite object of the same name.
        let manifest = self.manifest_path(container, name)?;
        if is_file(&manifest).await? {
            tokio::fs::remove_file(&manifest).await?;
        }

        debug!(container, name, size = data.len(), "stored blob to file");
        Ok(())
    }

    async fn put_multipart_manifest(
        &self,
        container: &str,
        name: &str,
        segments: &[SegmentRef],
    ) -> Result<(), StoreError> {
        self.require_container(container).await?;

        for segment in segments {
            let path = self.blob_path(&segment.container, &segment.object)?;
            let size = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => {
                    return Err(StoreError::SegmentMissing {
                        container: segment.container.clone(),
                        object: segment.object.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StoreError::SegmentMissing {
                        container: segment.container.clone(),
                        object: segment.object.clone(),
                    });
                }
                Err(e) => return Err(StoreError::Io(e)),
            };
            if size != segment.size_bytes {
                return Err(StoreError::Conflict(format!(
                    "segment {} is {size} bytes, manifest says {}",
                    segment.path(),
                    segment.size_bytes
                )));
            }
        }

        let raw = serde_json::to_vec(segments)
            .map_err(|e| StoreError::Conflict(format!("cannot encode segment list: {e}")))?;
        write_atomic(&self.manifest_path(container, name)?, &raw).await?;

        let blob = self.blob_path(container, name)?;
        if is_file(&blob).await? {
            tokio::fs::remove_file(&blob).await?;
        }

        debug!(container, name, segments = segments.len(), "stored composite manifest");
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Option<Bytes>, StoreError> {
        if let Some(segments) = self.read_segments(container, name).await? {
            let total: u64 = segments.iter().map(|s| s.size_bytes).sum();
            let mut out = BytesMut::with_capacity(total as usize);
            for segment in &segments {
                let data = self
                    .read_blob(&segment.container, &segment.object)
                    .await?
                    .ok_or_else(|| StoreError::SegmentMissing {
                        container: segment.container.clone(),
                        object: segment.object.clone(),
                    })?;
                out.extend_from_slice(&data);
            }
            return Ok(Some(out.freeze()));
        }
        self.read_blob(container, name).await
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.require_container(container).await?;
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let name = name
                .strip_suffix(MANIFEST_SUFFIX)
                .map(str::to_string)
                .unwrap_or(name);
            names.push(name);
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn check_object_name(&self, name: &str) -> Result<(), StoreError> {
        check_name(name)
    }
}
