//! Blob store trait and backend implementations.
//!
//! This crate defines the [`BlobStore`] trait, the object store collaborator
//! that receives chunks and composite manifests, along with three backends:
//!
//! - [`MemoryStore`]: in-memory storage backed by a `RwLock<HashMap>`.
//! - [`FileStore`]: one directory per container on the local filesystem.
//! - [`FaultyStore`]: a wrapper injecting latency and scripted failures.

mod error;
mod faulty_store;
mod file_store;
mod memory_store;
mod traits;

pub use error::{ErrorKind, StoreError};
pub use faulty_store::FaultyStore;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use traits::{BlobStore, ContainerStatus};
