//! Session-scoped staging directory.
//!
//! A [`StagingArea`] is acquired before chunking and released after the
//! manifest upload. Dropping it without calling [`StagingArea::cleanup`]
//! still purges it, so every exit path (errors and panics included) leaves
//! the directory as it was found.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{EngineError, Phase};

/// Marker file claiming a staging directory for one session.
pub const SESSION_LOCK: &str = ".session.lock";

/// Exclusive ownership of a staging directory for one run.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    created: bool,
    released: bool,
}

impl StagingArea {
    /// Take ownership of `path`.
    ///
    /// - absent: created, and removed again at teardown.
    /// - present and empty: reused, emptied at teardown, directory kept.
    /// - present and non-empty: [`EngineError::StagingConflict`], nothing touched.
    ///
    /// Ownership is claimed by creating [`SESSION_LOCK`] with `create_new`, so
    /// of two sessions racing for the same path exactly one wins.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| EngineError::Io {
            phase: Phase::Staging,
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let created = match std::fs::create_dir(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let count = std::fs::read_dir(&path).map_err(io_err)?.count();
                if count > 0 {
                    return Err(EngineError::StagingConflict {
                        path,
                        entries: count,
                    });
                }
                false
            }
            Err(e) => return Err(io_err(e)),
        };

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.join(SESSION_LOCK))
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Lost the race to another session; its directory, not ours to touch.
                return Err(EngineError::StagingConflict { path, entries: 1 });
            }
            Err(e) => {
                if created {
                    let _ = std::fs::remove_dir_all(&path);
                }
                return Err(io_err(e));
            }
        }

        debug!(path = %path.display(), created, "acquired staging directory");
        Ok(Self {
            path,
            created,
            released: false,
        })
    }

    /// The staging directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this session created the directory.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Number of entries currently in the directory, the lock excluded.
    pub fn entry_count(&self) -> Result<usize, EngineError> {
        let entries = std::fs::read_dir(&self.path).map_err(|source| EngineError::Io {
            phase: Phase::Staging,
            source,
        })?;
        Ok(entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name() != SESSION_LOCK)
            .count())
    }

    /// Purge the directory and release it.
    pub fn cleanup(mut self) -> Result<(), EngineError> {
        self.released = true;
        self.purge().map_err(|source| EngineError::Io {
            phase: Phase::Staging,
            source,
        })
    }

    fn purge(&self) -> std::io::Result<()> {
        if self.created {
            match std::fs::remove_dir_all(&self.path) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        } else {
            for entry in std::fs::read_dir(&self.path)? {
                let entry = entry?;
                if entry.file_name() == SESSION_LOCK {
                    continue;
                }
                if entry.file_type()?.is_dir() {
                    std::fs::remove_dir_all(entry.path())?;
                } else {
                    std::fs::remove_file(entry.path())?;
                }
            }
            // The lock goes last so the directory stays claimed until it is empty.
            match std::fs::remove_file(self.path.join(SESSION_LOCK)) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        debug!(path = %self.path.display(), removed_dir = self.created, "purged staging directory");
        Ok(())
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.purge() {
            warn!(path = %self.path.display(), error = %e, "failed to purge staging directory");
        }
    }
}
