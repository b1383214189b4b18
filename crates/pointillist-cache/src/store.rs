//! Backing stores for cache payloads and the index.
//!
//! A store is a flat namespace of named byte blobs. [`DiskStore`] keeps
//! one file per name in a directory and replaces files atomically;
//! [`MemoryStore`] keeps everything in a map and is meant for tests and
//! for callers that want caching without persistence.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Suffix of in-progress writes. Names ending in it are never valid
/// entries and are swept on open.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Trait for cache backends.
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Read the whole blob called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotFound`] if there is no such blob, or
    /// any other I/O error from the backend.
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Create or replace the blob called `name`.
    ///
    /// Readers never observe a partially written blob.
    ///
    /// # Errors
    ///
    /// Returns the backend's I/O error.
    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// Remove the blob called `name`. Removing a missing blob succeeds.
    ///
    /// # Errors
    ///
    /// Returns the backend's I/O error.
    fn remove(&self, name: &str) -> io::Result<()>;

    /// Names of every blob currently stored, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns the backend's I/O error.
    fn list(&self) -> io::Result<Vec<String>>;
}

/// One file per blob in a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Use `dir`, creating it (and its parents) if needed.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The backing directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CacheStore for DiskStore {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.dir.join(name))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.dir.join(name);
        let temp = self.dir.join(format!("{name}{TEMP_SUFFIX}"));
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &path).inspect_err(|_| {
            let _ = fs::remove_file(&temp);
        })
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.dir.join(name)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

/// Blobs held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheStore for MemoryStore {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.blobs()
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        self.blobs().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        self.blobs().remove(name);
        Ok(())
    }

    fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.blobs().keys().cloned().collect())
    }
}
