//! Size-bounded, least-recently-used result cache.
//!
//! Payloads are serialized with `serde_json` into one blob per key; the
//! index of entries is a separate blob rewritten after every change. The
//! index lives behind one [`RwLock`]: counters and membership checks
//! share the read lock, anything that changes recency or contents takes
//! the write lock.
//!
//! Storage problems never surface as wrong data. A payload that is
//! missing or fails to parse is treated as a miss and its entry removed.

use std::collections::HashSet;
use std::io;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::index::{CacheIndex, INDEX_FILE, is_payload_file_name};
use crate::store::{CacheStore, DiskStore, MemoryStore, TEMP_SUFFIX};

/// A single payload may use at most this fraction of the size limit.
const MAX_ENTRY_FRACTION: u64 = 4;

/// Errors that can occur while writing to the cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// A payload or the index could not be (de)serialized.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistent key/value cache with a byte budget.
///
/// # Invariants
///
/// After every `put`, `size_bytes() <= size_limit_bytes()`. Every index
/// entry names a payload blob written before the entry was recorded.
#[derive(Debug)]
pub struct ResultCache {
    store: Box<dyn CacheStore>,
    index: RwLock<CacheIndex>,
    size_limit_bytes: u64,
}

impl ResultCache {
    /// Open (or create) a cache in `dir`.
    ///
    /// The directory is reconciled with its index: unindexed payloads and
    /// leftover temp files are deleted (files not named like cache blobs
    /// are left alone), entries whose payload is gone are
    /// dropped, and entries are evicted until the total fits `size_limit_bytes`.
    /// An unreadable index is discarded and the cache starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be created or
    /// listed.
    pub fn open(dir: impl AsRef<Path>, size_limit_bytes: u64) -> Result<Self, CacheError> {
        let store = DiskStore::new(dir.as_ref())?;
        Self::with_store(Box::new(store), size_limit_bytes)
    }

    /// A cache that keeps everything in memory.
    #[must_use]
    pub fn in_memory(size_limit_bytes: u64) -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            index: RwLock::new(CacheIndex::default()),
            size_limit_bytes,
        }
    }

    /// Wrap an arbitrary backend, reconciling it as [`open`](Self::open)
    /// does.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the store cannot be listed or the
    /// index read fails for a reason other than absence.
    pub fn with_store(store: Box<dyn CacheStore>, size_limit_bytes: u64) -> Result<Self, CacheError> {
        let (index, discarded) = match store.read(INDEX_FILE) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(index) => (index, false),
                Err(e) => {
                    log::warn!("discarding unreadable cache index: {e}");
                    (CacheIndex::default(), true)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => (CacheIndex::default(), false),
            Err(e) => return Err(e.into()),
        };

        let cache = Self {
            store,
            index: RwLock::new(index),
            size_limit_bytes,
        };
        cache.reconcile(discarded)?;
        Ok(cache)
    }

    /// Serialize `value` and store it under `key`, evicting least
    /// recently used entries until it fits.
    ///
    /// Returns `Ok(false)` without storing anything when the payload is
    /// larger than a quarter of the size limit.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `value` cannot be
    /// serialized and [`CacheError::Io`] if the payload or index cannot
    /// be written. Evictions made before a failed write stay in effect.
    pub fn put<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<bool, CacheError> {
        let bytes = serde_json::to_vec(value)?;
        let size = bytes.len() as u64;
        if size > self.size_limit_bytes / MAX_ENTRY_FRACTION {
            log::debug!(
                "not caching {key}: {size} bytes exceeds the per-entry limit of {}",
                self.size_limit_bytes / MAX_ENTRY_FRACTION
            );
            return Ok(false);
        }

        let mut index = self.write_index();
        let replaced = index.remove(key);
        let mut evicted = 0usize;
        while index.total_bytes() + size > self.size_limit_bytes {
            let Some(victim) = index.lru_key().map(str::to_string) else {
                break;
            };
            if let Some(entry) = index.remove(&victim) {
                self.remove_payload(&entry.file_name);
                evicted += 1;
            }
        }
        if evicted > 0 {
            log::debug!("evicted {evicted} cache entries to fit {key}");
        }

        let file_name = crate::index::file_name_for(key);
        if let Err(e) = self.store.write(&file_name, &bytes) {
            if replaced.is_some() {
                self.remove_payload(&file_name);
            }
            self.persist(&index)?;
            return Err(e.into());
        }
        index.insert(key, size, now_ms());
        self.persist(&index)?;
        Ok(true)
    }

    /// Load and deserialize the payload for `key`.
    ///
    /// A hit refreshes the entry's recency. A missing or unparsable
    /// payload removes the entry and returns `None`.
    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let mut index = self.write_index();
        let file_name = index.get(key)?.file_name.clone();

        let loaded = self
            .store
            .read(&file_name)
            .map_err(CacheError::from)
            .and_then(|bytes| serde_json::from_slice::<V>(&bytes).map_err(CacheError::from));

        match loaded {
            Ok(value) => {
                index.touch(key, now_ms());
                if let Err(e) = self.persist(&index) {
                    log::warn!("failed to persist cache recency for {key}: {e}");
                }
                Some(value)
            }
            Err(e) => {
                log::warn!("dropping unreadable cache entry {key}: {e}");
                index.remove(key);
                self.remove_payload(&file_name);
                if let Err(e) = self.persist(&index) {
                    log::warn!("failed to persist cache index after dropping {key}: {e}");
                }
                None
            }
        }
    }

    /// Remove every entry and payload.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the empty index cannot be written.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut index = self.write_index();
        for entry in index.entries() {
            self.remove_payload(&entry.file_name);
        }
        *index = CacheIndex::default();
        self.persist(&index)
    }

    /// Whether `key` has an entry. Does not touch recency or validate the
    /// payload.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.read_index().contains(key)
    }

    /// Total payload bytes currently indexed.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.read_index().total_bytes()
    }

    /// The configured byte budget.
    #[must_use]
    pub const fn size_limit_bytes(&self) -> u64 {
        self.size_limit_bytes
    }

    /// Number of entries.
    #[must_use]
    pub fn count(&self) -> usize {
        self.read_index().len()
    }

    fn reconcile(&self, mut changed: bool) -> Result<(), CacheError> {
        let names = self.store.list()?;
        let present: HashSet<&str> = names.iter().map(String::as_str).collect();
        let mut index = self.write_index();

        let dangling = index.retain(|e| present.contains(e.file_name.as_str()));
        if !dangling.is_empty() {
            log::warn!("dropped {} cache entries with missing payloads", dangling.len());
            changed = true;
        }

        let indexed: HashSet<String> = index.entries().map(|e| e.file_name.clone()).collect();
        let mut swept = 0usize;
        for name in &names {
            // Only names this cache writes are ever swept.
            let orphan = match name.strip_suffix(TEMP_SUFFIX) {
                Some(target) => target == INDEX_FILE || is_payload_file_name(target),
                None => is_payload_file_name(name) && !indexed.contains(name),
            };
            if orphan {
                self.remove_payload(name);
                swept += 1;
            }
        }
        if swept > 0 {
            log::debug!("swept {swept} orphaned cache files");
        }

        while index.total_bytes() > self.size_limit_bytes {
            let Some(victim) = index.lru_key().map(str::to_string) else {
                break;
            };
            if let Some(entry) = index.remove(&victim) {
                self.remove_payload(&entry.file_name);
                changed = true;
            }
        }

        if changed {
            self.persist(&index)?;
        }
        log::debug!(
            "cache ready: {} entries, {} of {} bytes",
            index.len(),
            index.total_bytes(),
            self.size_limit_bytes
        );
        Ok(())
    }

    fn persist(&self, index: &CacheIndex) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(index)?;
        self.store.write(INDEX_FILE, &bytes)?;
        Ok(())
    }

    fn remove_payload(&self, file_name: &str) {
        if let Err(e) = self.store.remove(file_name) {
            log::warn!("failed to remove cache file {file_name}: {e}");
        }
    }

    fn read_index(&self) -> RwLockReadGuard<'_, CacheIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, CacheIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
