//! The cache index: key to entry metadata, persisted as JSON.

use std::collections::HashMap;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

/// Name of the persisted index blob.
pub const INDEX_FILE: &str = "index.json";

/// Extension of payload blobs.
pub const PAYLOAD_EXTENSION: &str = ".json";

/// Metadata for one cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Caller-supplied key.
    pub key: String,
    /// Name of the payload blob in the store.
    pub file_name: String,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Wall-clock creation time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Wall-clock time of the last write or successful read.
    pub last_accessed_ms: u64,
    /// Monotonic counter bumped on every access. Recency is ordered by
    /// this alone, so clock steps cannot reorder eviction.
    pub sequence: u64,
}

/// All entries plus the next recency sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndex {
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
}

impl CacheIndex {
    /// Entry for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Whether `key` has an entry.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all payload sizes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// Record a freshly written payload, replacing any previous entry.
    pub fn insert(&mut self, key: &str, size_bytes: u64, now_ms: u64) -> &CacheEntry {
        let sequence = self.bump();
        let entry = CacheEntry {
            key: key.to_string(),
            file_name: file_name_for(key),
            size_bytes,
            created_at_ms: now_ms,
            last_accessed_ms: now_ms,
            sequence,
        };
        self.entries
            .entry(key.to_string())
            .insert_entry(entry)
            .into_mut()
    }

    /// Mark `key` as just used.
    pub fn touch(&mut self, key: &str, now_ms: u64) {
        let sequence = self.bump();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_accessed_ms = now_ms;
            entry.sequence = sequence;
        }
    }

    /// Remove and return the entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Key of the least recently used entry.
    #[must_use]
    pub fn lru_key(&self) -> Option<&str> {
        self.entries
            .values()
            .min_by_key(|e| e.sequence)
            .map(|e| e.key.as_str())
    }

    /// Iterate over all entries.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Drop every entry for which `keep` returns `false`, returning the
    /// dropped entries.
    pub fn retain(&mut self, mut keep: impl FnMut(&CacheEntry) -> bool) -> Vec<CacheEntry> {
        let dropped: Vec<String> = self
            .entries
            .values()
            .filter(|e| !keep(e))
            .map(|e| e.key.clone())
            .collect();
        dropped
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .collect()
    }

    fn bump(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

/// Payload blob name for `key`: hex SipHash-1-3 plus [`PAYLOAD_EXTENSION`].
#[must_use]
pub fn file_name_for(key: &str) -> String {
    let mut hasher = SipHasher13::new();
    hasher.write(key.as_bytes());
    format!("{:016x}{PAYLOAD_EXTENSION}", hasher.finish())
}

/// Whether `name` has the shape [`file_name_for`] produces.
#[must_use]
pub fn is_payload_file_name(name: &str) -> bool {
    name.strip_suffix(PAYLOAD_EXTENSION).is_some_and(|stem| {
        stem.len() == 16 && stem.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_stable_and_distinct() {
        let a = file_name_for("640x480|1000|standard|hybrid|0.30");
        assert_eq!(a, file_name_for("640x480|1000|standard|hybrid|0.30"));
        assert_ne!(a, file_name_for("640x480|1001|standard|hybrid|0.30"));
        assert_eq!(a.len(), 16 + PAYLOAD_EXTENSION.len());
        assert!(a.ends_with(".json"));
        assert_ne!(a, INDEX_FILE);
    }

    #[test]
    fn payload_names_are_recognized() {
        assert!(is_payload_file_name(&file_name_for("a")));
        assert!(is_payload_file_name("0123456789abcdef.json"));
        assert!(!is_payload_file_name(INDEX_FILE));
        assert!(!is_payload_file_name("settings.json"));
        assert!(!is_payload_file_name("0123456789ABCDEF.json"));
        assert!(!is_payload_file_name("0123456789abcdef0.json"));
        assert!(!is_payload_file_name("0123456789abcdef.txt"));
    }

    #[test]
    fn lru_follows_access_order() {
        let mut index = CacheIndex::default();
        index.insert("a", 1, 100);
        index.insert("b", 1, 100);
        assert_eq!(index.lru_key(), Some("a"));
        index.touch("a", 100);
        assert_eq!(index.lru_key(), Some("b"));
    }

    #[test]
    fn lru_ignores_wall_clock_steps() {
        let mut index = CacheIndex::default();
        index.insert("early", 1, 5_000);
        // The clock stepped backwards before the next write.
        index.insert("late", 1, 1_000);
        assert_eq!(index.lru_key(), Some("early"));
        index.touch("early", 500);
        assert_eq!(index.lru_key(), Some("late"));
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let mut index = CacheIndex::default();
        index.insert("a", 10, 1);
        index.insert("a", 25, 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.total_bytes(), 25);
    }

    #[test]
    fn retain_returns_dropped_entries() {
        let mut index = CacheIndex::default();
        index.insert("keep", 1, 1);
        index.insert("drop", 2, 1);
        let dropped = index.retain(|e| e.key == "keep");
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].key, "drop");
        assert!(index.contains("keep"));
        assert!(!index.contains("drop"));
    }

    #[test]
    fn index_serde_round_trip() {
        let mut index = CacheIndex::default();
        index.insert("a", 10, 5);
        index.touch("a", 9);
        let json = serde_json::to_string(&index).unwrap();
        let back: CacheIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(index, back);
    }
}
