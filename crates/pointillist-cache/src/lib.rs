//! pointillist-cache: Size-bounded persistent result cache.
//!
//! Stores any `serde`-serializable value under a string key, evicting
//! least-recently-used entries to stay within a byte budget. Entries
//! survive restarts when backed by a directory; a corrupted or missing
//! payload degrades to a cache miss rather than an error.

pub mod cache;
pub mod index;
pub mod store;

pub use cache::{CacheError, ResultCache};
pub use index::{CacheEntry, CacheIndex};
pub use store::{CacheStore, DiskStore, MemoryStore};
