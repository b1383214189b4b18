//! Integration test: directory-backed cache across reopen, with
//! damaged and stray files on disk.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::PathBuf;

use pointillist_cache::ResultCache;
use pointillist_cache::index::{INDEX_FILE, file_name_for};
use test_log::test;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pointillist-cache-it-{name}-{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

#[test]
fn entries_survive_reopen() {
    let dir = scratch_dir("reopen");
    {
        let cache = ResultCache::open(&dir, 1_000_000).unwrap();
        assert!(cache.put("a", &vec![1u32, 2, 3]).unwrap());
        assert!(cache.put("b", &"hello".to_string()).unwrap());
    }

    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    assert_eq!(cache.count(), 2);
    assert_eq!(cache.get::<Vec<u32>>("a"), Some(vec![1, 2, 3]));
    assert_eq!(cache.get::<String>("b").as_deref(), Some("hello"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn payload_files_are_named_by_key_hash() {
    let dir = scratch_dir("names");
    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    cache.put("640x480|100|standard|hybrid|0.30", &42u8).unwrap();
    assert!(dir.join(file_name_for("640x480|100|standard|hybrid|0.30")).is_file());
    assert!(dir.join(INDEX_FILE).is_file());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_payload_on_disk_is_healed() {
    let dir = scratch_dir("corrupt-payload");
    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    cache.put("a", &vec![1u32, 2, 3]).unwrap();
    fs::write(dir.join(file_name_for("a")), b"{ not json").unwrap();

    assert_eq!(cache.get::<Vec<u32>>("a"), None);
    assert!(!cache.contains_key("a"));
    assert!(!dir.join(file_name_for("a")).exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn deleted_payload_is_dropped_on_reopen() {
    let dir = scratch_dir("deleted-payload");
    {
        let cache = ResultCache::open(&dir, 1_000_000).unwrap();
        cache.put("a", &1u8).unwrap();
        cache.put("b", &2u8).unwrap();
    }
    fs::remove_file(dir.join(file_name_for("a"))).unwrap();

    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    assert!(!cache.contains_key("a"));
    assert_eq!(cache.get::<u8>("b"), Some(2));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn orphaned_files_are_swept_on_open() {
    let dir = scratch_dir("orphans");
    {
        let cache = ResultCache::open(&dir, 1_000_000).unwrap();
        cache.put("kept", &1u8).unwrap();
    }
    fs::write(dir.join("0123456789abcdef.json"), b"[]").unwrap();
    fs::write(dir.join("index.json.tmp"), b"partial").unwrap();
    fs::write(dir.join("notes.txt"), b"left alone").unwrap();

    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    assert!(!dir.join("0123456789abcdef.json").exists());
    assert!(!dir.join("index.json.tmp").exists());
    assert!(dir.join("notes.txt").exists());
    assert_eq!(cache.get::<u8>("kept"), Some(1));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn foreign_json_files_survive_open() {
    let dir = scratch_dir("foreign");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("settings.json"), b"{}").unwrap();
    fs::write(dir.join("export.json.tmp"), b"partial").unwrap();
    fs::write(dir.join("0123456789ABCDEF.json"), b"[]").unwrap();

    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    cache.put("a", &1u8).unwrap();
    drop(cache);
    let cache = ResultCache::open(&dir, 1_000_000).unwrap();

    assert!(dir.join("settings.json").exists());
    assert!(dir.join("export.json.tmp").exists());
    assert!(dir.join("0123456789ABCDEF.json").exists());
    assert_eq!(cache.get::<u8>("a"), Some(1));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn corrupt_index_starts_empty() {
    let dir = scratch_dir("corrupt-index");
    {
        let cache = ResultCache::open(&dir, 1_000_000).unwrap();
        cache.put("a", &1u8).unwrap();
    }
    fs::write(dir.join(INDEX_FILE), b"garbage").unwrap();

    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    assert_eq!(cache.count(), 0);
    // The payload is unreferenced now and was swept.
    assert!(!dir.join(file_name_for("a")).exists());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn reopening_with_smaller_limit_trims() {
    let dir = scratch_dir("trim");
    let value = vec![9u32; 50];
    let one = serde_json::to_vec(&value).unwrap().len() as u64;
    {
        let cache = ResultCache::open(&dir, one * 10).unwrap();
        for i in 0..6 {
            cache.put(&format!("k{i}"), &value).unwrap();
        }
        assert_eq!(cache.count(), 6);
    }

    let cache = ResultCache::open(&dir, one * 4).unwrap();
    assert!(cache.size_bytes() <= one * 4);
    assert_eq!(cache.count(), 4);
    assert!(cache.contains_key("k5"));
    assert!(!cache.contains_key("k0"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn clear_removes_files() {
    let dir = scratch_dir("clear");
    let cache = ResultCache::open(&dir, 1_000_000).unwrap();
    cache.put("a", &1u8).unwrap();
    cache.clear().unwrap();
    assert!(!dir.join(file_name_for("a")).exists());
    assert_eq!(cache.count(), 0);
    let _ = fs::remove_dir_all(&dir);
}
