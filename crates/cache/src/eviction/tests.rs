//! Tests for eviction policies

use super::*;
use std::path::{Path, PathBuf};

#[test]
fn test_lru_eviction() {
    let policy = LruPolicy::new();

    policy.on_insert(Path::new("a"), 100);
    policy.on_insert(Path::new("b"), 200);
    policy.on_insert(Path::new("c"), 300);

    // Should evict 'a' (least recently used)
    assert_eq!(policy.next_eviction(), Some(PathBuf::from("a")));

    // Access 'a' to make it more recent
    policy.on_access(Path::new("a"), 100);
    assert_eq!(policy.next_eviction(), Some(PathBuf::from("b")));

    policy.on_remove(Path::new("b"));
    assert_eq!(policy.next_eviction(), Some(PathBuf::from("c")));
    assert_eq!(policy.tracked_size(), 400);
    assert_eq!(policy.len(), 2);
}

#[test]
fn test_reinsert_replaces_size() {
    let policy = LruPolicy::new();
    policy.on_insert(Path::new("a"), 10);
    policy.on_insert(Path::new("a"), 30);
    assert_eq!(policy.len(), 1);
    assert_eq!(policy.tracked_size(), 30);
}

#[test]
fn test_access_of_unknown_key_inserts() {
    let policy = LruPolicy::new();
    policy.on_access(Path::new("x"), 5);
    assert_eq!(policy.next_eviction(), Some(PathBuf::from("x")));
    assert_eq!(policy.tracked_size(), 5);
}

#[test]
fn test_clear() {
    let policy = LruPolicy::new();
    policy.on_insert(Path::new("a"), 1);
    policy.on_insert(Path::new("b"), 1);
    policy.clear();
    assert!(policy.is_empty());
    assert_eq!(policy.next_eviction(), None);
    assert_eq!(policy.tracked_size(), 0);
}
