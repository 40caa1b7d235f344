//! Tests for [`ResponseCache`]: content-addressed cache with snapshots.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::json;

use muninn::cache::{CacheConfig, ResponseCache, SNAPSHOT_FILE, SnapshotLoad, cache_key};

fn snapshot_config(dir: &tempfile::TempDir) -> CacheConfig {
    CacheConfig::new()
        .ttl(Duration::from_secs(3600))
        .flush_every(3)
        .snapshot_path(dir.path().join(SNAPSHOT_FILE))
}

// =========================================================================
// CacheConfig
// =========================================================================

#[test]
fn cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_entries, 10_000);
    assert_eq!(config.ttl, Duration::from_secs(3600));
    assert_eq!(config.flush_every, 10);
    assert!(config.snapshot_path.is_none());
}

// =========================================================================
// Lookup semantics
// =========================================================================

#[test]
fn hit_after_set_regardless_of_field_order() {
    let cache = ResponseCache::new(CacheConfig::default());
    let a = json!({"model": "llama3.1:8b", "text": "2+2?", "image_sha256": null});
    let b: serde_json::Value =
        serde_json::from_str(r#"{"image_sha256":null,"text":"2+2?","model":"llama3.1:8b"}"#)
            .unwrap();
    assert_eq!(cache_key(&a), cache_key(&b));

    assert!(cache.get(&a).is_none());
    cache.set(&a, json!({"response": "4"}));
    assert_eq!(cache.get(&b), Some(json!({"response": "4"})));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[test]
fn distinct_requests_do_not_collide() {
    let cache = ResponseCache::new(CacheConfig::default());
    cache.set(&json!({"text": "a"}), json!(1));
    cache.set(&json!({"text": "b"}), json!(2));
    assert_eq!(cache.get(&json!({"text": "a"})), Some(json!(1)));
    assert_eq!(cache.get(&json!({"text": "b"})), Some(json!(2)));
    assert_eq!(cache.len(), 2);
}

#[test]
fn ttl_expiry_misses_exactly_once_then_stays_missing() {
    let cache = ResponseCache::new(CacheConfig::new().ttl(Duration::from_secs(60)));
    let t0 = SystemTime::now();
    let req = json!({"text": "weather?"});
    cache.set_at(&req, json!("sunny"), t0);

    assert!(cache.get_at(&req, t0 + Duration::from_secs(59)).is_some());
    assert!(cache.get_at(&req, t0 + Duration::from_secs(60)).is_none());
    assert!(cache.is_empty());
    assert!(cache.get_at(&req, t0 + Duration::from_secs(61)).is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
}

#[test]
fn stats_are_empty_initially() {
    let stats = ResponseCache::new(CacheConfig::default()).stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.hit_rate, 0.0);
    assert_eq!(stats.entries, 0);
}

// =========================================================================
// Snapshots
// =========================================================================

#[test]
fn missing_snapshot_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, load) = ResponseCache::open(snapshot_config(&dir));
    assert_eq!(load, SnapshotLoad::Absent);
    assert!(cache.is_empty());
}

#[test]
fn every_kth_insertion_writes_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(SNAPSHOT_FILE);
    let (cache, _) = ResponseCache::open(snapshot_config(&dir));

    cache.set(&json!({"n": 1}), json!(1));
    cache.set(&json!({"n": 2}), json!(2));
    assert!(!path.exists(), "no snapshot before the third insertion");

    cache.set(&json!({"n": 3}), json!(3));
    assert!(path.exists());

    cache.set(&json!({"n": 4}), json!(4));
    let (reloaded, load) = ResponseCache::open(snapshot_config(&dir));
    assert_eq!(load, SnapshotLoad::Loaded(3), "fourth entry not yet flushed");
    assert_eq!(reloaded.get(&json!({"n": 2})), Some(json!(2)));
    assert!(reloaded.get(&json!({"n": 4})).is_none());
}

#[test]
fn explicit_flush_persists_everything() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, _) = ResponseCache::open(snapshot_config(&dir));
    cache.set(&json!({"q": "only one"}), json!("answer"));
    assert_eq!(cache.flush().unwrap(), 1);

    let (reloaded, load) = ResponseCache::open(snapshot_config(&dir));
    assert_eq!(load, SnapshotLoad::Loaded(1));
    assert_eq!(reloaded.get(&json!({"q": "only one"})), Some(json!("answer")));
}

#[test]
fn restored_entries_keep_their_age() {
    let dir = tempfile::tempdir().unwrap();
    let config = snapshot_config(&dir).ttl(Duration::from_secs(10));
    let (cache, _) = ResponseCache::open(config.clone());
    let old = SystemTime::now() - Duration::from_secs(30);
    cache.set_at(&json!({"stale": true}), json!(0), old);
    assert_eq!(cache.flush().unwrap(), 0, "expired entry must not be written");

    // an entry that ages out between flush and restart is skipped on load
    let fresh = SystemTime::now() - Duration::from_secs(9);
    cache.set_at(&json!({"aging": true}), json!(1), fresh);
    assert_eq!(cache.flush().unwrap(), 1);
    std::thread::sleep(Duration::from_millis(1_100));

    let (reloaded, load) = ResponseCache::open(config);
    assert_eq!(load, SnapshotLoad::Loaded(0));
    assert!(reloaded.get(&json!({"aging": true})).is_none());
}

#[test]
fn unread_expired_entries_are_not_counted_or_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let config = snapshot_config(&dir).ttl(Duration::from_secs(60)).flush_every(0);
    let cache = ResponseCache::new(config);
    let hour_ago = SystemTime::now() - Duration::from_secs(3600);

    for i in 0..1000 {
        cache.set_at(&json!({"i": i}), json!(i), hour_ago);
    }
    cache.set(&json!({"live": true}), json!("yes"));
    assert!(cache.get(&json!({"i": 7})).is_none());

    assert_eq!(cache.stats().entries, 1);
    assert_eq!(cache.flush().unwrap(), 1);
    let (_, load) = ResponseCache::open(snapshot_config(&dir));
    assert_eq!(load, SnapshotLoad::Loaded(1));
}

#[test]
fn table_is_bounded_by_max_entries() {
    let cache = ResponseCache::new(CacheConfig::new().max_entries(5));
    for i in 0..20 {
        cache.set(&json!({"i": i}), json!(i));
    }
    assert_eq!(cache.len(), 5);
    // least recently used entries go first
    assert!(cache.get(&json!({"i": 0})).is_none());
    assert_eq!(cache.get(&json!({"i": 19})), Some(json!(19)));
}

// =========================================================================
// Typed lookup
// =========================================================================

#[derive(Debug, PartialEq, serde::Deserialize)]
struct Reply {
    response: String,
}

#[test]
fn typed_lookup_counts_a_hit_only_when_payload_decodes() {
    let cache = ResponseCache::new(CacheConfig::default());
    let good = json!({"text": "good"});
    let bad = json!({"text": "bad"});
    cache.set(&good, json!({"response": "4"}));
    cache.set(&bad, json!(["not", "a", "reply"]));

    assert_eq!(
        cache.get_as::<Reply>(&good),
        Some(Reply {
            response: "4".into()
        })
    );
    assert!(cache.get_as::<Reply>(&bad).is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1, "undecodable entry is dropped");
}

#[test]
fn corrupt_snapshot_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(SNAPSHOT_FILE), b"{ not json").unwrap();

    let (cache, load) = ResponseCache::open(snapshot_config(&dir));
    assert!(matches!(load, SnapshotLoad::CorruptIgnored(_)));
    assert!(cache.is_empty());

    // still usable, and the next flush replaces the bad file
    cache.set(&json!({"k": 1}), json!(1));
    cache.flush().unwrap();
    let (_, load) = ResponseCache::open(snapshot_config(&dir));
    assert_eq!(load, SnapshotLoad::Loaded(1));
}

#[test]
fn snapshot_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b").join(SNAPSHOT_FILE);
    let cache = ResponseCache::new(CacheConfig::new().snapshot_path(&nested));
    cache.set(&json!({"x": 1}), json!(1));
    cache.flush().unwrap();
    assert!(nested.exists());
}

// =========================================================================
// Concurrency
// =========================================================================

#[test]
fn concurrent_writers_and_flushes_do_not_lose_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(ResponseCache::new(snapshot_config(&dir).flush_every(5)));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..25 {
                    let req = json!({"thread": t, "i": i});
                    cache.set(&req, json!(i));
                    assert_eq!(cache.get(&req), Some(json!(i)));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer panicked");
    }

    assert_eq!(cache.len(), 100);
    assert_eq!(cache.stats().hits, 100);
    assert_eq!(cache.flush().unwrap(), 100);
}

#[tokio::test]
async fn async_store_writes_due_snapshot_off_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(SNAPSHOT_FILE);
    let cache = Arc::new(ResponseCache::new(snapshot_config(&dir).flush_every(2)));

    cache.store(&json!({"n": 1}), json!(1));
    cache.store(&json!({"n": 2}), json!(2));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        assert!(std::time::Instant::now() < deadline, "snapshot never written");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // the write is rename-based, so an existing file is complete
    let (_, load) = ResponseCache::open(snapshot_config(&dir));
    assert_eq!(load, SnapshotLoad::Loaded(2));
}
