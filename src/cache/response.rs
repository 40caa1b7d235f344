//! Content-addressed response cache with periodic disk snapshots.
//!
//! [`ResponseCache`] maps the SHA-256 of a canonicalized request (see
//! [`key`](super::key)) to an opaque JSON payload. It is consulted by the
//! gateway for deterministic, non-streaming calls only.
//!
//! # Expiry and bounds
//!
//! Entries live in a moka LRU bounded by `max_entries`. An entry is expired
//! once `now - created_at >= ttl`. Reading an expired entry counts as a
//! miss and removes it; entries nobody reads again are evicted by moka on
//! the same schedule, measured from their original `created_at`, so
//! restored entries keep their age. Expired entries are never counted in
//! [`CacheStats::entries`] and never written to a snapshot.
//!
//! # Persistence
//!
//! Writes accumulate in memory. Every `flush_every`-th insertion the live
//! table is written to a single snapshot file, replacing the previous one,
//! so up to `flush_every - 1` recent entries can be lost on an unclean
//! shutdown. [`ResponseCache::flush`] forces an unconditional write and is
//! called on graceful shutdown. A missing or unreadable snapshot never
//! fails startup; [`SnapshotLoad`] reports which case occurred.
//!
//! [`ResponseCache::store`] is the async insertion path: a due snapshot is
//! written on the blocking pool instead of the calling task.
//!
//! # Locking
//!
//! Lookups and inserts go straight to moka. Snapshot writes serialize on a
//! flush lock, so concurrent flushes cannot reorder snapshots on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use moka::Expiry;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::key::cache_key;
use crate::telemetry;
use crate::{MuninnError, Result};

/// Snapshot file name inside the cache directory.
pub const SNAPSHOT_FILE: &str = "cache.json";

const SNAPSHOT_VERSION: u32 = 1;

/// Configuration for the response cache.
///
/// ```rust
/// # use muninn::cache::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(5_000)
///     .ttl(Duration::from_secs(600))
///     .flush_every(25)
///     .snapshot_path("/var/lib/muninn/cache.json");
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Default: 10,000.
    pub max_entries: u64,
    /// Time-to-live for cached entries. Default: 1 hour.
    pub ttl: Duration,
    /// Snapshot the table every N insertions; 0 disables periodic snapshots.
    /// Default: 10.
    pub flush_every: u64,
    /// Snapshot file. `None` keeps the cache purely in memory.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
            flush_every: 10,
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the snapshot interval in insertions.
    pub fn flush_every(mut self, n: u64) -> Self {
        self.flush_every = n;
        self
    }

    /// Set the snapshot file path.
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }
}

/// A single cached payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 hex digest of the canonical request content.
    pub key: String,
    pub payload: Value,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl CacheEntry {
    fn age_at(&self, now: SystemTime) -> Duration {
        Duration::from_millis(epoch_millis(now).saturating_sub(self.created_at))
    }
}

/// Outcome of loading the snapshot at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotLoad {
    /// Snapshot read; holds the number of live entries restored.
    Loaded(usize),
    /// No snapshot configured or no file present.
    Absent,
    /// Snapshot present but unreadable; the cache starts empty.
    CorruptIgnored(String),
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: usize,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<CacheEntry>,
}

/// Expires each entry `ttl` after its recorded `created_at`.
struct AgeExpiry {
    ttl: Duration,
}

impl AgeExpiry {
    fn remaining(&self, entry: &CacheEntry) -> Option<Duration> {
        Some(self.ttl.saturating_sub(entry.age_at(SystemTime::now())))
    }
}

impl Expiry<String, CacheEntry> for AgeExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.remaining(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.remaining(value)
    }
}

/// Thread-safe response cache. See module docs for expiry and persistence.
pub struct ResponseCache {
    config: CacheConfig,
    entries: Cache<String, CacheEntry>,
    insertions: AtomicU64,
    flush_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create an empty cache without touching disk.
    pub fn new(config: CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(AgeExpiry { ttl: config.ttl })
            .build();
        Self {
            config,
            entries,
            insertions: AtomicU64::new(0),
            flush_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Create a cache and restore the configured snapshot, if any.
    ///
    /// Never fails: a corrupt snapshot is reported and ignored.
    pub fn open(config: CacheConfig) -> (Self, SnapshotLoad) {
        let cache = Self::new(config);
        let outcome = match cache.config.snapshot_path.as_deref() {
            Some(path) => cache.restore(path),
            None => SnapshotLoad::Absent,
        };
        match &outcome {
            SnapshotLoad::Loaded(n) => info!(entries = n, "response cache restored"),
            SnapshotLoad::Absent => debug!("no response cache snapshot"),
            SnapshotLoad::CorruptIgnored(reason) => {
                warn!(%reason, "ignoring unreadable response cache snapshot")
            }
        }
        (cache, outcome)
    }

    fn restore(&self, path: &Path) -> SnapshotLoad {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SnapshotLoad::Absent,
            Err(e) => return SnapshotLoad::CorruptIgnored(e.to_string()),
        };
        let snapshot: Snapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => return SnapshotLoad::CorruptIgnored(e.to_string()),
        };
        if snapshot.version != SNAPSHOT_VERSION {
            return SnapshotLoad::CorruptIgnored(format!(
                "unsupported snapshot version {}",
                snapshot.version
            ));
        }
        let now = SystemTime::now();
        let mut restored = 0;
        for entry in snapshot.entries {
            if entry.age_at(now) >= self.config.ttl {
                continue;
            }
            self.entries.insert(entry.key.clone(), entry);
            restored += 1;
        }
        SnapshotLoad::Loaded(restored)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up the payload stored for `content`.
    pub fn get(&self, content: &Value) -> Option<Value> {
        self.get_at(content, SystemTime::now())
    }

    /// Look up the payload stored for `content` as of `now`.
    pub fn get_at(&self, content: &Value, now: SystemTime) -> Option<Value> {
        let found = self.fresh_payload(&cache_key(content), now);
        self.record(found.is_some());
        found
    }

    /// Look up and decode the payload stored for `content`.
    ///
    /// A payload that does not decode as `T` counts as a miss and is
    /// dropped from the cache.
    pub fn get_as<T: DeserializeOwned>(&self, content: &Value) -> Option<T> {
        self.get_as_at(content, SystemTime::now())
    }

    /// [`get_as`](Self::get_as) as of `now`.
    pub fn get_as_at<T: DeserializeOwned>(&self, content: &Value, now: SystemTime) -> Option<T> {
        let key = cache_key(content);
        let decoded = self
            .fresh_payload(&key, now)
            .and_then(|payload| match serde_json::from_value(payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %short(&key), error = %e, "dropping undecodable cache entry");
                    self.entries.invalidate(&key);
                    None
                }
            });
        self.record(decoded.is_some());
        decoded
    }

    fn fresh_payload(&self, key: &str, now: SystemTime) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if entry.age_at(now) >= self.config.ttl {
            self.entries.invalidate(key);
            debug!(key = %short(key), "cache entry expired");
            return None;
        }
        Some(entry.payload)
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        }
    }

    /// Store `payload` for `content`, replacing any previous entry.
    ///
    /// A due snapshot is written on the calling thread; async callers
    /// should use [`store`](Self::store).
    pub fn set(&self, content: &Value, payload: Value) {
        self.set_at(content, payload, SystemTime::now());
    }

    /// Store `payload` for `content` with creation time `now`.
    pub fn set_at(&self, content: &Value, payload: Value, now: SystemTime) {
        if self.insert_at(content, payload, now) {
            self.periodic_flush();
        }
    }

    /// Store `payload` for `content`, writing a due snapshot on the
    /// blocking pool. Requires a tokio runtime.
    pub fn store(self: &Arc<Self>, content: &Value, payload: Value) {
        if self.insert_at(content, payload, SystemTime::now()) {
            let cache = Arc::clone(self);
            tokio::task::spawn_blocking(move || cache.periodic_flush());
        }
    }

    /// Insert an entry; returns whether a periodic snapshot is due.
    fn insert_at(&self, content: &Value, payload: Value, now: SystemTime) -> bool {
        let key = cache_key(content);
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                payload,
                created_at: epoch_millis(now),
            },
        );
        let n = self.insertions.fetch_add(1, Ordering::Relaxed) + 1;
        self.config.snapshot_path.is_some()
            && self.config.flush_every > 0
            && n % self.config.flush_every == 0
    }

    fn periodic_flush(&self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "periodic response cache flush failed");
        }
    }

    /// Write the live entries to the snapshot file unconditionally.
    ///
    /// Returns the number of entries written (0 when no snapshot path is
    /// configured).
    pub fn flush(&self) -> Result<usize> {
        let Some(path) = self.config.snapshot_path.as_deref() else {
            return Ok(0);
        };

        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: self.live_entries(SystemTime::now()),
        };
        let count = snapshot.entries.len();

        let result = write_snapshot(path, &snapshot);
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(telemetry::CACHE_FLUSHES_TOTAL, "status" => status).increment(1);
        result?;

        debug!(entries = count, path = %path.display(), "response cache flushed");
        Ok(count)
    }

    fn live_entries(&self, now: SystemTime) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.age_at(now) < self.config.ttl)
            .collect()
    }

    /// Current hit/miss counters and live entry count.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entries: self.len(),
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.live_entries(SystemTime::now()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn snapshot.
fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec(snapshot)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        MuninnError::Io(e)
    })
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn short(key: &str) -> &str {
    &key[..12.min(key.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(ttl_secs: u64) -> ResponseCache {
        ResponseCache::new(CacheConfig::new().ttl(Duration::from_secs(ttl_secs)))
    }

    #[test]
    fn expiry_is_inclusive_of_ttl() {
        let c = cache(10);
        let t0 = SystemTime::now();
        let req = json!({"text": "2+2?"});
        c.set_at(&req, json!("4"), t0);

        assert_eq!(c.get_at(&req, t0 + Duration::from_millis(9_999)), Some(json!("4")));
        assert_eq!(c.get_at(&req, t0 + Duration::from_secs(10)), None);
        assert!(c.is_empty(), "expired entry is removed on read");
    }

    #[test]
    fn expired_read_is_a_single_miss() {
        let c = cache(1);
        let t0 = SystemTime::now();
        let req = json!({"text": "x"});
        c.set_at(&req, json!(1), t0);

        assert!(c.get_at(&req, t0 + Duration::from_secs(5)).is_none());
        let stats = c.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn clock_going_backwards_counts_as_fresh() {
        let c = cache(10);
        let t0 = SystemTime::now();
        let req = json!({"text": "skew"});
        c.set_at(&req, json!(true), t0);
        assert_eq!(c.get_at(&req, t0 - Duration::from_secs(3)), Some(json!(true)));
    }

    #[test]
    fn overwrite_replaces_payload_and_timestamp() {
        let c = cache(10);
        let t0 = SystemTime::now();
        let req = json!({"text": "q"});
        c.set_at(&req, json!("old"), t0);
        c.set_at(&req, json!("new"), t0 + Duration::from_secs(8));
        assert_eq!(
            c.get_at(&req, t0 + Duration::from_secs(12)),
            Some(json!("new"))
        );
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn flush_without_path_is_a_noop() {
        let c = cache(10);
        c.set(&json!({"a": 1}), json!(1));
        assert_eq!(c.flush().unwrap(), 0);
    }
}
