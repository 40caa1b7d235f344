//! Caching subsystem.
//!
//! - [`key`]: canonical serialization and SHA-256 keying of request content.
//! - [`response::ResponseCache`]: memory-resident payload cache with lazy
//!   TTL expiry and periodic snapshots to disk. See [`response`] module docs
//!   for the durability/throughput tradeoff.

pub mod key;
pub mod response;

pub use key::{cache_key, canonical_json, digest_hex};
pub use response::{
    CacheConfig, CacheEntry, CacheStats, ResponseCache, SNAPSHOT_FILE, SnapshotLoad,
};
