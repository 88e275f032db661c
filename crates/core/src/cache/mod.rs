//! TTL cache over the persistent key-value medium.
//!
//! Entries carry access metadata, tags and a source label. Reads past the
//! expiration instant remove the entry and report a miss. Reads of entries in
//! the last part of their lifetime queue them for background refresh, see
//! [`RefreshScheduler`].

mod refresh;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::storage::{LocalStorage, StorageError};

pub use refresh::{CacheRefresher, RefreshHandle, RefreshReport, RefreshScheduler};

pub const CACHE_KEY_PREFIX: &str = "enhanced_cache_";
pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_SOURCE: &str = "unknown";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("cache value for `{key}` could not be encoded: {message}")]
    Encode { key: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub timestamp: DateTime<Utc>,
    /// `None` means the entry never expires.
    pub expiration: Option<DateTime<Utc>>,
    pub ttl_ms: i64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub size: usize,
    pub version: String,
    pub tags: Vec<String>,
    pub source: String,
}

impl CacheMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| now > expiration)
    }

    /// Fraction of the lifetime still ahead of `now`, 1.0 for entries without TTL.
    pub fn remaining_fraction(&self, now: DateTime<Utc>) -> f64 {
        let Some(expiration) = self.expiration else {
            return 1.0;
        };
        if self.ttl_ms <= 0 {
            return 1.0;
        }
        let remaining = (expiration - now).num_milliseconds().max(0) as f64;
        remaining / self.ttl_ms as f64
    }

    pub fn ttl(&self) -> Duration {
        Duration::milliseconds(self.ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub metadata: CacheMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub version: Option<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    /// Share of the lifetime after which an entry is due for refresh.
    pub threshold: f64,
    pub max_concurrent: usize,
    pub interval: std::time::Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self { threshold: 0.8, max_concurrent: 3, interval: std::time::Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub total_size: usize,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub expired_entries: usize,
    pub average_access_count: f64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
    pub entries_by_source: BTreeMap<String, usize>,
    pub entries_by_tag: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct RefreshQueue {
    queued: VecDeque<String>,
    pending: HashSet<String>,
}

#[derive(Debug, Deserialize)]
struct StoredMetadata {
    metadata: CacheMetadata,
}

pub struct KeyValueCache {
    storage: LocalStorage,
    clock: SharedClock,
    policy: RefreshPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    refresh_queue: Mutex<RefreshQueue>,
}

impl std::fmt::Debug for KeyValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueCache")
            .field("policy", &self.policy)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

fn storage_key(key: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{key}")
}

impl KeyValueCache {
    pub fn new(storage: LocalStorage, clock: SharedClock) -> Self {
        Self::with_policy(storage, clock, RefreshPolicy::default())
    }

    pub fn with_policy(storage: LocalStorage, clock: SharedClock, policy: RefreshPolicy) -> Self {
        Self {
            storage,
            clock,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            refresh_queue: Mutex::new(RefreshQueue::default()),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.get_entry(key)?;
        match serde_json::from_value(entry.data) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(
                    event_name = "cache.get.shape_mismatch",
                    key,
                    error = %error,
                    "cached value has an unexpected shape"
                );
                None
            }
        }
    }

    /// Reads an entry with its metadata, updating access statistics on hit.
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<serde_json::Value>> {
        let now = self.clock.now();
        let Some(mut entry) = self.read_entry(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.metadata.is_expired(now) {
            debug!(event_name = "cache.get.expired", key, "removing expired cache entry");
            self.remove_quietly(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entry.metadata.access_count += 1;
        entry.metadata.last_accessed = entry.metadata.last_accessed.max(now);
        if let Err(error) = self.storage.write_json(&storage_key(key), &entry) {
            warn!(
                event_name = "cache.get.metadata_write_failed",
                key,
                error = %error,
                "could not persist access metadata"
            );
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        if entry.metadata.remaining_fraction(now) <= 1.0 - self.policy.threshold {
            self.schedule_refresh(key);
        }

        Some(entry)
    }

    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        options: SetOptions,
    ) -> Result<(), CacheError> {
        let data = serde_json::to_value(value)
            .map_err(|error| CacheError::Encode { key: key.to_string(), message: error.to_string() })?;
        self.set_value(key, data, ttl, options)
    }

    pub fn set_value(
        &self,
        key: &str,
        data: serde_json::Value,
        ttl: Duration,
        options: SetOptions,
    ) -> Result<(), CacheError> {
        let now = self.clock.now();
        let size = data.to_string().len();
        let ttl_ms = ttl.num_milliseconds().max(0);
        let entry = CacheEntry {
            data,
            metadata: CacheMetadata {
                timestamp: now,
                expiration: (ttl_ms > 0).then(|| now + Duration::milliseconds(ttl_ms)),
                ttl_ms,
                access_count: 0,
                last_accessed: now,
                size,
                version: options.version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
                tags: options.tags,
                source: options.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            },
        };

        let target = storage_key(key);
        match self.storage.write_json(&target, &entry) {
            Ok(()) => Ok(()),
            Err(error) if error.is_quota_exceeded() => {
                let removed = self.cleanup_expired();
                warn!(
                    event_name = "cache.set.quota_exceeded",
                    key,
                    removed,
                    "storage full, retrying after removing expired entries"
                );
                self.storage.write_json(&target, &entry).map_err(CacheError::from)
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        let existed = matches!(self.storage.get_item(&storage_key(key)), Ok(Some(_)));
        self.remove_quietly(key);
        existed
    }

    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.read_metadata(key).is_some_and(|metadata| !metadata.is_expired(now))
    }

    pub fn clear(&self) {
        for stored in self.storage.keys_with_prefix(CACHE_KEY_PREFIX) {
            if let Err(error) = self.storage.remove_item(&stored) {
                warn!(event_name = "cache.clear.failed", key = %stored, error = %error, "remove failed");
            }
        }
        let mut queue = self.lock_queue();
        queue.queued.clear();
        queue.pending.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.storage
            .keys_with_prefix(CACHE_KEY_PREFIX)
            .into_iter()
            .map(|stored| stored[CACHE_KEY_PREFIX.len()..].to_string())
            .collect()
    }

    pub fn metadata(&self, key: &str) -> Option<CacheMetadata> {
        self.read_metadata(key)
    }

    /// Stored payload regardless of expiry, without touching access statistics.
    pub fn raw_data(&self, key: &str) -> Option<serde_json::Value> {
        self.storage
            .read_json::<CacheEntry<serde_json::Value>>(&storage_key(key))
            .ok()
            .flatten()
            .map(|entry| entry.data)
    }

    pub fn find_by_tag(&self, tag: &str) -> Vec<String> {
        self.find_by(|metadata| metadata.tags.iter().any(|candidate| candidate == tag))
    }

    pub fn find_by_source(&self, source: &str) -> Vec<String> {
        self.find_by(|metadata| metadata.source == source)
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        for key in self.keys() {
            let expired = match self.storage.read_json::<StoredMetadata>(&storage_key(&key)) {
                Ok(Some(stored)) => stored.metadata.is_expired(now),
                Ok(None) => false,
                Err(_) => true,
            };
            if expired {
                self.remove_quietly(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn statistics(&self) -> CacheStatistics {
        let now = self.clock.now();
        let mut stats = CacheStatistics {
            total_entries: 0,
            total_size: 0,
            hit_rate: 0.0,
            miss_rate: 0.0,
            expired_entries: 0,
            average_access_count: 0.0,
            oldest_entry: None,
            newest_entry: None,
            entries_by_source: BTreeMap::new(),
            entries_by_tag: BTreeMap::new(),
        };

        let mut total_access = 0u64;
        for key in self.keys() {
            let Some(metadata) = self.read_metadata(&key) else {
                continue;
            };
            stats.total_entries += 1;
            stats.total_size += metadata.size;
            total_access += metadata.access_count;
            if metadata.is_expired(now) {
                stats.expired_entries += 1;
            }
            stats.oldest_entry = Some(
                stats.oldest_entry.map_or(metadata.timestamp, |oldest| oldest.min(metadata.timestamp)),
            );
            stats.newest_entry = Some(
                stats.newest_entry.map_or(metadata.timestamp, |newest| newest.max(metadata.timestamp)),
            );
            *stats.entries_by_source.entry(metadata.source.clone()).or_insert(0) += 1;
            for tag in &metadata.tags {
                *stats.entries_by_tag.entry(tag.clone()).or_insert(0) += 1;
            }
        }

        if stats.total_entries > 0 {
            stats.average_access_count = total_access as f64 / stats.total_entries as f64;
        }

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        if lookups > 0 {
            stats.hit_rate = hits as f64 / lookups as f64;
            stats.miss_rate = misses as f64 / lookups as f64;
        }

        stats
    }

    /// Keys queued for refresh and not yet handed to a refresher.
    pub fn queued_refreshes(&self) -> Vec<String> {
        self.lock_queue().queued.iter().cloned().collect()
    }

    fn schedule_refresh(&self, key: &str) {
        let mut queue = self.lock_queue();
        if queue.pending.insert(key.to_string()) {
            debug!(event_name = "cache.refresh.queued", key, "entry queued for refresh");
            queue.queued.push_back(key.to_string());
        }
    }

    fn take_refresh_batch(&self) -> Vec<String> {
        let mut queue = self.lock_queue();
        queue.queued.drain(..).collect()
    }

    fn finish_refresh(&self, key: &str) {
        self.lock_queue().pending.remove(key);
    }

    fn lock_queue(&self) -> MutexGuard<'_, RefreshQueue> {
        self.refresh_queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn find_by(&self, predicate: impl Fn(&CacheMetadata) -> bool) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|key| self.read_metadata(key).is_some_and(|metadata| predicate(&metadata)))
            .collect()
    }

    fn read_entry(&self, key: &str) -> Option<CacheEntry<serde_json::Value>> {
        match self.storage.read_json(&storage_key(key)) {
            Ok(entry) => entry,
            Err(error @ StorageError::Corrupted { .. }) => {
                warn!(event_name = "cache.get.corrupted", key, error = %error, "dropping corrupted entry");
                self.remove_quietly(key);
                None
            }
            Err(error) => {
                warn!(event_name = "cache.get.failed", key, error = %error, "cache read failed");
                None
            }
        }
    }

    fn read_metadata(&self, key: &str) -> Option<CacheMetadata> {
        self.storage
            .read_json::<StoredMetadata>(&storage_key(key))
            .ok()
            .flatten()
            .map(|stored| stored.metadata)
    }

    fn remove_quietly(&self, key: &str) {
        if let Err(error) = self.storage.remove_item(&storage_key(key)) {
            warn!(event_name = "cache.delete.failed", key, error = %error, "cache remove failed");
        }
    }
}

pub type SharedCache = Arc<KeyValueCache>;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    use super::{KeyValueCache, SetOptions};
    use crate::cache::CacheError;
    use crate::clock::ManualClock;
    use crate::storage::{LocalStorage, MemoryMedium};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        a: u32,
    }

    fn fixture() -> (Arc<ManualClock>, KeyValueCache) {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let clock = Arc::new(ManualClock::new(start));
        let cache = KeyValueCache::new(LocalStorage::in_memory(), clock.clone());
        (clock, cache)
    }

    #[test]
    fn entry_expires_after_ttl_elapses() {
        let (clock, cache) = fixture();
        cache.set("k", &Payload { a: 1 }, Duration::milliseconds(1_000), SetOptions::new()).expect("set");

        clock.advance(Duration::milliseconds(999));
        assert_eq!(cache.get::<Payload>("k"), Some(Payload { a: 1 }));

        clock.advance(Duration::milliseconds(101));
        assert_eq!(cache.get::<Payload>("k"), None);
        assert!(!cache.keys().contains(&"k".to_string()), "expired entry is removed on read");
    }

    #[test]
    fn zero_ttl_never_expires() {
        let (clock, cache) = fixture();
        cache.set("static", &Payload { a: 7 }, Duration::zero(), SetOptions::new()).expect("set");

        clock.advance(Duration::days(3_650));
        assert_eq!(cache.get::<Payload>("static"), Some(Payload { a: 7 }));
    }

    #[test]
    fn access_metadata_is_monotonic() {
        let (clock, cache) = fixture();
        cache.set("k", &Payload { a: 1 }, Duration::hours(1), SetOptions::new()).expect("set");

        let mut last_count = 0;
        let mut last_seen = cache.metadata("k").expect("metadata").last_accessed;
        for _ in 0..5 {
            clock.advance(Duration::seconds(1));
            let entry = cache.get_entry("k").expect("hit");
            assert!(entry.metadata.access_count > last_count);
            assert!(entry.metadata.last_accessed >= last_seen);
            last_count = entry.metadata.access_count;
            last_seen = entry.metadata.last_accessed;
        }
        assert_eq!(last_count, 5);
    }

    #[test]
    fn tags_and_sources_are_searchable() {
        let (_, cache) = fixture();
        cache
            .set(
                "schedule_general",
                &Payload { a: 1 },
                Duration::hours(24),
                SetOptions::new().with_tag("fee_schedule").with_source("remote"),
            )
            .expect("set");
        cache
            .set(
                "exemptions_general",
                &Payload { a: 2 },
                Duration::hours(24),
                SetOptions::new().with_tag("exemptions").with_source("static"),
            )
            .expect("set");

        assert_eq!(cache.find_by_tag("fee_schedule"), vec!["schedule_general"]);
        assert_eq!(cache.find_by_source("static"), vec!["exemptions_general"]);
        assert!(cache.find_by_tag("missing").is_empty());
    }

    #[test]
    fn quota_exhaustion_cleans_expired_entries_and_retries() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let clock = Arc::new(ManualClock::new(start));
        let cache = KeyValueCache::new(LocalStorage::new(MemoryMedium::with_quota(600)), clock.clone());

        let blob = "x".repeat(200);
        cache.set("old", &blob, Duration::seconds(1), SetOptions::new()).expect("first write fits");
        clock.advance(Duration::seconds(5));

        cache.set("new", &blob, Duration::hours(1), SetOptions::new()).expect("retry after cleanup");
        assert!(cache.has("new"));
        assert!(!cache.keys().contains(&"old".to_string()));
    }

    #[test]
    fn quota_exhaustion_without_expired_entries_is_reported() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let clock = Arc::new(ManualClock::new(start));
        let cache = KeyValueCache::new(LocalStorage::new(MemoryMedium::with_quota(700)), clock);

        let blob = "x".repeat(200);
        cache.set("a", &blob, Duration::hours(1), SetOptions::new()).expect("fits");
        let error = cache.set("b", &blob, Duration::hours(1), SetOptions::new()).expect_err("full");
        assert!(matches!(error, CacheError::Storage(ref inner) if inner.is_quota_exceeded()));
    }

    #[test]
    fn corrupted_entries_read_as_miss_and_are_dropped() {
        let storage = LocalStorage::in_memory();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let cache = KeyValueCache::new(storage.clone(), Arc::new(ManualClock::new(start)));
        storage.set_item("enhanced_cache_bad", "{oops").expect("seed");

        assert_eq!(cache.get::<Payload>("bad"), None);
        assert_eq!(storage.get_item("enhanced_cache_bad").expect("read"), None);
    }

    #[test]
    fn statistics_track_hits_misses_and_groupings() {
        let (clock, cache) = fixture();
        cache
            .set("a", &Payload { a: 1 }, Duration::seconds(10), SetOptions::new().with_source("remote"))
            .expect("set");
        clock.advance(Duration::seconds(1));
        cache
            .set("b", &Payload { a: 2 }, Duration::zero(), SetOptions::new().with_tag("static"))
            .expect("set");

        let _ = cache.get::<Payload>("a");
        let _ = cache.get::<Payload>("a");
        let _ = cache.get::<Payload>("missing");
        clock.advance(Duration::seconds(30));

        let stats = cache.statistics();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.miss_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.average_access_count - 1.0).abs() < 1e-9);
        assert_eq!(stats.entries_by_source.get("remote"), Some(&1));
        assert_eq!(stats.entries_by_source.get("unknown"), Some(&1));
        assert_eq!(stats.entries_by_tag.get("static"), Some(&1));
        assert!(stats.oldest_entry < stats.newest_entry);
    }

    #[test]
    fn entries_near_expiry_are_queued_once() {
        let (clock, cache) = fixture();
        cache.set("k", &Payload { a: 1 }, Duration::seconds(100), SetOptions::new()).expect("set");

        let _ = cache.get::<Payload>("k");
        assert!(cache.queued_refreshes().is_empty(), "fresh entry is not queued");

        clock.advance(Duration::seconds(85));
        let _ = cache.get::<Payload>("k");
        let _ = cache.get::<Payload>("k");
        assert_eq!(cache.queued_refreshes(), vec!["k".to_string()]);
    }

    #[test]
    fn clear_only_touches_cache_namespace() {
        let storage = LocalStorage::in_memory();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid date");
        let cache = KeyValueCache::new(storage.clone(), Arc::new(ManualClock::new(start)));
        storage.set_item("user_profile_u1", "{}").expect("seed");
        cache.set("k", &Payload { a: 1 }, Duration::zero(), SetOptions::new()).expect("set");

        cache.clear();
        assert!(cache.keys().is_empty());
        assert!(storage.get_item("user_profile_u1").expect("read").is_some());
    }
}
