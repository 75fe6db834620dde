//! Result cache - computed analyses keyed by fingerprint.
//!
//! # Key Concepts
//! - Fingerprint: deterministic key for a computation (see [`Fingerprint`])
//! - Hits: how many times an entry was served or re-put within its TTL; starts at 1
//! - Expiry: entries past their TTL are a miss and are purged on access or by the sweeper
//! - Capacity: when full, the soonest-to-expire fifth is evicted before inserting
//!
//! Reads and writes for one fingerprint are serialized; different fingerprints
//! never contend, except that creating a new entry takes a cache-wide
//! admission lock so the capacity bound holds under concurrent misses.

mod fingerprint;
mod sweeper;

pub use fingerprint::{AnalysisKind, Fingerprint};
pub use sweeper::spawn_sweeper;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::clock::{deadline, ClockRef};
use crate::config::CacheConfig;
use crate::store::{decode, encode, KeyedLocks, StoreError, StoreRef};

const KEY_PREFIX: &str = "analysis:";

/// Fraction of entries dropped when the cache is full.
const EVICTION_DIVISOR: usize = 5;

/// A cached analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisCacheEntry {
    pub fingerprint: String,
    pub payload: Value,
    /// Always >= 1
    pub hits: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AnalysisCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Fingerprint-keyed cache over a [`KvStore`](crate::store::KvStore).
pub struct ResultCache {
    store: StoreRef,
    clock: ClockRef,
    locks: KeyedLocks,
    computing: KeyedLocks,
    ttl: Duration,
    capacity: usize,

    /// Entry count, held while admitting a new entry. `None` until seeded
    /// from the store. Entries the store expires on its own are not
    /// subtracted, so this is an upper bound; it is recounted from the
    /// store whenever it reaches capacity and on every sweep.
    admission: Mutex<Option<usize>>,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResultCache {
    pub fn new(store: StoreRef, clock: ClockRef, config: &CacheConfig) -> Self {
        Self {
            store,
            clock,
            locks: KeyedLocks::new(),
            computing: KeyedLocks::new(),
            ttl: config.ttl,
            capacity: config.capacity.max(1),
            admission: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn store_key(fp: &Fingerprint) -> String {
        format!("{}{}", KEY_PREFIX, fp.key())
    }

    /// Read the live entry, purging it if it has expired. Caller holds the key lock.
    async fn load(&self, key: &str) -> Result<Option<AnalysisCacheEntry>, StoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let entry: AnalysisCacheEntry = decode(key, &raw)?;
        if entry.is_expired(self.clock.now()) {
            if self.store.delete(key).await? {
                self.forget_one().await;
            }
            self.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache entry expired on access");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn forget_one(&self) {
        if let Some(n) = self.admission.lock().await.as_mut() {
            *n = n.saturating_sub(1);
        }
    }

    async fn save(&self, key: &str, entry: &AnalysisCacheEntry) -> Result<(), StoreError> {
        let ttl = entry.remaining(self.clock.now());
        self.store.set(key, &encode(key, entry)?, Some(ttl)).await
    }

    /// Exclusive right to compute `fp`. Held from the lookup until the result
    /// is put, so concurrent misses on one fingerprint compute (and bill) once:
    /// later callers wait and then find the entry.
    pub async fn compute_guard(&self, fp: &Fingerprint) -> OwnedMutexGuard<()> {
        self.computing.lock(fp.key()).await
    }

    /// Peek at an entry without counting a hit.
    pub async fn get(&self, fp: &Fingerprint) -> Result<Option<AnalysisCacheEntry>, StoreError> {
        let key = Self::store_key(fp);
        let _guard = self.locks.lock(&key).await;
        self.load(&key).await
    }

    /// Serve a cached entry, incrementing its hit count. `None` on miss.
    pub async fn record_hit(
        &self,
        fp: &Fingerprint,
    ) -> Result<Option<AnalysisCacheEntry>, StoreError> {
        let key = Self::store_key(fp);
        let _guard = self.locks.lock(&key).await;

        let Some(mut entry) = self.load(&key).await? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fp, "Cache miss");
            return Ok(None);
        };

        entry.hits = entry.hits.saturating_add(1);
        self.save(&key, &entry).await?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fp, hits = entry.hits, "Cache hit");
        Ok(Some(entry))
    }

    /// Store a payload.
    ///
    /// If a live entry exists its payload is replaced and `hits` increments;
    /// the expiry is unchanged. Otherwise a new entry is created with `hits = 1`.
    pub async fn put(
        &self,
        fp: &Fingerprint,
        payload: Value,
    ) -> Result<AnalysisCacheEntry, StoreError> {
        let key = Self::store_key(fp);
        let _guard = self.locks.lock(&key).await;

        if let Some(mut entry) = self.load(&key).await? {
            entry.hits = entry.hits.saturating_add(1);
            entry.payload = payload;
            self.save(&key, &entry).await?;
            return Ok(entry);
        }

        let mut count = self.admission.lock().await;
        let live = match *count {
            Some(n) if n < self.capacity => n,
            _ => self.make_room().await?,
        };

        let now = self.clock.now();
        let entry = AnalysisCacheEntry {
            fingerprint: fp.key().to_string(),
            payload,
            hits: 1,
            created_at: now,
            expires_at: deadline(now, self.ttl),
        };
        self.save(&key, &entry).await?;
        *count = Some(live + 1);
        debug!(fingerprint = %fp, kind = %fp.kind(), "Cache entry created");
        Ok(entry)
    }

    async fn entries(&self) -> Result<Vec<(String, AnalysisCacheEntry)>, StoreError> {
        let raw = self.store.scan_prefix(KEY_PREFIX).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            match decode::<AnalysisCacheEntry>(&key, &value) {
                Ok(entry) => entries.push((key, entry)),
                Err(e) => {
                    warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                    self.store.delete(&key).await?;
                }
            }
        }
        Ok(entries)
    }

    /// Recount the stored entries and evict the soonest-to-expire fifth when
    /// at capacity. Returns the live count left. Caller holds `admission`.
    async fn make_room(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries().await?;
        if entries.len() < self.capacity {
            return Ok(entries.len());
        }

        entries.sort_by_key(|(_, e)| e.expires_at);
        let count = (entries.len() / EVICTION_DIVISOR).max(1);
        for (key, _) in entries.iter().take(count) {
            self.store.delete(key).await?;
        }
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
        info!(
            evicted = count,
            capacity = self.capacity,
            "Result cache at capacity, evicted soonest-to-expire entries"
        );
        Ok(entries.len() - count)
    }

    /// Remove every expired entry. Returns how many were removed.
    ///
    /// Only `analysis:` keys are touched and counted; other records sharing
    /// the store are swept by their owners.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let mut count = self.admission.lock().await;
        let now = self.clock.now();
        let mut removed = 0;
        let mut live = 0;
        for (key, entry) in self.entries().await? {
            if !entry.is_expired(now) {
                live += 1;
            } else if self.store.delete(&key).await? {
                removed += 1;
            }
        }
        removed += self.store.purge_expired(KEY_PREFIX).await?;
        *count = Some(live);
        drop(count);

        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        self.locks.prune();
        self.computing.prune();
        Ok(removed)
    }

    /// Number of live entries.
    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.store.scan_prefix(KEY_PREFIX).await?.len())
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await.unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{KvStore, MemoryStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Memory store that counts prefix scans.
    struct ScanCounting {
        inner: MemoryStore,
        scans: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for ScanCounting {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
            self.inner.set(key, value, ttl).await
        }
        async fn incr(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.incr(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.expire(key, ttl).await
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
            self.inner.ttl(key).await
        }
        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }
        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.scan_prefix(prefix).await
        }
        async fn purge_expired(&self, prefix: &str) -> Result<usize, StoreError> {
            self.inner.purge_expired(prefix).await
        }
    }

    fn cache_with(capacity: usize) -> (ResultCache, ManualClock) {
        let clock = ManualClock::starting_now();
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let store = Arc::new(MemoryStore::new(Arc::clone(&clock_ref)));
        let config = CacheConfig {
            capacity,
            ..CacheConfig::default()
        };
        (ResultCache::new(store, clock_ref, &config), clock)
    }

    #[tokio::test]
    async fn test_put_creates_then_increments() {
        let (cache, _) = cache_with(100);
        let fp = Fingerprint::personal("alice");

        let first = cache.put(&fp, json!({"v": 1})).await.unwrap();
        assert_eq!(first.hits, 1);

        let second = cache.put(&fp, json!({"v": 2})).await.unwrap();
        assert_eq!(second.hits, 2);
        assert_eq!(second.payload, json!({"v": 2}));
        assert_eq!(second.expires_at, first.expires_at);
    }

    #[tokio::test]
    async fn test_record_hit_counts() {
        let (cache, _) = cache_with(100);
        let fp = Fingerprint::matching("alice", "bob");

        assert!(cache.record_hit(&fp).await.unwrap().is_none());
        cache.put(&fp, json!("result")).await.unwrap();

        let hit = cache.record_hit(&fp).await.unwrap().unwrap();
        assert_eq!(hit.hits, 2);
        let hit = cache.record_hit(&fp).await.unwrap().unwrap();
        assert_eq!(hit.hits, 3);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_recreated_at_one() {
        let (cache, clock) = cache_with(100);
        let fp = Fingerprint::personal("alice");
        cache.put(&fp, json!(1)).await.unwrap();
        cache.record_hit(&fp).await.unwrap();

        clock.advance(cache.ttl() + Duration::from_secs(1));
        assert!(cache.get(&fp).await.unwrap().is_none());
        assert!(cache.record_hit(&fp).await.unwrap().is_none());

        let fresh = cache.put(&fp, json!(2)).await.unwrap();
        assert_eq!(fresh.hits, 1);
    }

    #[tokio::test]
    async fn test_entry_just_before_ttl_is_live() {
        let (cache, clock) = cache_with(100);
        let fp = Fingerprint::personal("alice");
        cache.put(&fp, json!(1)).await.unwrap();

        clock.advance(cache.ttl() - Duration::from_secs(1));
        assert_eq!(cache.record_hit(&fp).await.unwrap().unwrap().hits, 2);
    }

    #[tokio::test]
    async fn test_eviction_removes_soonest_to_expire() {
        let (cache, clock) = cache_with(5);
        let mut fps = Vec::new();
        for i in 0..5 {
            let fp = Fingerprint::matching("alice", &format!("target{}", i));
            cache.put(&fp, json!(i)).await.unwrap();
            fps.push(fp);
            clock.advance(Duration::from_secs(10));
        }
        assert_eq!(cache.len().await.unwrap(), 5);

        let newcomer = Fingerprint::matching("alice", "newcomer");
        cache.put(&newcomer, json!("new")).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 5);
        assert!(cache.get(&fps[0]).await.unwrap().is_none());
        assert!(cache.get(&fps[1]).await.unwrap().is_some());
        assert!(cache.get(&newcomer).await.unwrap().is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_only() {
        let (cache, clock) = cache_with(100);
        cache
            .put(&Fingerprint::personal("old"), json!(1))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(60 * 60));
        cache
            .put(&Fingerprint::personal("new"), json!(2))
            .await
            .unwrap();

        clock.advance(cache.ttl() - Duration::from_secs(60 * 30));
        let removed = cache.sweep().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_counts_only_cache_keys() {
        let clock = ManualClock::starting_now();
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let store: StoreRef = Arc::new(MemoryStore::new(Arc::clone(&clock_ref)));
        let cache = ResultCache::new(Arc::clone(&store), clock_ref, &CacheConfig::default());

        cache
            .put(&Fingerprint::personal("alice"), json!(1))
            .await
            .unwrap();
        store
            .set("confirmation:alice", "{}", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        store
            .set("confirmation:bob", "{}", Some(Duration::from_secs(60)))
            .await
            .unwrap();

        clock.advance(cache.ttl() + Duration::from_secs(1));
        assert_eq!(cache.sweep().await.unwrap(), 1);
        assert_eq!(cache.stats().await.expirations, 1);
        assert_eq!(store.purge_expired("confirmation:").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_puts_below_capacity_do_not_rescan() {
        let clock = ManualClock::starting_now();
        let clock_ref: ClockRef = Arc::new(clock.clone());
        let store = Arc::new(ScanCounting {
            inner: MemoryStore::new(Arc::clone(&clock_ref)),
            scans: AtomicUsize::new(0),
        });
        let config = CacheConfig {
            capacity: 3,
            ..CacheConfig::default()
        };
        let cache = ResultCache::new(store.clone(), clock_ref, &config);

        for i in 0..3 {
            let fp = Fingerprint::matching("alice", &format!("target{}", i));
            cache.put(&fp, json!(i)).await.unwrap();
        }
        // One scan to seed the count.
        assert_eq!(store.scans.load(Ordering::SeqCst), 1);

        // Full: the next insert recounts and evicts.
        cache
            .put(&Fingerprint::matching("alice", "target3"), json!(3))
            .await
            .unwrap();
        assert_eq!(store.scans.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_respect_capacity() {
        let (cache, _) = cache_with(5);
        let cache = Arc::new(cache);

        let mut handles = Vec::new();
        for i in 0..40 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let fp = Fingerprint::matching("alice", &format!("target{}", i));
                cache.put(&fp, json!(i)).await.unwrap();
                assert!(cache.len().await.unwrap() <= 5);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(cache.len().await.unwrap(), 5);
        assert_eq!(cache.stats().await.evictions, 35);
    }

    #[tokio::test]
    async fn test_empty_fingerprints_never_share_hits() {
        let (cache, _) = cache_with(100);
        for i in 0..4 {
            let fp = Fingerprint::empty("alice", &format!("corr-{}", i));
            assert_eq!(cache.put(&fp, json!("hi")).await.unwrap().hits, 1);
        }
    }
}
