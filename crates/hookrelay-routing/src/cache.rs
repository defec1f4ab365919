//! Resolution cache.
//!
//! Maps an inbound identifier to its last resolved destination list for a
//! fixed TTL. The catalog stays the source of truth: entries are dropped on
//! explicit invalidation, global flush, expiry on read, or periodic purge.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hookrelay_core::ResolvedDestination;
use serde::Serialize;

use crate::metrics;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Builds the cache key for an inbound identifier.
pub fn cache_key(phone_number_id: &str) -> String {
    format!("phone:{phone_number_id}")
}

/// Source of monotonic time for TTL evaluation.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Useful for exercising expiry.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.origin + offset
    }
}

/// Cache counters for the admin surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
}

/// Identifier → resolved destinations cache.
///
/// `put` takes the invalidation generation observed before the catalog was
/// queried; implementations must drop the write if any invalidation happened
/// since, so a slow lookup cannot re-populate a list that was just
/// invalidated.
#[async_trait]
pub trait ResolutionCache: Send + Sync {
    /// Returns the cached list if present and not expired.
    async fn get(&self, phone_number_id: &str) -> Option<Arc<Vec<ResolvedDestination>>>;

    /// Current invalidation generation.
    async fn generation(&self) -> u64;

    /// Stores a list. Returns `false` if the write was discarded.
    async fn put(
        &self,
        phone_number_id: &str,
        destinations: Vec<ResolvedDestination>,
        observed_generation: u64,
    ) -> bool;

    /// Removes one entry. Returns `true` if an entry was present.
    async fn invalidate(&self, phone_number_id: &str) -> bool;

    /// Removes every entry. Returns the number removed.
    async fn clear(&self) -> usize;

    /// Removes expired entries. Returns the number removed.
    async fn purge_expired(&self) -> usize;

    async fn stats(&self) -> CacheStats;

    /// Keys of live entries, sorted.
    async fn keys(&self) -> Vec<String>;
}

/// A cached entry with TTL support.
///
/// The list is wrapped in `Arc` so hits hand out a complete snapshot without
/// copying, and replacement never exposes a partially written list.
#[derive(Clone, Debug)]
struct CachedEntry {
    data: Arc<Vec<ResolvedDestination>>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) >= self.ttl
    }
}

/// Single-process cache backed by `DashMap`.
pub struct LocalResolutionCache {
    entries: DashMap<String, CachedEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalResolutionCache {
    /// Create a cache with the given TTL and the system clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start background purge of expired entries.
    pub fn start_purge_task(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                interval.tick().await;
                let removed = self.purge_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "Purged expired resolution cache entries");
                }
            }
        })
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();
    }
}

impl Default for LocalResolutionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl ResolutionCache for LocalResolutionCache {
    async fn get(&self, phone_number_id: &str) -> Option<Arc<Vec<ResolvedDestination>>> {
        let key = cache_key(phone_number_id);
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(&key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit();
                return Some(Arc::clone(&entry.data));
            }
            drop(entry);
            self.entries.remove_if(&key, |_, e| e.is_expired(now));
        }

        self.record_miss();
        None
    }

    async fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn put(
        &self,
        phone_number_id: &str,
        destinations: Vec<ResolvedDestination>,
        observed_generation: u64,
    ) -> bool {
        let entry = CachedEntry {
            data: Arc::new(destinations),
            cached_at: self.clock.now(),
            ttl: self.ttl,
        };

        // The shard lock is held across the generation check, so an
        // invalidation either bumps the generation first or removes this
        // entry after it is written.
        match self.entries.entry(cache_key(phone_number_id)) {
            Entry::Occupied(mut occupied) => {
                if self.generation.load(Ordering::SeqCst) != observed_generation {
                    return false;
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                if self.generation.load(Ordering::SeqCst) != observed_generation {
                    return false;
                }
                vacant.insert(entry);
            }
        }
        true
    }

    async fn invalidate(&self, phone_number_id: &str) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(&cache_key(phone_number_id)).is_some()
    }

    async fn clear(&self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            keys: self.entries.len(),
        }
    }

    async fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(name: &str) -> ResolvedDestination {
        ResolvedDestination {
            phone_number_id: "1".into(),
            phone_number: "+1".into(),
            display_name: None,
            app_id: "app".into(),
            app_name: "App".into(),
            business_id: "biz".into(),
            business_name: "Biz".into(),
            destination_id: 1,
            destination_name: name.into(),
            endpoint: "https://example.com/hook".into(),
            priority: 0,
        }
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("542491768952983"), "phone:542491768952983");
    }

    #[tokio::test]
    async fn test_hit_and_miss_counters() {
        let cache = LocalResolutionCache::default();
        assert!(cache.get("1").await.is_none());

        let generation = cache.generation().await;
        assert!(cache.put("1", vec![resolved("A")], generation).await);
        let hit = cache.get("1").await.expect("cached");
        assert_eq!(hit[0].destination_name, "A");

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.keys, 1);
        assert_eq!(cache.keys().await, vec!["phone:1".to_string()]);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = LocalResolutionCache::with_clock(Duration::from_secs(60), clock.clone());
        let generation = cache.generation().await;
        cache.put("1", vec![resolved("A")], generation).await;

        clock.advance(Duration::from_secs(59));
        assert!(cache.get("1").await.is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("1").await.is_none());
        assert_eq!(cache.stats().await.keys, 0);
    }

    #[tokio::test]
    async fn test_purge_expired_removes_only_stale_entries() {
        let clock = Arc::new(ManualClock::new());
        let cache = LocalResolutionCache::with_clock(Duration::from_secs(10), clock.clone());
        let generation = cache.generation().await;
        cache.put("old", vec![resolved("A")], generation).await;
        clock.advance(Duration::from_secs(5));
        cache.put("new", vec![resolved("B")], generation).await;
        clock.advance(Duration::from_secs(6));

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.keys().await, vec!["phone:new".to_string()]);
    }

    #[tokio::test]
    async fn test_put_after_invalidation_is_discarded() {
        let cache = LocalResolutionCache::default();
        let observed = cache.generation().await;

        // Mapping changed while the catalog query was in flight.
        cache.invalidate("1").await;

        assert!(!cache.put("1", vec![resolved("stale")], observed).await);
        assert!(cache.get("1").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = LocalResolutionCache::default();
        let generation = cache.generation().await;
        cache.put("1", vec![resolved("A")], generation).await;
        cache.put("2", vec![resolved("B")], generation).await;

        assert!(cache.invalidate("1").await);
        assert!(!cache.invalidate("1").await);
        assert!(cache.get("1").await.is_none());

        assert_eq!(cache.clear().await, 1);
        assert_eq!(cache.stats().await.keys, 0);
    }
}
