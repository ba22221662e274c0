//! Tier cache: one bounded, TTL-expiring cache per tier sitting in front of
//! the vector gateway. Grounded on the corpus's multi-tier `moka`-backed
//! cache manager idiom: per-tier `moka::sync::Cache`, atomic hit/miss/
//! eviction counters, and a self-tuning resize pass driven by the observed
//! hit rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use moka::sync::Cache;
use tme_core::Tier;
use uuid::Uuid;

use crate::types::Memory;

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time counters for a single tier's cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entry_count: u64,
    pub capacity: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.entry_count as f64 / self.capacity as f64
        }
    }
}

/// `ttl` is applied as an idle timeout (`time_to_idle`), not a fixed
/// lifetime: `updateAgeOnGet` requires that reading an entry refresh its
/// recency, which `time_to_live` does not do (it expires a fixed duration
/// after insertion regardless of reads).
fn build_cache(capacity: u64, ttl: Option<Duration>) -> Cache<Uuid, Arc<Memory>> {
    let mut builder = Cache::builder().max_capacity(capacity);
    if let Some(ttl) = ttl {
        builder = builder.time_to_idle(ttl);
    }
    builder.build()
}

struct TierCache {
    cache: RwLock<Cache<Uuid, Arc<Memory>>>,
    counters: TierCounters,
    capacity: AtomicU64,
    ttl: Option<Duration>,
}

impl TierCache {
    fn new(capacity: u64, ttl: Option<Duration>) -> Self {
        Self {
            cache: RwLock::new(build_cache(capacity, ttl)),
            counters: TierCounters::default(),
            capacity: AtomicU64::new(capacity),
            ttl,
        }
    }

    fn get(&self, id: &Uuid) -> Option<Arc<Memory>> {
        match self.cache.read().expect("cache lock poisoned").get(id) {
            Some(v) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, memory: Arc<Memory>) {
        self.cache.read().expect("cache lock poisoned").insert(memory.id, memory);
    }

    fn invalidate(&self, id: &Uuid) {
        let guard = self.cache.read().expect("cache lock poisoned");
        if guard.contains_key(id) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        guard.invalidate(id);
    }

    fn clear(&self) {
        self.cache.read().expect("cache lock poisoned").invalidate_all();
    }

    /// Force this tier's cache to run its pending maintenance (expired
    /// idle-timeout entries, size-based eviction) immediately rather than
    /// lazily on the next read/write.
    fn purge_stale(&self) {
        self.cache.read().expect("cache lock poisoned").run_pending_tasks();
    }

    /// A snapshot of every memory currently resident in this tier's cache.
    fn entries(&self) -> Vec<Arc<Memory>> {
        self.cache.read().expect("cache lock poisoned").iter().map(|(_, v)| v).collect()
    }

    fn stats(&self) -> CacheStats {
        let guard = self.cache.read().expect("cache lock poisoned");
        guard.run_pending_tasks();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entry_count: guard.entry_count(),
            capacity: self.capacity.load(Ordering::Relaxed),
        }
    }

    /// Rebuild the underlying cache at a new capacity. Moka's sync cache has
    /// no runtime capacity knob, so resizing means swapping in a fresh
    /// cache; entries resident at the old capacity are dropped and will be
    /// refetched from the gateway on next access.
    fn resize(&self, new_capacity: u64) {
        let mut guard = self.cache.write().expect("cache lock poisoned");
        *guard = build_cache(new_capacity, self.ttl);
        self.capacity.store(new_capacity, Ordering::Relaxed);
    }
}

/// Per-tier cache set. `get`/`put`/`invalidate` operate on whichever tier a
/// memory currently belongs to; moving a memory between tiers is the
/// caller's job (invalidate the old tier, put into the new one).
pub struct TierCacheSet {
    core: TierCache,
    active: TierCache,
    background: TierCache,
}

impl TierCacheSet {
    pub fn new(core_capacity: u64, active_capacity: u64, background_capacity: u64, default_ttl: Duration) -> Self {
        Self {
            core: TierCache::new(core_capacity, None),
            active: TierCache::new(active_capacity, Some(default_ttl)),
            background: TierCache::new(background_capacity, Some(default_ttl)),
        }
    }

    fn tier_cache(&self, tier: Tier) -> &TierCache {
        match tier {
            Tier::Core => &self.core,
            Tier::Active => &self.active,
            Tier::Background => &self.background,
        }
    }

    pub fn get(&self, tier: Tier, id: &Uuid) -> Option<Arc<Memory>> {
        self.tier_cache(tier).get(id)
    }

    pub fn put(&self, tier: Tier, memory: Arc<Memory>) {
        self.tier_cache(tier).put(memory);
    }

    /// Remove an id from a single tier's cache, leaving the others alone.
    pub fn invalidate(&self, tier: Tier, id: &Uuid) {
        self.tier_cache(tier).invalidate(id);
    }

    /// Remove an id from every tier's cache. Used on delete and on tier
    /// transition, where the id's old tier is not necessarily known by the
    /// caller.
    pub fn invalidate_everywhere(&self, id: &Uuid) {
        self.core.invalidate(id);
        self.active.invalidate(id);
        self.background.invalidate(id);
    }

    pub fn clear_all(&self) {
        self.core.clear();
        self.active.clear();
        self.background.clear();
    }

    /// Run each tier's pending cache maintenance immediately. Intended to
    /// run once per lifecycle housekeeping tick, alongside `auto_tune`.
    pub fn purge_stale(&self) {
        self.core.purge_stale();
        self.active.purge_stale();
        self.background.purge_stale();
    }

    /// Every memory currently cache-resident for `owner_id` in the core
    /// tier, for the optional core-tier fast path in `MemoryService::
    /// retrieve`.
    pub fn core_entries_for_owner(&self, owner_id: &str) -> Vec<Arc<Memory>> {
        self.core.entries().into_iter().filter(|m| m.owner_id == owner_id).collect()
    }

    pub fn stats(&self, tier: Tier) -> CacheStats {
        self.tier_cache(tier).stats()
    }

    /// Resize a tier's cache based on its own observed hit rate and fill
    /// ratio: shrink an under-used cache, grow a saturated and effective
    /// one. Intended to run once per lifecycle cycle, not per request.
    pub fn auto_tune(&self, tier: Tier) -> Option<u64> {
        let cache = self.tier_cache(tier);
        let stats = cache.stats();
        let current = stats.capacity;
        if current == 0 {
            return None;
        }

        let new_capacity = if stats.hit_rate() < 0.5 && current > 100 {
            ((current as f64) * 0.8) as u64
        } else if stats.hit_rate() > 0.8 && stats.fill_ratio() > 0.9 {
            ((current as f64) * 1.2) as u64
        } else {
            current
        };

        if new_capacity == current {
            return None;
        }
        cache.resize(new_capacity);
        Some(new_capacity)
    }
}
