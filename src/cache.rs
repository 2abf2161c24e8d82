//! Read-through caches for derived data.
//!
//! Node positions and link aggregates are expensive to rebuild and change
//! slowly, so both are served from a short-lived cache. Entries expire by
//! age; the link cache is also dropped as soon as the capture set it was
//! built from changes generation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::analysis::locations::LocationSource;
use crate::analysis::types::{LinkAggregate, NodeId, NodeLocation, Timestamp};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicked loader leaves the map itself intact
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct CacheEntry<V> {
    value: V,
    loaded_at: Instant,
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    stats: CacheStats,
}

/// Keyed cache with a fixed time-to-live
pub struct ReadThroughCache<K, V> {
    name: &'static str,
    ttl: Duration,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Return the cached value for `key`, calling `load` when it is missing or stale
    pub fn get_or_load<F>(&self, key: &K, load: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        {
            let mut state = lock(&self.state);
            let fresh = state
                .entries
                .get(key)
                .filter(|e| e.loaded_at.elapsed() < self.ttl)
                .map(|e| e.value.clone());
            if let Some(value) = fresh {
                state.stats.hits += 1;
                return value;
            }
            state.stats.misses += 1;
        }

        // Load outside the lock; a concurrent miss may load twice
        let value = load(key);
        lock(&self.state).entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                loaded_at: Instant::now(),
            },
        );
        value
    }

    pub fn invalidate(&self, key: &K) {
        lock(&self.state).entries.remove(key);
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        log::debug!("Clearing {} cache ({} entries)", self.name, state.entries.len());
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.state).stats
    }
}

impl<K, V> Drop for ReadThroughCache<K, V> {
    fn drop(&mut self) {
        let stats = lock(&self.state).stats;
        if stats.hits + stats.misses > 0 {
            log::debug!(
                "{} cache: {} hits, {} misses",
                self.name,
                stats.hits,
                stats.misses
            );
        }
    }
}

type LocationKey = (NodeId, Option<u64>);

/// Location source wrapped in a read-through cache
pub struct CachedLocations<S> {
    inner: S,
    cache: ReadThroughCache<LocationKey, Option<NodeLocation>>,
}

impl<S: LocationSource> CachedLocations<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: ReadThroughCache::new("location", ttl),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl<S: LocationSource> LocationSource for CachedLocations<S> {
    fn location_of(&self, node: NodeId, as_of: Option<Timestamp>) -> Option<NodeLocation> {
        let key = (node, as_of.map(f64::to_bits));
        self.cache
            .get_or_load(&key, |_| self.inner.location_of(node, as_of))
    }
}

struct LinkSlot {
    generation: u64,
    computed_at: Instant,
    links: Arc<Vec<LinkAggregate>>,
}

/// Single-slot cache for the full link aggregate set
pub struct LinkStatsCache {
    ttl: Duration,
    slot: Mutex<Option<LinkSlot>>,
}

impl LinkStatsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Cached links for `generation`, recomputing when stale or from another generation
    pub fn get_or_compute<F>(&self, generation: u64, compute: F) -> Arc<Vec<LinkAggregate>>
    where
        F: FnOnce() -> Vec<LinkAggregate>,
    {
        let mut slot = lock(&self.slot);
        if let Some(cached) = slot.as_ref() {
            if cached.generation == generation && cached.computed_at.elapsed() < self.ttl {
                return Arc::clone(&cached.links);
            }
        }

        let started = Instant::now();
        let links = Arc::new(compute());
        log::debug!(
            "Recomputed {} link aggregates for generation {} in {:?}",
            links.len(),
            generation,
            started.elapsed()
        );
        *slot = Some(LinkSlot {
            generation,
            computed_at: Instant::now(),
            links: Arc::clone(&links),
        });
        links
    }

    pub fn invalidate(&self) {
        *lock(&self.slot) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::locations::LocationTable;
    use std::cell::Cell;

    #[test]
    fn test_read_through_hits_until_stale() {
        let cache: ReadThroughCache<u32, u32> = ReadThroughCache::new("test", Duration::from_secs(60));
        let loads = Cell::new(0);
        let load = |k: &u32| {
            loads.set(loads.get() + 1);
            k * 2
        };
        assert_eq!(cache.get_or_load(&4, load), 8);
        assert_eq!(cache.get_or_load(&4, load), 8);
        assert_eq!(loads.get(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });

        cache.invalidate(&4);
        cache.get_or_load(&4, load);
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn test_zero_ttl_always_reloads() {
        let cache: ReadThroughCache<u32, u32> = ReadThroughCache::new("test", Duration::ZERO);
        let loads = Cell::new(0);
        for _ in 0..3 {
            cache.get_or_load(&1, |_| {
                loads.set(loads.get() + 1);
                1
            });
        }
        assert_eq!(loads.get(), 3);
    }

    #[test]
    fn test_cached_locations() {
        let table = LocationTable::new(vec![NodeLocation {
            node_id: NodeId(7),
            latitude: 1.0,
            longitude: 2.0,
            as_of: 10.0,
        }]);
        let cached = CachedLocations::new(table, Duration::from_secs(300));
        assert_eq!(cached.location_of(NodeId(7), None).map(|l| l.latitude), Some(1.0));
        assert_eq!(cached.location_of(NodeId(7), None).map(|l| l.latitude), Some(1.0));
        assert!(cached.location_of(NodeId(8), None).is_none());
        assert_eq!(cached.stats(), CacheStats { hits: 1, misses: 2 });
    }

    #[test]
    fn test_link_cache_follows_generation() {
        let cache = LinkStatsCache::new(Duration::from_secs(60));
        let computes = Cell::new(0);
        let compute = || {
            computes.set(computes.get() + 1);
            Vec::new()
        };
        cache.get_or_compute(1, compute);
        cache.get_or_compute(1, compute);
        assert_eq!(computes.get(), 1);
        cache.get_or_compute(2, compute);
        assert_eq!(computes.get(), 2);
        cache.invalidate();
        cache.get_or_compute(2, compute);
        assert_eq!(computes.get(), 3);
    }
}
