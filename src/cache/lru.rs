//! LRU (Least Recently Used) cache for decompressed blocks.
//!
//! Entries live in a slot arena; recency order is a doubly linked list of
//! slot indices, so touching and evicting never move values around.

use std::collections::HashMap;
use std::hash::Hash;

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }

    /// Reset all statistics to zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded LRU cache holding at most `capacity` entries.
///
/// Not synchronized: each seeker owns its own cache.
#[derive(Debug)]
pub struct BlockCache<K, V> {
    capacity: usize,
    slots: Vec<Slot<K, V>>,
    map: HashMap<K, usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V> BlockCache<K, V> {
    /// Create a cache holding up to `capacity` entries (at least one).
    ///
    /// # Examples
    ///
    /// ```
    /// use blocktable::cache::BlockCache;
    ///
    /// let mut cache: BlockCache<u64, Vec<u8>> = BlockCache::new(16);
    /// cache.insert(0, vec![1, 2, 3]);
    /// assert!(cache.get(&0).is_some());
    /// ```
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            map: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.stats.lookups += 1;
        match self.map.get(key).copied() {
            Some(idx) => {
                self.stats.hits += 1;
                self.touch(idx);
                Some(&self.slots[idx].value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Look up `key`, loading and inserting it on a miss.
    ///
    /// A failed load leaves the cache unchanged.
    pub fn get_or_try_insert_with<E, F>(&mut self, key: K, load: F) -> Result<&V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        self.stats.lookups += 1;
        let idx = match self.map.get(&key).copied() {
            Some(idx) => {
                self.stats.hits += 1;
                self.touch(idx);
                idx
            }
            None => {
                self.stats.misses += 1;
                let value = load()?;
                self.insert_slot(key, value)
            }
        };
        Ok(&self.slots[idx].value)
    }

    /// Insert or replace `key`, evicting the least recently used entry when
    /// the cache is full.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            self.slots[idx].value = value;
            self.touch(idx);
            self.stats.insertions += 1;
            return;
        }
        self.insert_slot(key, value);
    }

    fn insert_slot(&mut self, key: K, value: V) -> usize {
        self.stats.insertions += 1;

        let idx = match self.tail {
            // Reuse the least recently used slot
            Some(idx) if self.slots.len() >= self.capacity => {
                self.unlink(idx);
                let slot = &mut self.slots[idx];
                let old_key = std::mem::replace(&mut slot.key, key.clone());
                slot.value = value;
                self.map.remove(&old_key);
                self.stats.evictions += 1;
                log::debug!("Evicted block from cache ({} entries)", self.capacity);
                idx
            }
            _ => {
                self.slots.push(Slot { key: key.clone(), value, prev: None, next: None });
                self.slots.len() - 1
            }
        };

        self.map.insert(key, idx);
        self.push_front(idx);
        idx
    }

    /// Move `idx` to the most recently used position.
    fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[idx].prev = None;
        self.slots[idx].next = None;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = None;
        self.slots[idx].next = self.head;
        if let Some(h) = self.head {
            self.slots[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    /// Check whether `key` is cached, without touching it.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Reset cache statistics to zero.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.map.clear();
        self.head = None;
        self.tail = None;
    }

    /// Get the cache capacity in entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
