//! Computed table for memoizing diagram operations.
//!
//! Backed by a [HashMap], so there are no collisions and entries only go
//! away on [`Cache::clear`], which the manager calls on garbage collection.

use std::collections::HashMap;
use std::hash::Hash;

pub struct Cache<K, V> {
    map: HashMap<K, V>,
    hits: usize,
    misses: usize,
}

impl<K, V> Default for Cache<K, V> {
    fn default() -> Self {
        Self::new(14)
    }
}

impl<K, V> Cache<K, V> {
    /// Create a new cache with room for `2^bits` entries before it reallocates.
    pub fn new(bits: usize) -> Self {
        Self {
            map: HashMap::with_capacity(1 << bits),
            hits: 0,
            misses: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Drop all entries. Hit and miss statistics are kept.
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<K: Hash + Eq, V: Copy> Cache<K, V> {
    /// Get the cached result, counting the lookup as a hit or a miss.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.map.get(key) {
            Some(&v) => {
                self.hits += 1;
                Some(v)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.map.insert(key, value);
    }
}
