//! Bounded frame-indexed map with floor lookup

use std::collections::{BTreeMap, VecDeque};

/// Frame-keyed map keeping at most `window` entries
///
/// Lookups return the entry with the greatest key not above the query, and
/// fall back to the newest entry when every key is above it. Once anything
/// has been inserted a lookup never misses.
///
/// Eviction follows insertion order, not key order: a late insert of a small
/// key survives until it is the oldest insertion.
#[derive(Debug, Clone)]
pub struct FloorMap<V> {
    entries: BTreeMap<u64, V>,
    /// Keys from oldest to newest insertion
    order: VecDeque<u64>,
    window: usize,
}

impl<V> FloorMap<V> {
    /// Create an empty map; `window` is clamped to at least one entry
    pub fn new(window: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            order: VecDeque::new(),
            window: window.max(1),
        }
    }

    /// Insert or replace the entry of `key`, evicting the oldest insertions beyond the window
    ///
    /// Replacing a key counts as a fresh insertion. Returns the number of evicted entries.
    pub fn insert(&mut self, key: u64, value: V) -> usize {
        if self.entries.insert(key, value).is_some() {
            self.order.retain(|k| *k != key);
        }
        self.order.push_back(key);
        self.evict()
    }

    fn evict(&mut self) -> usize {
        let mut evicted = 0;
        while self.order.len() > self.window {
            if let Some(key) = self.order.pop_front() {
                self.entries.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }

    /// Floor lookup
    pub fn floor(&self, key: u64) -> Option<&V> {
        self.entries
            .range(..=key)
            .next_back()
            .map(|(_, v)| v)
            .or_else(|| self.latest().map(|(_, v)| v))
    }

    /// Most recently inserted entry
    pub fn latest(&self) -> Option<(u64, &V)> {
        let key = *self.order.back()?;
        self.entries.get(&key).map(|v| (key, v))
    }

    /// Change the capacity, evicting immediately if needed
    pub fn set_window(&mut self, window: usize) {
        self.window = window.max(1);
        self.evict();
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Keys in ascending order
    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }
}
