//! Bounded cache of completed statistics for pull-style consumers.
//!
//! Items move `cached -> checked out -> released`. The cache owns `capacity`
//! slots shared by both sets:
//! - a free slot is used first
//! - otherwise the oldest cached item nobody has claimed is evicted
//! - when every slot is checked out the new item is dropped
//!
//! An item a caller holds is never recycled behind its back.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use contracts::{EngineError, EngineResult};
use slab::Slab;

/// Item checked out of a [`StatsCache`]
///
/// Hand it back with [`StatsCache::release`].
#[derive(Debug)]
pub struct CheckedOut<T> {
    key: usize,
    epoch: u64,
    item: T,
}

impl<T> CheckedOut<T> {
    /// Cached item
    pub fn item(&self) -> &T {
        &self.item
    }
}

struct CacheState<T> {
    cached: VecDeque<T>,
    checked_out: Slab<T>,
    stopped: bool,
    /// Bumped on every stop so handles from a previous run are ignored
    epoch: u64,
}

impl<T> CacheState<T> {
    fn occupied(&self) -> usize {
        self.cached.len() + self.checked_out.len()
    }
}

/// Consumer-waitable bounded FIFO
pub struct StatsCache<T> {
    capacity: usize,
    state: Mutex<CacheState<T>>,
    available: Condvar,
}

impl<T: Clone> fmt::Debug for StatsCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("StatsCache")
            .field("capacity", &self.capacity)
            .field("cached", &state.cached.len())
            .field("checked_out", &state.checked_out.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

impl<T: Clone> StatsCache<T> {
    /// Create a stopped cache with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState {
                cached: VecDeque::with_capacity(capacity),
                checked_out: Slab::with_capacity(capacity),
                stopped: true,
                epoch: 0,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept pushes and acquires again
    pub fn start(&self) {
        self.lock().stopped = false;
    }

    /// Drop everything and wake every waiter with `Stopped`
    pub fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        state.epoch += 1;
        state.cached.clear();
        state.checked_out.clear();
        drop(state);
        self.available.notify_all();
    }

    /// Whether the cache is stopped
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Insert a completed item
    ///
    /// Returns `false` when the item was dropped (cache stopped or every slot
    /// checked out).
    pub fn push(&self, item: T) -> bool {
        let mut state = self.lock();
        if state.stopped {
            return false;
        }

        if state.occupied() >= self.capacity {
            if state.cached.pop_front().is_some() {
                metrics::counter!("isp3a_stats_cache_evicted_total").increment(1);
                tracing::warn!(
                    capacity = self.capacity,
                    "stats cache full, evicted oldest unclaimed item"
                );
            } else {
                metrics::counter!("isp3a_stats_cache_dropped_total").increment(1);
                tracing::warn!(
                    checked_out = state.checked_out.len(),
                    "every stats cache slot is checked out, dropping new item"
                );
                return false;
            }
        }

        state.cached.push_back(item);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Wait for the oldest cached item
    ///
    /// `None` waits until an item arrives or the cache stops.
    ///
    /// # Errors
    /// - `EngineError::Stopped` when the cache is or becomes stopped
    /// - `EngineError::Timeout` when `timeout` elapses first
    pub fn acquire(&self, timeout: Option<Duration>) -> EngineResult<CheckedOut<T>> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut state = self.lock();

        loop {
            if state.stopped {
                return Err(EngineError::Stopped);
            }
            if let Some(item) = state.cached.pop_front() {
                let key = state.checked_out.insert(item.clone());
                return Ok(CheckedOut {
                    key,
                    epoch: state.epoch,
                    item,
                });
            }

            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EngineError::Timeout {
                            op: "acquire_stats",
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Return a checked-out item, freeing its slot
    ///
    /// Handles acquired before the last `stop` are ignored.
    pub fn release(&self, handle: CheckedOut<T>) {
        let mut state = self.lock();
        if handle.epoch == state.epoch && state.checked_out.contains(handle.key) {
            state.checked_out.remove(handle.key);
        }
    }

    /// Items waiting to be acquired
    pub fn cached_len(&self) -> usize {
        self.lock().cached.len()
    }

    /// Items acquired and not yet released
    pub fn checked_out_len(&self) -> usize {
        self.lock().checked_out.len()
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
