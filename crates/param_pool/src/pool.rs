//! 固定容量的可复用记录池。
//!
//! 所有槽位在构造时一次性分配，以 [`PoolItem`] (可廉价克隆的共享句柄) 形式借出。
//! 最后一个句柄释放后槽位重新可用；是否空闲只由池在自身互斥锁下查看强引用计数决定。

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use contracts::{EngineError, EngineResult, FullParams, StatsSnapshot};

/// 可放入 [`ParameterPool`] 的记录
pub trait Poolable: Default + Send + Sync + 'static {
    /// 复用前恢复为空记录
    fn reset(&mut self);
}

impl Poolable for FullParams {
    fn reset(&mut self) {
        FullParams::reset(self);
    }
}

impl Poolable for StatsSnapshot {
    fn reset(&mut self) {
        StatsSnapshot::reset(self);
    }
}

struct PoolEntry<T> {
    slot: usize,
    value: RwLock<T>,
}

/// 池槽位的共享句柄
///
/// 克隆共享同一记录，所有克隆释放后槽位归还给池。
pub struct PoolItem<T> {
    entry: Arc<PoolEntry<T>>,
}

impl<T> Clone for PoolItem<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<T> PoolItem<T> {
    /// 所属池内的槽位索引
    #[inline]
    pub fn slot(&self) -> usize {
        self.entry.slot
    }

    /// 共享读访问
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.entry
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 独占写访问
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.entry
            .value
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 该槽位存活句柄数 (不含池自身引用)
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.entry) - 1
    }

    /// 两个句柄是否指向同一槽位
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolItem")
            .field("slot", &self.entry.slot)
            .field("value", &*self.read())
            .finish()
    }
}

/// 固定容量池
pub struct ParameterPool<T> {
    name: &'static str,
    entries: Mutex<Vec<Arc<PoolEntry<T>>>>,
    capacity: usize,
}

impl<T: Poolable> fmt::Debug for ParameterPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl<T: Poolable> ParameterPool<T> {
    /// 预分配 `capacity` 条记录
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let entries = (0..capacity)
            .map(|slot| {
                Arc::new(PoolEntry {
                    slot,
                    value: RwLock::new(T::default()),
                })
            })
            .collect();
        Self {
            name,
            entries: Mutex::new(entries),
            capacity,
        }
    }

    /// 池名称 (指标标签)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 槽位总数
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 取出一个空闲槽位，并重置为空记录
    ///
    /// 不阻塞；所有槽位均被引用时返回 `None`。
    pub fn try_acquire(&self) -> Option<PoolItem<T>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.iter().find(|e| Arc::strong_count(e) == 1)?;
        let item = PoolItem {
            entry: Arc::clone(entry),
        };
        drop(entries);

        item.write().reset();
        Some(item)
    }

    /// Like [`try_acquire`](Self::try_acquire), reporting exhaustion as an error
    ///
    /// # Errors
    /// `EngineError::ResourceExhausted` when no slot is free
    pub fn acquire(&self) -> EngineResult<PoolItem<T>> {
        match self.try_acquire() {
            Some(item) => Ok(item),
            None => {
                metrics::counter!("isp3a_pool_exhausted_total", "pool" => self.name).increment(1);
                tracing::warn!(pool = self.name, capacity = self.capacity, "pool exhausted");
                Err(EngineError::exhausted(format!("{} pool", self.name)))
            }
        }
    }

    /// 空闲槽位数
    pub fn available(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().filter(|e| Arc::strong_count(e) == 1).count()
    }

    /// 被引用的槽位数
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ExposureUpdate;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool: ParameterPool<FullParams> = ParameterPool::new("params", 2);
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        assert_ne!(a.slot(), b.slot());
        assert!(pool.try_acquire().is_none());
        assert!(matches!(
            pool.acquire(),
            Err(EngineError::ResourceExhausted { .. })
        ));

        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_debug_reports_free_slots() {
        let pool: ParameterPool<StatsSnapshot> = ParameterPool::new("stats", 3);
        let _held = pool.try_acquire().unwrap();
        let text = format!("{pool:?}");
        assert!(text.contains("\"stats\""));
        assert!(text.contains("available: 2"));
    }

    #[test]
    fn test_clone_keeps_slot_alive() {
        let pool: ParameterPool<FullParams> = ParameterPool::new("params", 1);
        let item = pool.try_acquire().unwrap();
        let shared = item.clone();
        assert_eq!(item.ref_count(), 2);

        drop(item);
        assert!(pool.try_acquire().is_none());
        drop(shared);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn test_reused_slot_is_reset() {
        let pool: ParameterPool<FullParams> = ParameterPool::new("params", 1);
        {
            let item = pool.try_acquire().unwrap();
            let mut params = item.write();
            params.frame_id = 42;
            params.set_exposure(ExposureUpdate::linear(42, 4.0, 0.02));
        }
        let item = pool.try_acquire().unwrap();
        assert_eq!(item.read().frame_id, 0);
        assert!(item.read().exposure.is_none());
    }

    #[test]
    fn test_concurrent_acquire_never_shares_slot() {
        let pool: Arc<ParameterPool<StatsSnapshot>> = Arc::new(ParameterPool::new("stats", 4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.try_acquire())
            })
            .collect();
        let items: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let mut slots: Vec<_> = items.iter().map(PoolItem::slot).collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), 4);
        assert_eq!(pool.in_use(), 4);
    }
}
