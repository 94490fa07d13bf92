//! # Param Pool
//!
//! 引擎的内存分配侧：
//! - [`ParameterPool`]: 固定容量、引用计数的记录池
//! - [`StatsCache`]: 有界、消费者可等待的已完成统计缓存
//!
//! 构造完成后两者都不会逐帧分配内存。

mod pool;
mod stats_cache;

pub use pool::{ParameterPool, PoolItem, Poolable};
pub use stats_cache::{CheckedOut, StatsCache};
