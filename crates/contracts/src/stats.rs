//! StatsSnapshot - 采集侧输出
//!
//! 每帧汇总所有算法的硬件原始统计。

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{AlgoType, ResultGroup, ALGO_TYPE_COUNT};

/// 产生统计的硬件模块
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsKind {
    /// ISP 3A 测量统计
    #[default]
    Measurement,
    /// ISP 后处理统计
    Post,
}

impl StatsKind {
    /// Result group computed from this kind of statistics
    pub fn group(self) -> ResultGroup {
        match self {
            StatsKind::Measurement => ResultGroup::Measurement,
            StatsKind::Post => ResultGroup::Other,
        }
    }
}

/// 单个算法的统计
#[derive(Debug, Clone, Default)]
pub struct StatsBlock {
    /// 硬件是否为该帧产生了此统计块
    pub valid: bool,
    /// 不透明的硬件数据
    pub data: Bytes,
}

/// 每帧统计快照
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// 统计所属帧号
    pub frame_id: u64,
    /// 统计来源
    pub kind: StatsKind,
    /// 硬件上报的平均亮度 (0-255)，供曝光启发式使用
    pub mean_luma: f32,
    blocks: [StatsBlock; ALGO_TYPE_COUNT],
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            frame_id: 0,
            kind: StatsKind::Measurement,
            mean_luma: 0.0,
            blocks: std::array::from_fn(|_| StatsBlock::default()),
        }
    }
}

impl StatsSnapshot {
    /// 所有块均无效的快照 (bootstrap pass 输入)
    pub fn invalid(frame_id: u64, kind: StatsKind) -> Self {
        Self {
            frame_id,
            kind,
            ..Self::default()
        }
    }

    /// Set the block of one algorithm
    pub fn set_block(&mut self, algo: AlgoType, data: Bytes) {
        self.blocks[algo.index()] = StatsBlock { valid: true, data };
    }

    /// Block of one algorithm
    pub fn block(&self, algo: AlgoType) -> &StatsBlock {
        &self.blocks[algo.index()]
    }

    /// Whether the block of `algo` is valid
    pub fn is_valid(&self, algo: AlgoType) -> bool {
        self.blocks[algo.index()].valid
    }

    /// Number of valid blocks
    pub fn valid_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.valid).count()
    }

    /// 重置为空状态以便复用
    pub fn reset(&mut self) {
        self.frame_id = 0;
        self.kind = StatsKind::Measurement;
        self.mean_luma = 0.0;
        for block in &mut self.blocks {
            block.valid = false;
            block.data = Bytes::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_snapshot_has_no_valid_blocks() {
        let stats = StatsSnapshot::invalid(7, StatsKind::Post);
        assert_eq!(stats.frame_id, 7);
        assert_eq!(stats.valid_count(), 0);
        assert_eq!(stats.kind.group(), ResultGroup::Other);
    }

    #[test]
    fn test_reset_clears_blocks() {
        let mut stats = StatsSnapshot::default();
        stats.set_block(AlgoType::Awb, Bytes::from_static(&[1, 2, 3]));
        assert!(stats.is_valid(AlgoType::Awb));
        assert!(!stats.is_valid(AlgoType::Ae));

        stats.reset();
        assert!(!stats.is_valid(AlgoType::Awb));
        assert!(stats.block(AlgoType::Awb).data.is_empty());
    }
}
