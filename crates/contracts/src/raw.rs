//! Raw 采集缓冲与同步组 (StreamAligner 输入/输出)

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// 采集通道上送达的单个 raw 缓冲
#[derive(Debug, Clone)]
pub struct RawBuffer {
    /// 采集通道索引 (0 = 长曝光, 1 = 中/短, 2 = 短)
    pub channel: usize,
    /// 硬件帧序号
    pub sequence: u64,
    /// 硬件缓冲描述符，回收时归还
    pub descriptor: u32,
    /// 帧数据 (零拷贝)
    pub data: Bytes,
}

impl RawBuffer {
    /// Create a buffer without payload
    pub fn new(channel: usize, sequence: u64, descriptor: u32) -> Self {
        Self {
            channel,
            sequence,
            descriptor,
            data: Bytes::new(),
        }
    }
}

/// Buffers of every required channel sharing one sequence
#[derive(Debug, Clone)]
pub struct SyncGroup {
    /// 共同的帧序号
    pub sequence: u64,
    /// 每个所需通道一个缓冲，按通道索引排序
    pub buffers: Vec<RawBuffer>,
}

impl SyncGroup {
    /// Number of channels in the group
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the group holds no buffer
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Outcome of a readback request, reported to the raw-buffer consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadbackReport {
    /// Sequence read back
    pub sequence: u64,
    /// 请求的硬件 pass 总数 (1-3)
    pub passes: u8,
    /// Channels in the group
    pub channels: u8,
}

/// 每帧 readback pass 上限
pub const MAX_READBACK_PASSES: u8 = 3;
