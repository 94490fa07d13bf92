//! 硬件帧同步事件

use serde::{Deserialize, Serialize};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameEventKind {
    /// 传感器帧起始
    StartOfFrame,
    /// 其他硬件通知，pipeline 忽略
    Other,
}

/// 硬件事件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub kind: FrameEventKind,
    /// 硬件帧计数
    pub frame_id: u64,
    /// 单调时间戳 (纳秒)
    pub timestamp_ns: u64,
}

impl FrameEvent {
    /// 帧起始事件
    pub fn sof(frame_id: u64, timestamp_ns: u64) -> Self {
        Self {
            kind: FrameEventKind::StartOfFrame,
            frame_id,
            timestamp_ns,
        }
    }

    /// Whether this is a start-of-frame event
    pub fn is_sof(&self) -> bool {
        self.kind == FrameEventKind::StartOfFrame
    }
}
