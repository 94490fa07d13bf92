//! ExposureUpdate - AE 输出，ExposureSyncController 输入

use serde::{Deserialize, Serialize};

/// HDR 曝光通道最大数量
pub const MAX_HDR_CHANNELS: usize = 3;

/// 双转换增益 (DCG) 模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DcgMode {
    /// 传感器无 DCG 或未启用
    #[default]
    Unused,
    /// 低转换增益
    Lcg,
    /// 高转换增益
    Hcg,
}

/// 单个 HDR 曝光通道的增益/时间
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelExposure {
    /// 模拟增益 (1.0 = 单位增益)
    pub gain: f32,
    /// 积分时间 (秒)
    pub integration_time: f32,
}

/// 一次曝光决策
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureUpdate {
    /// 产生该决策的统计所属帧
    pub frame_id: u64,
    /// 模拟增益 (线性模式)
    pub gain: f32,
    /// 积分时间，秒 (线性模式)
    pub integration_time: f32,
    /// 转换增益模式
    pub dcg: DcgMode,
    /// HDR 模式下各通道取值，长/中/短
    pub channels: [ChannelExposure; MAX_HDR_CHANNELS],
    /// `channels` 中有效条目数
    pub channel_count: u8,
    /// 多条目曝光表的首条
    pub first_of_batch: bool,
}

impl ExposureUpdate {
    /// 线性模式更新
    pub fn linear(frame_id: u64, gain: f32, integration_time: f32) -> Self {
        Self {
            frame_id,
            gain,
            integration_time,
            first_of_batch: true,
            ..Self::default()
        }
    }

    /// HDR update from per-channel values; the first channel also fills the linear fields
    pub fn hdr(frame_id: u64, channels: &[ChannelExposure]) -> Self {
        let mut update = Self {
            frame_id,
            first_of_batch: true,
            ..Self::default()
        };
        let count = channels.len().min(MAX_HDR_CHANNELS);
        update.channels[..count].copy_from_slice(&channels[..count]);
        update.channel_count = count as u8;
        if let Some(first) = channels.first() {
            update.gain = first.gain;
            update.integration_time = first.integration_time;
        }
        update
    }

    /// Set the DCG mode
    pub fn with_dcg(mut self, dcg: DcgMode) -> Self {
        self.dcg = dcg;
        self
    }

    /// 线性字段的总感光度 (gain x time)
    pub fn sensitivity(&self) -> f32 {
        self.gain * self.integration_time
    }
}

/// 一次帧起始写入所组合的寄存器值
///
/// 传感器延迟不同时，time、gain 与 DCG 可能来自不同的历史更新。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedExposure {
    /// 写入发生的帧
    pub sof_frame: u64,
    /// 提供积分时间的更新
    pub time_source: u64,
    /// 提供增益的更新
    pub gain_source: u64,
    /// Integration time in seconds
    pub integration_time: f32,
    /// Analog gain
    pub gain: f32,
    /// 转换增益模式
    pub dcg: DcgMode,
    /// 各通道积分时间
    pub channel_times: [f32; MAX_HDR_CHANNELS],
    /// 各通道增益
    pub channel_gains: [f32; MAX_HDR_CHANNELS],
    /// 有效通道条目数
    pub channel_count: u8,
}
