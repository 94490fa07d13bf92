//! # Contracts
//!
//! 冻结的接口契约，所有引擎 crate 共享：数据记录、协作方 trait、配置与统一错误类型。
//! 业务 crate 只依赖本 crate，禁止反向依赖。
//!
//! ## 帧模型
//! - `frame_id` 为硬件帧计数，也是唯一时钟
//! - Raw 缓冲携带各自的采集 `sequence`，按通道匹配

mod algo;
mod aux_light;
mod engine_config;
mod error;
mod event;
mod exposure;
mod floor_map;
mod hardware;
mod params;
mod raw;
mod sensor;
mod state;
mod stats;

pub use algo::*;
pub use aux_light::*;
pub use engine_config::*;
pub use error::*;
pub use event::*;
pub use exposure::*;
pub use floor_map::FloorMap;
pub use hardware::*;
pub use params::*;
pub use raw::*;
pub use sensor::*;
pub use state::*;
pub use stats::*;
