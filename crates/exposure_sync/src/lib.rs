//! # Exposure Sync
//!
//! 单个传感器的延迟补偿曝光写入。
//!
//! 积分时间、模拟增益与转换增益到达传感器的 pipeline 延迟各不相同。
//! [`ExposureSyncController`] 每个帧起始组合一次寄存器写入，使一次更新的三个分量
//! 在同一帧生效，并记录每帧实际生效的更新，供统计解读使用。
//!
//! ```ignore
//! let ctrl = ExposureSyncController::new(driver, ExposureDelays::new(2, 2, 1))?;
//! ctrl.set_exposure(ExposureUpdate::linear(frame, gain, time));
//! ctrl.handle_sof(frame)?;
//! let effective = ctrl.get_effective_exp_params(frame + 2);
//! ```

mod controller;
mod delay;
mod mock;

pub use contracts::{AppliedExposure, ExposureDelays, ExposureUpdate};
pub use controller::ExposureSyncController;
pub use mock::MockSensorDriver;
