//! FullParams - AnalyzerCore output
//!
//! Aggregate of every algorithm's computed output for one pass.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{AlgoType, AuxLightResult, ExposureUpdate, ResultGroup, ALGO_TYPE_COUNT};

/// Sub-table of [`FullParams`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSlot {
    Exposure,
    Iris,
    Focus,
    Isp,
    IspPost,
    AuxLight,
}

impl ParamSlot {
    #[inline]
    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    /// Slot receiving the module output of `algo`
    pub fn for_module(algo: AlgoType) -> Self {
        match algo {
            AlgoType::Anr | AlgoType::Asharp | AlgoType::Afec | AlgoType::Aldch => {
                ParamSlot::IspPost
            }
            _ => ParamSlot::Isp,
        }
    }
}

/// Bitfield of sub-tables changed during a pass
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMask(u32);

impl UpdateMask {
    /// Empty mask
    pub const EMPTY: UpdateMask = UpdateMask(0);

    /// Mark a slot as updated
    pub fn set(&mut self, slot: ParamSlot) {
        self.0 |= slot.bit();
    }

    /// Whether a slot was updated
    pub fn contains(self, slot: ParamSlot) -> bool {
        self.0 & slot.bit() != 0
    }

    /// Whether nothing was updated
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bits
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for UpdateMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateMask({:#08b})", self.0)
    }
}

/// Iris output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IrisParams {
    /// Aperture (f-number step or PWM duty, driver specific)
    pub aperture: f32,
}

/// Focus output
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusParams {
    /// Lens motor position
    pub position: i32,
    /// Zoom motor position
    pub zoom: i32,
}

/// Full result of one pass
#[derive(Debug, Clone)]
pub struct FullParams {
    /// Frame the result was computed for
    pub frame_id: u64,
    /// Group that produced the result
    pub group: ResultGroup,
    /// Sub-tables changed in this pass
    pub update_mask: UpdateMask,
    /// Exposure decision
    pub exposure: Option<ExposureUpdate>,
    /// Multi-entry exposure table, when the algorithm issues one
    pub exposure_table: Vec<ExposureUpdate>,
    /// Iris decision
    pub iris: IrisParams,
    /// Focus decision
    pub focus: FocusParams,
    /// Auxiliary light decision
    pub aux_light: AuxLightResult,
    modules: [Option<Bytes>; ALGO_TYPE_COUNT],
}

impl Default for FullParams {
    fn default() -> Self {
        Self {
            frame_id: 0,
            group: ResultGroup::Measurement,
            update_mask: UpdateMask::EMPTY,
            exposure: None,
            exposure_table: Vec::new(),
            iris: IrisParams::default(),
            focus: FocusParams::default(),
            aux_light: AuxLightResult::default(),
            modules: std::array::from_fn(|_| None),
        }
    }
}

impl FullParams {
    /// Set the exposure decision
    pub fn set_exposure(&mut self, update: ExposureUpdate) {
        self.exposure = Some(update);
        self.update_mask.set(ParamSlot::Exposure);
    }

    /// Set a multi-entry exposure table
    pub fn set_exposure_table(&mut self, table: impl IntoIterator<Item = ExposureUpdate>) {
        self.exposure_table.clear();
        self.exposure_table.extend(table);
        if !self.exposure_table.is_empty() {
            self.update_mask.set(ParamSlot::Exposure);
        }
    }

    /// Set the iris decision
    pub fn set_iris(&mut self, iris: IrisParams) {
        self.iris = iris;
        self.update_mask.set(ParamSlot::Iris);
    }

    /// Set the focus decision
    pub fn set_focus(&mut self, focus: FocusParams) {
        self.focus = focus;
        self.update_mask.set(ParamSlot::Focus);
    }

    /// Set the auxiliary light decision
    pub fn set_aux_light(&mut self, result: AuxLightResult) {
        self.aux_light = result;
        self.update_mask.set(ParamSlot::AuxLight);
    }

    /// Set the register table computed by an ISP module
    pub fn set_module(&mut self, algo: AlgoType, data: Bytes) {
        self.modules[algo.index()] = Some(data);
        self.update_mask.set(ParamSlot::for_module(algo));
    }

    /// Register table of an ISP module
    pub fn module(&self, algo: AlgoType) -> Option<&Bytes> {
        self.modules[algo.index()].as_ref()
    }

    /// Reset to the empty state so the record can be reused
    pub fn reset(&mut self) {
        self.frame_id = 0;
        self.group = ResultGroup::Measurement;
        self.update_mask = UpdateMask::EMPTY;
        self.exposure = None;
        self.exposure_table.clear();
        self.iris = IrisParams::default();
        self.focus = FocusParams::default();
        self.aux_light = AuxLightResult::default();
        for module in &mut self.modules {
            *module = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_mask_tracks_slots() {
        let mut params = FullParams::default();
        assert!(params.update_mask.is_empty());

        params.set_module(AlgoType::Anr, Bytes::from_static(b"nr"));
        params.set_module(AlgoType::Accm, Bytes::from_static(b"ccm"));
        assert!(params.update_mask.contains(ParamSlot::IspPost));
        assert!(params.update_mask.contains(ParamSlot::Isp));
        assert!(!params.update_mask.contains(ParamSlot::Exposure));
    }

    #[test]
    fn test_empty_table_does_not_mark_exposure() {
        let mut params = FullParams::default();
        params.set_exposure_table(Vec::new());
        assert!(!params.update_mask.contains(ParamSlot::Exposure));
    }

    #[test]
    fn test_reset() {
        let mut params = FullParams::default();
        params.frame_id = 9;
        params.set_exposure(ExposureUpdate::linear(9, 2.0, 0.01));
        params.set_module(AlgoType::Agamma, Bytes::from_static(b"g"));
        params.reset();
        assert_eq!(params.frame_id, 0);
        assert!(params.exposure.is_none());
        assert!(params.module(AlgoType::Agamma).is_none());
        assert!(params.update_mask.is_empty());
    }
}
