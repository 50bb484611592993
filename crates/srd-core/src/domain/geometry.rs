//! Topology geometry: reference dimensions, offset table, and scaling rule.
//!
//! Every topology is described by an ordered list of offsets, one per device
//! slot, expressed in metres relative to the primary display and measured for
//! the reference device.  Slot 0 is the primary itself, so its offset is always
//! the zero vector.
//!
//! # From table offset to world position (for beginners)
//!
//! The table is authored for the reference panel.  A device with a different
//! panel width scales every offset by `panel_width / REFERENCE_PANEL_WIDTH`.
//! The result is then scaled by the primary's view-space scale, optionally
//! divided by the device scale factor (in [`ScalingMode::ScaledSize`]), rotated
//! by the primary's rotation, and finally added to the primary's position:
//!
//! ```text
//! world = primary.position
//!       + primary.rotation × (offset × (panel_width / REFERENCE_PANEL_WIDTH)
//!                                    × view_scale [÷ scale_factor])
//! ```

use std::f32::consts::FRAC_PI_4;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::math::{Transform, Vec3};
use super::topology::TopologyMode;

/// Visible panel width of the reference device, in metres.
pub const REFERENCE_PANEL_WIDTH: f32 = 0.596_736;
/// Visible panel height of the reference device, in metres.
pub const REFERENCE_PANEL_HEIGHT: f32 = 0.335_664;
/// Outer body width of the reference device (panel plus bezel), in metres.
pub const REFERENCE_BODY_WIDTH: f32 = REFERENCE_PANEL_WIDTH + 0.027;
/// Outer body height of the reference device (panel plus stand), in metres.
pub const REFERENCE_BODY_HEIGHT: f32 = REFERENCE_PANEL_HEIGHT + 0.083;

/// Errors produced by geometry lookups.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    /// The table has fewer offsets for `mode` than the caller asked for.
    #[error("topology {mode} defines {available} slot offsets, {requested} requested")]
    InsufficientOffsets {
        mode: TopologyMode,
        requested: usize,
        available: usize,
    },
}

/// How table offsets react to the device-reported scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Offsets are divided by the device scale factor.
    #[default]
    ScaledSize,
    /// Offsets are used at physical size.
    Absolute,
}

/// Physical description of a display as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanelInfo {
    /// Panel width in metres.
    pub width: f32,
    /// Panel height in metres.
    pub height: f32,
    /// Physical scale factor used in [`ScalingMode::ScaledSize`].
    pub scale_factor: f32,
}

impl Default for PanelInfo {
    fn default() -> Self {
        Self::reference()
    }
}

impl PanelInfo {
    /// The reference device at unit scale.
    pub fn reference() -> Self {
        Self {
            width: REFERENCE_PANEL_WIDTH,
            height: REFERENCE_PANEL_HEIGHT,
            scale_factor: 1.0,
        }
    }
}

/// Offsets and reference panel dimensions for one topology.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryEntry {
    pub mode: TopologyMode,
    /// Relative offsets, indexed by slot.  `offsets[0]` is always zero.
    pub offsets: Vec<Vec3>,
    pub panel_width: f32,
    pub panel_height: f32,
}

/// Read-only table of slot offsets for every topology.
///
/// Built once and shared (typically behind an `Arc`) by every coordinator;
/// nothing mutates it after construction.
#[derive(Debug, Clone)]
pub struct GeometryTable {
    entries: [GeometryEntry; 4],
}

impl Default for GeometryTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl GeometryTable {
    /// Builds the table for the reference device.
    pub fn standard() -> Self {
        let w = REFERENCE_BODY_WIDTH;
        // Vertical neighbours sit on a 45° tilted mount: one body height down
        // the slope moves both down and towards the viewer.
        let down = Vec3::new(
            0.0,
            -REFERENCE_BODY_HEIGHT * FRAC_PI_4.cos(),
            -REFERENCE_BODY_HEIGHT * FRAC_PI_4.sin(),
        );

        let table = [
            (TopologyMode::Single, vec![Vec3::ZERO; 4]),
            (
                TopologyMode::HorizontalRow,
                vec![Vec3::ZERO, Vec3::new(w, 0.0, 0.0), Vec3::new(-w, 0.0, 0.0)],
            ),
            (
                TopologyMode::VerticalStack,
                vec![Vec3::ZERO, down, -down, down * 2.0],
            ),
            (
                TopologyMode::Grid,
                vec![
                    Vec3::ZERO,
                    Vec3::new(w, 0.0, 0.0),
                    down,
                    Vec3::new(w, 0.0, 0.0) + down,
                ],
            ),
        ];

        let entries = table.map(|(mode, offsets)| GeometryEntry {
            mode,
            offsets,
            panel_width: REFERENCE_PANEL_WIDTH,
            panel_height: REFERENCE_PANEL_HEIGHT,
        });

        Self { entries }
    }

    /// Returns the entry for `mode`.
    pub fn entry(&self, mode: TopologyMode) -> &GeometryEntry {
        let row = match mode {
            TopologyMode::Single => 0,
            TopologyMode::HorizontalRow => 1,
            TopologyMode::VerticalStack => 2,
            TopologyMode::Grid => 3,
        };
        &self.entries[row]
    }

    /// Returns the first `count` offsets for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InsufficientOffsets`] when the table defines
    /// fewer than `count` offsets for the mode.
    pub fn offsets(&self, mode: TopologyMode, count: usize) -> Result<&[Vec3], GeometryError> {
        let offsets = &self.entry(mode).offsets;
        offsets
            .get(..count)
            .ok_or(GeometryError::InsufficientOffsets {
                mode,
                requested: count,
                available: offsets.len(),
            })
    }

    /// Returns the offset for a single slot.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InsufficientOffsets`] when `slot` is past the
    /// end of the mode's offset list.
    pub fn offset(&self, mode: TopologyMode, slot: usize) -> Result<Vec3, GeometryError> {
        Ok(self.offsets(mode, slot + 1)?[slot])
    }

    /// Returns the offsets in the order the simulation visits them.
    ///
    /// This is the table order, except that a four-device vertical stack swaps
    /// slots 2 and 3 so the simulated device walks down the stack before
    /// jumping to the top.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InsufficientOffsets`] when `count` exceeds the
    /// table.
    pub fn sorted_offsets(&self, mode: TopologyMode, count: usize) -> Result<Vec<Vec3>, GeometryError> {
        let mut sorted = self.offsets(mode, count)?.to_vec();
        if mode == TopologyMode::VerticalStack && count == 4 {
            sorted.swap(2, 3);
        }
        Ok(sorted)
    }
}

/// Scales a reference-device offset for the given panel and view scale.
pub fn scaled_offset(relative: Vec3, panel: &PanelInfo, view_scale: f32, scaling: ScalingMode) -> Vec3 {
    let shift = relative * (panel.width / REFERENCE_PANEL_WIDTH) * view_scale;
    match scaling {
        ScalingMode::ScaledSize => shift / panel.scale_factor,
        ScalingMode::Absolute => shift,
    }
}

/// World-space position of a secondary at `relative` from `primary`.
pub fn world_position(
    primary: &Transform,
    relative: Vec3,
    panel: &PanelInfo,
    scaling: ScalingMode,
) -> Vec3 {
    primary.position + primary.rotation * scaled_offset(relative, panel, primary.view_scale, scaling)
}
