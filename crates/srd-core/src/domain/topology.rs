//! Topology modes and their configuration bounds.
//!
//! A topology describes how several physical displays are arranged on the
//! desk or wall.  Each mode comes with fixed bounds for the number of devices
//! it supports and for the simulation switch interval; every configuration
//! value is clamped into those bounds before the coordinator uses it.

use serde::{Deserialize, Serialize};

/// Shortest allowed simulation position-switch interval, in seconds.
pub const MIN_SWITCH_INTERVAL_SECS: f32 = 1.0;
/// Longest allowed simulation position-switch interval, in seconds.
pub const MAX_SWITCH_INTERVAL_SECS: f32 = 15.0;

/// Physical arrangement of the connected displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// One display, no secondaries.
    #[default]
    Single,
    /// Displays side by side: primary in the middle, then right, then left.
    HorizontalRow,
    /// Displays stacked vertically on a 45° tilted wall mount.
    VerticalStack,
    /// A 2×2 grid: primary top-left.
    Grid,
}

/// Per-mode configuration bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopologyParameters {
    /// Whether the device-count and switch-interval settings apply at all.
    pub show_extended: bool,
    /// Whether the device count may be chosen by the user.
    pub can_edit_device_count: bool,
    pub min_devices: usize,
    pub max_devices: usize,
    pub min_switch_interval_secs: f32,
    pub max_switch_interval_secs: f32,
}

impl TopologyMode {
    /// Every supported mode, in declaration order.
    pub const ALL: [TopologyMode; 4] = [
        TopologyMode::Single,
        TopologyMode::HorizontalRow,
        TopologyMode::VerticalStack,
        TopologyMode::Grid,
    ];

    /// Returns the configuration bounds for this mode.
    pub fn parameters(self) -> TopologyParameters {
        let (show_extended, can_edit_device_count, min_devices, max_devices) = match self {
            TopologyMode::Single => (false, false, 1, 1),
            TopologyMode::HorizontalRow => (true, true, 2, 3),
            TopologyMode::VerticalStack => (true, true, 2, 4),
            TopologyMode::Grid => (true, false, 4, 4),
        };
        TopologyParameters {
            show_extended,
            can_edit_device_count,
            min_devices,
            max_devices,
            min_switch_interval_secs: MIN_SWITCH_INTERVAL_SECS,
            max_switch_interval_secs: MAX_SWITCH_INTERVAL_SECS,
        }
    }

    /// Whether this arrangement requires every device to render in wall-mount
    /// orientation regardless of the primary's own setting.
    pub fn forces_wall_mount(self) -> bool {
        matches!(self, TopologyMode::VerticalStack | TopologyMode::Grid)
    }

    /// Clamps a requested device count into `[min_devices, max_devices]`.
    pub fn clamp_device_count(self, requested: usize) -> usize {
        let p = self.parameters();
        requested.clamp(p.min_devices, p.max_devices)
    }

    /// Clamps a requested switch interval into this mode's bounds and rounds
    /// it to hundredths of a second.
    ///
    /// Non-finite input falls back to the lower bound.
    pub fn clamp_switch_interval(self, requested_secs: f32) -> f32 {
        let p = self.parameters();
        if !requested_secs.is_finite() {
            return p.min_switch_interval_secs;
        }
        let clamped = requested_secs.clamp(p.min_switch_interval_secs, p.max_switch_interval_secs);
        (clamped * 100.0).round() / 100.0
    }
}

impl std::fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TopologyMode::Single => "single",
            TopologyMode::HorizontalRow => "horizontal_row",
            TopologyMode::VerticalStack => "vertical_stack",
            TopologyMode::Grid => "grid",
        };
        f.write_str(name)
    }
}
