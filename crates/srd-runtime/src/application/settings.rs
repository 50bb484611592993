//! The configuration snapshot the coordinator reads every tick.
//!
//! Settings are owned by the caller (normally loaded from the TOML config file)
//! and may change between ticks.  Raw values are never used directly: the
//! accessors below clamp them into the active topology's bounds first.

use std::time::Duration;

use srd_core::{PanelInfo, ScalingMode, TopologyMode};

/// Externally owned display configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub mode: TopologyMode,
    /// Requested device count, before clamping.
    pub device_count: usize,
    /// Requested simulation switch interval in seconds, before clamping.
    pub position_switch_interval_secs: f32,
    pub scaling: ScalingMode,
    /// Physical description of the primary device's panel.
    pub panel: PanelInfo,
    /// Emulate the layout on one device instead of provisioning several.
    /// Read once when the coordinator starts.
    pub simulate: bool,
    /// Never claim a device session.  Read once when the coordinator starts.
    pub run_without_device: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            mode: TopologyMode::Single,
            device_count: 1,
            position_switch_interval_secs: 3.0,
            scaling: ScalingMode::default(),
            panel: PanelInfo::reference(),
            simulate: false,
            run_without_device: false,
        }
    }
}

impl DisplaySettings {
    /// Device count clamped into the mode's `[min, max]`.
    pub fn effective_device_count(&self) -> usize {
        self.mode.clamp_device_count(self.device_count)
    }

    /// Switch interval clamped into the mode's bounds and rounded to hundredths.
    pub fn effective_switch_interval(&self) -> Duration {
        Duration::from_secs_f32(self.mode.clamp_switch_interval(self.position_switch_interval_secs))
    }
}
