//! SimulationDriver: emulates a multi-device layout on a single device.
//!
//! Without several physical displays, a developer still wants to see what each
//! position of the layout would show.  The driver walks the primary through the
//! layout's offsets one at a time, holding each for the configured switch
//! interval, then wraps around.
//!
//! Offsets come from [`GeometryTable::sorted_offsets`], so a four-device
//! vertical stack is visited top to bottom rather than in table order.

use std::time::Duration;

use srd_core::domain::geometry;
use srd_core::{GeometryError, GeometryTable, PanelInfo, ScalingMode, TopologyMode, Vec3};

/// Cycles one device through a layout's offsets on a timer.
#[derive(Debug, Clone)]
pub struct SimulationDriver {
    offsets: Vec<Vec3>,
    position: usize,
    elapsed: Duration,
}

impl SimulationDriver {
    /// Prepares a cycle over `device_count` positions of `mode`.  Starts at
    /// position 0 (the primary's own place).
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InsufficientOffsets`] when the table has fewer
    /// than `device_count` offsets for `mode`.
    pub fn new(
        table: &GeometryTable,
        mode: TopologyMode,
        device_count: usize,
    ) -> Result<Self, GeometryError> {
        Ok(Self {
            offsets: table.sorted_offsets(mode, device_count)?,
            position: 0,
            elapsed: Duration::ZERO,
        })
    }

    /// Index into the visiting order currently shown.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn position_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn current_offset(&self) -> Vec3 {
        self.offsets.get(self.position).copied().unwrap_or(Vec3::ZERO)
    }

    /// Adds `dt` to the timer.  Returns the new position when at least one
    /// full `interval` elapsed since the last switch.
    pub fn advance(&mut self, dt: Duration, interval: Duration) -> Option<usize> {
        if self.offsets.len() < 2 || interval.is_zero() {
            return None;
        }
        self.elapsed += dt;
        let mut switched = false;
        while self.elapsed >= interval {
            self.elapsed -= interval;
            self.position = (self.position + 1) % self.offsets.len();
            switched = true;
        }
        switched.then_some(self.position)
    }

    /// Local presence shift for the current position.
    ///
    /// The shift lives in the rig's own space, so view scale does not apply.
    pub fn presence_offset(&self, panel: &PanelInfo, scaling: ScalingMode) -> Vec3 {
        geometry::scaled_offset(self.current_offset(), panel, 1.0, scaling)
    }
}
