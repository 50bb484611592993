//! In-memory display platform.
//!
//! Device *i* is shown on OS display target *i + 1*; target 0 is the desktop
//! monitor the application window starts on.  Activations are recorded in
//! call order so tests can assert on them, and a single target can be told to
//! refuse activation.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::application::coordinator::{DisplayPlatform, PlatformError};

/// A `DisplayPlatform` that performs no OS calls.
#[derive(Debug, Default)]
pub struct SimulatedDisplayPlatform {
    devices: usize,
    /// Targets passed to `activate_display`, in call order.
    activations: Mutex<Vec<usize>>,
    failing_target: Mutex<Option<usize>>,
}

impl SimulatedDisplayPlatform {
    /// A platform with `devices` connected devices.
    pub fn new(devices: usize) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    /// Makes every activation of `target` fail.
    pub fn fail_activation_of(&self, target: usize) {
        *lock(&self.failing_target) = Some(target);
    }

    /// Targets activated so far, in order.
    pub fn activations(&self) -> Vec<usize> {
        lock(&self.activations).clone()
    }
}

impl DisplayPlatform for SimulatedDisplayPlatform {
    fn connected_device_count(&self) -> usize {
        self.devices
    }

    fn display_target(&self, device_index: usize) -> Option<usize> {
        (device_index < self.devices).then_some(device_index + 1)
    }

    fn activate_display(&self, target: usize) -> Result<(), PlatformError> {
        if *lock(&self.failing_target) == Some(target) {
            return Err(PlatformError::Activation {
                target,
                reason: "simulated activation failure".to_string(),
            });
        }
        debug!(target, "display activated");
        lock(&self.activations).push(target);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
