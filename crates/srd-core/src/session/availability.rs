//! The sticky "hardware available" flag.
//!
//! Starts `true`.  The first allocation that fails because the device could not
//! be created or started flips it to `false`, and from then on every allocation
//! fails fast without touching the device SDK.  There is no way back to `true`
//! short of [`HardwareAvailability::reset`], which exists for tests only.
//!
//! The flag is an explicit value rather than a global: the allocator and every
//! coordinator sharing the same hardware receive clones of the same handle.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::warn;

/// Shared, one-way availability flag.  Clones observe the same state.
#[derive(Debug, Clone)]
pub struct HardwareAvailability {
    available: Arc<AtomicBool>,
}

impl Default for HardwareAvailability {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareAvailability {
    /// A fresh flag in the available state.
    pub fn new() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Marks the hardware unavailable.  Returns `true` only for the call that
    /// actually flipped the flag.
    pub fn mark_unavailable(&self) -> bool {
        let flipped = self.available.swap(false, Ordering::AcqRel);
        if flipped {
            warn!("display hardware marked unavailable for the rest of this process");
        }
        flipped
    }

    /// Restores the available state.
    ///
    /// Test hook: production code never calls this.
    pub fn reset(&self) {
        self.available.store(true, Ordering::Release);
    }
}
