//! The per-frame update loop.
//!
//! A tokio interval paces the coordinator at the configured frame rate.  Each
//! frame reads the latest settings snapshot from a `watch` channel (so the
//! settings stay externally owned and may change while running), optionally
//! orbits the primary to exercise synchronization, and ticks the coordinator.
//!
//! When the shutdown flag clears or the frame budget runs out, the loop shuts
//! the coordinator down and keeps ticking for a bounded number of frames so
//! sessions that were still starting get released once they resolve.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use srd_core::{Quat, Vec3};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::application::coordinator::{CoordinatorError, CoordinatorState, MultiDisplayCoordinator};
use crate::application::settings::DisplaySettings;

/// How the loop is paced and when it stops.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLoopOptions {
    pub frame_rate_hz: u32,
    /// Stop after this many frames.  `None` runs until the shutdown flag clears.
    pub max_frames: Option<u64>,
    /// Yaw applied to the primary every second, in radians.  Zero disables it.
    pub orbit_speed_rad_per_sec: f32,
    /// Frames spent waiting for still-starting sessions after shutdown.
    pub teardown_frames: u32,
}

impl Default for FrameLoopOptions {
    fn default() -> Self {
        Self {
            frame_rate_hz: 60,
            max_frames: None,
            orbit_speed_rad_per_sec: 0.0,
            teardown_frames: 120,
        }
    }
}

/// What the loop observed just before shutting down.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub final_state: CoordinatorState,
    pub active_slots: usize,
    pub syncs: u64,
}

/// Ticks `coordinator` until `running` clears or the frame budget is spent,
/// then shuts it down.
///
/// The coordinator must already be started.
///
/// # Errors
///
/// Propagates the first [`CoordinatorError`] returned by a tick.
pub async fn run_frame_loop(
    coordinator: &mut MultiDisplayCoordinator,
    settings: watch::Receiver<DisplaySettings>,
    options: &FrameLoopOptions,
    running: Arc<AtomicBool>,
) -> Result<RunSummary, CoordinatorError> {
    let period = Duration::from_secs_f64(1.0 / f64::from(options.frame_rate_hz.max(1)));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let up = Vec3::new(0.0, 1.0, 0.0);
    let mut frames: u64 = 0;
    let mut last = Instant::now();

    while running.load(Ordering::Relaxed) && options.max_frames.map_or(true, |max| frames < max) {
        interval.tick().await;
        let now = Instant::now();
        let dt = now - last;
        last = now;

        if options.orbit_speed_rad_per_sec != 0.0 {
            let yaw = Quat::from_axis_angle(up, options.orbit_speed_rad_per_sec * dt.as_secs_f32());
            let primary = coordinator.primary_mut();
            let rotation = yaw * primary.transform().rotation;
            primary.set_rotation(rotation);
        }

        let snapshot = settings.borrow().clone();
        coordinator.tick(&snapshot, dt)?;
        frames += 1;
    }

    let summary = RunSummary {
        frames,
        final_state: coordinator.state(),
        active_slots: coordinator.active_slot_count(),
        syncs: coordinator.sync_count(),
    };

    coordinator.shutdown();
    let snapshot = settings.borrow().clone();
    for _ in 0..options.teardown_frames {
        if !coordinator.has_pending_teardown() {
            break;
        }
        interval.tick().await;
        coordinator.tick(&snapshot, period)?;
    }
    if coordinator.has_pending_teardown() {
        warn!("sessions still starting at exit; they are released when dropped");
    }

    info!(
        frames = summary.frames,
        slots = summary.active_slots,
        syncs = summary.syncs,
        "frame loop stopped"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use srd_core::{GeometryTable, HardwareAvailability, SessionAllocator, TopologyMode};

    use super::*;
    use crate::infrastructure::platform::SimulatedDisplayPlatform;
    use crate::infrastructure::session_backend::{SimulatedBackendConfig, SimulatedSessionBackend};

    fn coordinator(backend: &SimulatedSessionBackend, devices: usize) -> MultiDisplayCoordinator {
        MultiDisplayCoordinator::new(
            Arc::new(SessionAllocator::new(
                Arc::new(backend.clone()),
                HardwareAvailability::new(),
            )),
            Arc::new(SimulatedDisplayPlatform::new(devices)),
            Arc::new(GeometryTable::standard()),
            "SRDisplayManager",
        )
    }

    fn fast(max_frames: u64) -> FrameLoopOptions {
        FrameLoopOptions {
            frame_rate_hz: 1000,
            max_frames: Some(max_frames),
            orbit_speed_rad_per_sec: 1.0,
            teardown_frames: 50,
        }
    }

    #[tokio::test]
    async fn test_loop_provisions_row_and_releases_everything() {
        let backend = SimulatedSessionBackend::new(SimulatedBackendConfig {
            devices: 3,
            startup_polls: 2,
            ..SimulatedBackendConfig::default()
        });
        let mut c = coordinator(&backend, 3);
        let settings = DisplaySettings {
            mode: TopologyMode::HorizontalRow,
            device_count: 3,
            ..DisplaySettings::default()
        };
        c.start(&settings).unwrap();
        let (_tx, rx) = watch::channel(settings);

        let summary = run_frame_loop(&mut c, rx, &fast(30), Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert_eq!(summary.frames, 30);
        assert_eq!(summary.final_state, CoordinatorState::Active);
        assert_eq!(summary.active_slots, 3);
        assert!(summary.syncs > 1, "orbiting primary must resync");
        assert_eq!(backend.live_count(), 0);
        assert_eq!(c.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn test_cleared_flag_stops_before_first_frame() {
        let backend = SimulatedSessionBackend::with_devices(1);
        let mut c = coordinator(&backend, 1);
        c.start(&DisplaySettings::default()).unwrap();
        let (_tx, rx) = watch::channel(DisplaySettings::default());

        let summary = run_frame_loop(&mut c, rx, &fast(100), Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();

        assert_eq!(summary.frames, 0);
        assert_eq!(backend.live_count(), 0);
    }

    #[tokio::test]
    async fn test_settings_published_before_run_are_picked_up() {
        let backend = SimulatedSessionBackend::with_devices(3);
        let mut c = coordinator(&backend, 3);
        let initial = DisplaySettings {
            mode: TopologyMode::HorizontalRow,
            device_count: 2,
            ..DisplaySettings::default()
        };
        c.start(&initial).unwrap();
        let (tx, rx) = watch::channel(initial.clone());
        tx.send(DisplaySettings {
            device_count: 3,
            ..initial
        })
        .unwrap();

        let summary = run_frame_loop(&mut c, rx, &fast(20), Arc::new(AtomicBool::new(true)))
            .await
            .unwrap();

        assert_eq!(summary.active_slots, 3);
    }
}
