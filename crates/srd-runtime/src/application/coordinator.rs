//! MultiDisplayCoordinator: brings up every connected display and keeps the
//! secondaries spatially locked to the primary.
//!
//! # State machine
//!
//! ```text
//! Idle ──start()──► Discovering ──► Provisioning ──► Active
//!                        │               ▲   │         │
//!                        │               │   └─halt────┤
//!                        │               └──config change
//!                        └─(simulate)──► Simulating
//! ```
//!
//! # How provisioning works (for beginners)
//!
//! Each physical display needs its own device session, and bringing a device
//! up includes activating an OS display target.  Two activations must never
//! race, so slots are brought up strictly one after another: slot *i* is not
//! touched until slot *i-1*'s session reports `Running`.
//!
//! Nothing here blocks a thread.  The pending slots sit in a queue; every
//! [`tick`](MultiDisplayCoordinator::tick) looks at the head of the queue and
//! either provisions it (previous slot is running), leaves it for a later tick
//! (previous slot still starting), or halts provisioning (previous slot failed).
//! The only blocking call is the primary's start in
//! [`start`](MultiDisplayCoordinator::start).
//!
//! A halt is not fatal: slots that already run stay up and keep syncing.
//!
//! # Per-tick synchronization
//!
//! Secondaries are recomputed only on ticks where the primary's pose changed
//! (or a scaling input changed).  Each secondary gets
//! `primary.position + primary.rotation × scaled(offset[slot])` plus the
//! primary's rotation and view scale.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use srd_core::domain::geometry;
use srd_core::{
    GeometryError, GeometryTable, PanelInfo, ScalingMode, Session, SessionAllocator, SessionState,
    TopologyMode, Transform, Vec3,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::device_slot::DeviceSlot;
use super::events::{CoordinatorEvent, EventHub, HaltReason, SubscriptionId};
use super::settings::DisplaySettings;
use super::simulation::SimulationDriver;

// ── Collaborator contract ─────────────────────────────────────────────────────

/// Error reported by the display platform.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlatformError {
    #[error("display target {target} could not be activated: {reason}")]
    Activation { target: usize, reason: String },
}

/// The OS / device-SDK view of connected displays.
///
/// Infrastructure implementations talk to the device runtime; test
/// implementations record calls.
pub trait DisplayPlatform: Send + Sync {
    /// Number of spatial-reality devices currently connected.
    fn connected_device_count(&self) -> usize;

    /// OS display target that shows device `device_index`, if any.
    fn display_target(&self, device_index: usize) -> Option<usize>;

    /// Turns on rendering to an OS display target.
    fn activate_display(&self, target: usize) -> Result<(), PlatformError>;
}

// ── State & errors ────────────────────────────────────────────────────────────

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorState {
    #[default]
    Idle,
    Discovering,
    Provisioning,
    Active,
    Simulating,
}

/// Errors returned to the caller.  Provisioning problems are not errors:
/// they halt provisioning and are published as events.
#[derive(Debug, Error, PartialEq)]
pub enum CoordinatorError {
    #[error("coordinator already started (state {0:?})")]
    AlreadyStarted(CoordinatorState),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// Drives one primary display and its secondaries.
pub struct MultiDisplayCoordinator {
    allocator: Arc<SessionAllocator>,
    platform: Arc<dyn DisplayPlatform>,
    geometry: Arc<GeometryTable>,
    events: EventHub,
    state: CoordinatorState,

    primary: DeviceSlot,
    secondaries: Vec<DeviceSlot>,
    /// Slot indices still to bring up, consumed front to back.
    pending: VecDeque<usize>,
    /// Torn-down sessions whose start had not resolved yet.
    retiring: Vec<Session>,

    mode: TopologyMode,
    device_count: usize,
    scaling: ScalingMode,
    panel: PanelInfo,
    /// Last primary wall-mount preference that was propagated.
    wall_mount_cache: bool,

    simulation: Option<SimulationDriver>,
    current_index: usize,
    sync_count: u64,
}

impl MultiDisplayCoordinator {
    /// Creates an idle coordinator around a primary manager named
    /// `primary_name`.
    pub fn new(
        allocator: Arc<SessionAllocator>,
        platform: Arc<dyn DisplayPlatform>,
        geometry: Arc<GeometryTable>,
        primary_name: impl Into<String>,
    ) -> Self {
        Self {
            allocator,
            platform,
            geometry,
            events: EventHub::new(),
            state: CoordinatorState::Idle,
            primary: DeviceSlot::primary(primary_name),
            secondaries: Vec::new(),
            pending: VecDeque::new(),
            retiring: Vec::new(),
            mode: TopologyMode::Single,
            device_count: 1,
            scaling: ScalingMode::default(),
            panel: PanelInfo::reference(),
            wall_mount_cache: false,
            simulation: None,
            current_index: 0,
            sync_count: 0,
        }
    }

    // ── Observers ─────────────────────────────────────────────────────────────

    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn mode(&self) -> TopologyMode {
        self.mode
    }

    /// Clamped device count currently targeted.
    pub fn device_count(&self) -> usize {
        self.device_count
    }

    /// Slot being provisioned, or the simulated position being shown.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Number of secondary recomputations performed so far.
    pub fn sync_count(&self) -> u64 {
        self.sync_count
    }

    pub fn primary(&self) -> &DeviceSlot {
        &self.primary
    }

    /// Mutable access for the application to move the primary or toggle its
    /// wall-mount preference.
    pub fn primary_mut(&mut self) -> &mut DeviceSlot {
        &mut self.primary
    }

    pub fn secondaries(&self) -> &[DeviceSlot] {
        &self.secondaries
    }

    /// Slots (primary included) holding a live session.
    pub fn active_slot_count(&self) -> usize {
        std::iter::once(&self.primary)
            .chain(&self.secondaries)
            .filter(|slot| slot.is_live())
            .count()
    }

    pub fn pending_slots(&self) -> usize {
        self.pending.len()
    }

    pub fn simulation(&self) -> Option<&SimulationDriver> {
        self.simulation.as_ref()
    }

    /// Whether sessions torn down mid-start are still waiting to be released.
    pub fn has_pending_teardown(&self) -> bool {
        !self.retiring.is_empty()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Reads the configuration, claims the primary device, turns on its
    /// display and queues the secondaries.
    ///
    /// Hardware problems never fail this call: without a device the
    /// coordinator ends up `Active` with zero live slots.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::AlreadyStarted`] unless the coordinator is idle;
    /// [`CoordinatorError::Geometry`] if the simulated layout cannot be built.
    pub fn start(&mut self, settings: &DisplaySettings) -> Result<(), CoordinatorError> {
        if self.state != CoordinatorState::Idle {
            return Err(CoordinatorError::AlreadyStarted(self.state));
        }

        self.mode = settings.mode;
        self.device_count = settings.effective_device_count();
        self.scaling = settings.scaling;
        self.panel = settings.panel;
        self.wall_mount_cache = self.primary.wall_mount_preference();
        self.apply_wall_mount();

        info!(
            mode = %self.mode,
            devices = self.device_count,
            simulate = settings.simulate,
            "coordinator starting"
        );
        self.transition(CoordinatorState::Discovering);

        if settings.simulate {
            if !settings.run_without_device && !self.claim_primary() {
                info!("simulating without a device session");
            }
            return self.enter_simulation();
        }

        if settings.run_without_device {
            info!("running without a display device");
            self.transition(CoordinatorState::Active);
            return Ok(());
        }

        if !self.claim_primary() {
            self.transition(CoordinatorState::Active);
            return Ok(());
        }

        if let Some(target) = self.platform.display_target(0) {
            if let Err(err) = self.platform.activate_display(target) {
                self.halt(err.into());
                return Ok(());
            }
            self.primary.register_target_display(target);
        }

        let target = self.reachable_device_count();
        self.current_index = 0;
        self.pending = (1..target).collect();
        self.transition(CoordinatorState::Provisioning);
        if self.pending.is_empty() {
            self.transition(CoordinatorState::Active);
        }
        Ok(())
    }

    /// Advances the coordinator by one frame.
    ///
    /// `settings` is re-read every tick; a changed topology or device count
    /// re-enters provisioning, a changed scaling input forces a resync.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Geometry`] if the geometry table cannot serve the
    /// active layout.
    pub fn tick(&mut self, settings: &DisplaySettings, dt: Duration) -> Result<(), CoordinatorError> {
        self.reap_retiring();
        if matches!(self.state, CoordinatorState::Idle | CoordinatorState::Discovering) {
            return Ok(());
        }

        self.apply_settings(settings)?;

        match self.state {
            CoordinatorState::Provisioning => self.provision_step(),
            CoordinatorState::Simulating => self.simulation_step(settings, dt),
            CoordinatorState::Active => self.resolve_late_starts(),
            _ => {}
        }

        if self.primary.take_changed() {
            self.sync_secondaries()?;
        }

        if self.primary.wall_mount_preference() != self.wall_mount_cache {
            self.wall_mount_cache = self.primary.wall_mount_preference();
            self.apply_wall_mount();
        }
        Ok(())
    }

    /// Releases every session: secondaries first, the primary last.
    ///
    /// Sessions still starting cannot be released yet; they are kept aside
    /// and destroyed by later ticks once they resolve (see
    /// [`has_pending_teardown`](MultiDisplayCoordinator::has_pending_teardown)).
    pub fn shutdown(&mut self) {
        self.pending.clear();
        self.simulation = None;

        let sessions: Vec<Session> = self
            .secondaries
            .drain(..)
            .rev()
            .filter_map(|mut slot| slot.take_session())
            .chain(self.primary.take_session())
            .collect();
        for session in sessions {
            self.retire(session);
        }

        info!(retiring = self.retiring.len(), "coordinator shut down");
        self.transition(CoordinatorState::Idle);
        self.events.publish(CoordinatorEvent::ShutDown);
    }

    // ── Provisioning ──────────────────────────────────────────────────────────

    fn claim_primary(&mut self) -> bool {
        match self.allocator.allocate_blocking() {
            Ok(session) => {
                info!(session = %session.id(), name = self.primary.name(), "primary session running");
                self.primary.attach_session(session);
                true
            }
            Err(err) => {
                warn!(%err, "primary session unavailable");
                self.publish_if_unavailable();
                false
            }
        }
    }

    /// Configured count capped by what is actually plugged in.
    fn reachable_device_count(&self) -> usize {
        let connected = self.platform.connected_device_count();
        let target = self.device_count.min(connected.max(1));
        if target < self.device_count {
            warn!(
                requested = self.device_count,
                connected, "fewer devices connected than configured"
            );
        }
        target
    }

    fn provision_step(&mut self) {
        let Some(&slot) = self.pending.front() else {
            self.transition(CoordinatorState::Active);
            return;
        };

        // Slot i waits for slot i-1.
        let previous = self.secondaries.last_mut().unwrap_or(&mut self.primary);
        let previous_index = previous.index();
        let gate = match previous.session_mut() {
            Some(session) => self.allocator.resolve(session).map_err(HaltReason::from),
            None => Err(HaltReason::PreviousSlotInactive { slot: previous_index }),
        };
        match gate {
            Ok(SessionState::Running) => {}
            Ok(state) => {
                trace!(slot, waiting_on = previous_index, ?state, "provisioning suspended");
                return;
            }
            Err(reason) => {
                self.halt(reason);
                return;
            }
        }

        self.current_index = slot;
        match self.provision_slot(slot) {
            Ok(()) => {
                self.pending.pop_front();
                if self.pending.is_empty() {
                    info!(slots = self.active_slot_count(), "provisioning complete");
                    self.transition(CoordinatorState::Active);
                }
            }
            Err(reason) => self.halt(reason),
        }
    }

    fn provision_slot(&mut self, slot: usize) -> Result<(), HaltReason> {
        let target = self
            .platform
            .display_target(slot)
            .ok_or(HaltReason::NoDisplayTarget { device: slot })?;
        let offset = self.geometry.offset(self.mode, slot)?;
        let session = self.allocator.allocate_async()?;
        if let Err(err) = self.platform.activate_display(target) {
            // The start request cannot be cancelled; release once it resolves.
            self.retire(session);
            return Err(err.into());
        }

        let session_id = session.id();
        let mut manager = self.primary.spawn_secondary(slot, session);
        manager.register_target_display(target);
        manager.place(self.secondary_transform(offset));
        manager.set_wall_mount(self.effective_wall_mount());

        info!(slot, target, name = manager.name(), "secondary provisioned");
        self.secondaries.push(manager);
        self.events.publish(CoordinatorEvent::SlotProvisioned {
            slot,
            target_display: target,
            session: session_id,
        });
        Ok(())
    }

    fn halt(&mut self, reason: HaltReason) {
        self.pending.clear();
        // A slot whose start just failed had its session destroyed in place.
        while self.secondaries.last().is_some_and(|slot| !slot.is_live()) {
            self.secondaries.pop();
        }

        let provisioned = self.active_slot_count();
        warn!(%reason, provisioned, requested = self.device_count, "provisioning halted");
        if matches!(reason, HaltReason::Allocation(_)) {
            self.publish_if_unavailable();
        }
        self.events.publish(CoordinatorEvent::ProvisioningHalted {
            provisioned,
            requested: self.device_count,
            reason,
        });
        self.transition(CoordinatorState::Active);
    }

    /// The last provisioned slot may still be starting once the queue is
    /// empty; its handshake can fail after the fact.
    fn resolve_late_starts(&mut self) {
        let mut failed = false;
        for slot in &mut self.secondaries {
            let Some(session) = slot.session_mut() else {
                continue;
            };
            if session.state() != SessionState::Starting {
                continue;
            }
            if let Err(err) = self.allocator.resolve(session) {
                warn!(slot = slot.index(), %err, "secondary failed to start");
                failed = true;
            }
        }
        if failed {
            self.secondaries.retain(DeviceSlot::is_live);
            self.publish_if_unavailable();
        }
    }

    // ── Configuration changes ─────────────────────────────────────────────────

    fn apply_settings(&mut self, settings: &DisplaySettings) -> Result<(), CoordinatorError> {
        if settings.scaling != self.scaling || settings.panel != self.panel {
            debug!(scaling = ?settings.scaling, "scaling inputs changed");
            self.scaling = settings.scaling;
            self.panel = settings.panel;
            self.primary.mark_changed();
        }

        let count = settings.effective_device_count();
        if settings.mode != self.mode || count != self.device_count {
            self.reconfigure(settings.mode, count)?;
        }
        Ok(())
    }

    fn reconfigure(&mut self, mode: TopologyMode, count: usize) -> Result<(), CoordinatorError> {
        info!(from = %self.mode, to = %mode, devices = count, "topology changed");
        self.mode = mode;
        self.device_count = count;
        self.events.publish(CoordinatorEvent::TopologyChanged { mode, device_count: count });
        self.apply_wall_mount();
        self.primary.mark_changed();

        let provisioned = self.secondaries.len() + 1;
        if provisioned > count {
            // TODO: deprovision slots beyond the new count instead of parking them.
            warn!(extra = provisioned - count, "slots beyond the new device count stay provisioned");
        }

        match self.state {
            CoordinatorState::Simulating => self.restart_simulation()?,
            CoordinatorState::Active | CoordinatorState::Provisioning if self.primary.is_live() => {
                let target = self.reachable_device_count();
                self.pending = (provisioned..target).collect();
                self.transition(CoordinatorState::Provisioning);
                if self.pending.is_empty() {
                    self.transition(CoordinatorState::Active);
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ── Synchronization ───────────────────────────────────────────────────────

    fn secondary_transform(&self, offset: Vec3) -> Transform {
        let primary = *self.primary.transform();
        Transform {
            position: geometry::world_position(&primary, offset, &self.panel, self.scaling),
            ..primary
        }
    }

    fn sync_secondaries(&mut self) -> Result<(), CoordinatorError> {
        // Slots parked beyond the current device count keep their last pose.
        let synced = (self.secondaries.len() + 1).min(self.device_count);
        let offsets = self.geometry.offsets(self.mode, synced)?;
        let primary = *self.primary.transform();

        for (slot, offset) in self.secondaries.iter_mut().zip(offsets.iter().skip(1)) {
            slot.place(Transform {
                position: geometry::world_position(&primary, *offset, &self.panel, self.scaling),
                ..primary
            });
        }

        self.sync_count += 1;
        trace!(slots = synced - 1, "secondaries synchronized");
        Ok(())
    }

    fn effective_wall_mount(&self) -> bool {
        self.wall_mount_cache || self.mode.forces_wall_mount()
    }

    fn apply_wall_mount(&mut self) {
        let wall_mount = self.effective_wall_mount();
        let changed = self.primary.wall_mount() != wall_mount;
        self.primary.set_wall_mount(wall_mount);
        for slot in &mut self.secondaries {
            slot.set_wall_mount(wall_mount);
        }
        if changed {
            debug!(wall_mount, "wall-mount orientation propagated");
            self.events.publish(CoordinatorEvent::WallMountChanged { wall_mount });
        }
    }

    // ── Simulation ────────────────────────────────────────────────────────────

    fn enter_simulation(&mut self) -> Result<(), CoordinatorError> {
        self.restart_simulation()?;
        self.transition(CoordinatorState::Simulating);
        Ok(())
    }

    fn restart_simulation(&mut self) -> Result<(), CoordinatorError> {
        let driver = SimulationDriver::new(&self.geometry, self.mode, self.device_count)?;
        self.primary
            .set_presence_offset(driver.presence_offset(&self.panel, self.scaling));
        self.current_index = driver.position();
        self.simulation = Some(driver);
        Ok(())
    }

    fn simulation_step(&mut self, settings: &DisplaySettings, dt: Duration) {
        let Some(driver) = self.simulation.as_mut() else {
            return;
        };
        if let Some(position) = driver.advance(dt, settings.effective_switch_interval()) {
            let offset = driver.current_offset();
            debug!(position, "simulated position advanced");
            self.current_index = position;
            self.events.publish(CoordinatorEvent::SimulationAdvanced { position, offset });
        }
        self.primary
            .set_presence_offset(driver.presence_offset(&self.panel, self.scaling));
    }

    // ── Housekeeping ──────────────────────────────────────────────────────────

    fn transition(&mut self, to: CoordinatorState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        debug!(?from, ?to, "coordinator state changed");
        self.events.publish(CoordinatorEvent::StateChanged { from, to });
    }

    fn publish_if_unavailable(&mut self) {
        if !self.allocator.availability().is_available() {
            self.events.publish(CoordinatorEvent::HardwareUnavailable);
        }
    }

    fn retire(&mut self, mut session: Session) {
        if session.poll() == SessionState::Starting {
            debug!(session = %session.id(), "session still starting; teardown deferred");
            self.retiring.push(session);
        } else {
            session.destroy();
        }
    }

    fn reap_retiring(&mut self) {
        self.retiring.retain_mut(|session| {
            if session.poll() == SessionState::Starting {
                return true;
            }
            session.destroy();
            false
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use mockall::{mock, Sequence};
    use srd_core::domain::geometry::REFERENCE_BODY_WIDTH;
    use srd_core::{AllocationError, HardwareAvailability, Quat};

    use super::*;
    use crate::infrastructure::platform::SimulatedDisplayPlatform;
    use crate::infrastructure::session_backend::{
        BackendEvent, SimulatedBackendConfig, SimulatedSessionBackend,
    };

    mock! {
        pub Platform {}
        impl DisplayPlatform for Platform {
            fn connected_device_count(&self) -> usize;
            fn display_target(&self, device_index: usize) -> Option<usize>;
            fn activate_display(&self, target: usize) -> Result<(), PlatformError>;
        }
    }

    const FRAME: Duration = Duration::from_millis(16);
    const EPS: f32 = 1e-5;

    struct Harness {
        coordinator: MultiDisplayCoordinator,
        backend: SimulatedSessionBackend,
        platform: Arc<SimulatedDisplayPlatform>,
    }

    fn harness(config: SimulatedBackendConfig) -> Harness {
        let devices = config.devices;
        let backend = SimulatedSessionBackend::new(config);
        let platform = Arc::new(SimulatedDisplayPlatform::new(devices));
        let allocator = Arc::new(SessionAllocator::new(
            Arc::new(backend.clone()),
            HardwareAvailability::new(),
        ));
        let coordinator = MultiDisplayCoordinator::new(
            allocator,
            Arc::clone(&platform) as Arc<dyn DisplayPlatform>,
            Arc::new(GeometryTable::standard()),
            "SRDisplayManager",
        );
        Harness {
            coordinator,
            backend,
            platform,
        }
    }

    fn devices(n: usize) -> SimulatedBackendConfig {
        SimulatedBackendConfig {
            devices: n,
            ..SimulatedBackendConfig::default()
        }
    }

    fn row(count: usize) -> DisplaySettings {
        DisplaySettings {
            mode: TopologyMode::HorizontalRow,
            device_count: count,
            ..DisplaySettings::default()
        }
    }

    fn tick_until_settled(c: &mut MultiDisplayCoordinator, settings: &DisplaySettings) {
        for _ in 0..100 {
            if c.state() != CoordinatorState::Provisioning {
                return;
            }
            c.tick(settings, FRAME).unwrap();
        }
        panic!("provisioning did not settle");
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CoordinatorEvent>) -> Vec<CoordinatorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ── Start-up ──────────────────────────────────────────────────────────────

    #[test]
    fn test_single_mode_goes_straight_to_active_with_primary_only() {
        let mut h = harness(devices(1));

        h.coordinator.start(&DisplaySettings::default()).unwrap();

        assert_eq!(h.coordinator.state(), CoordinatorState::Active);
        assert_eq!(h.coordinator.active_slot_count(), 1);
        assert!(h.coordinator.secondaries().is_empty());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut h = harness(devices(1));
        h.coordinator.start(&DisplaySettings::default()).unwrap();
        assert_eq!(
            h.coordinator.start(&DisplaySettings::default()),
            Err(CoordinatorError::AlreadyStarted(CoordinatorState::Active))
        );
    }

    #[test]
    fn test_unavailable_hardware_degrades_to_zero_slots() {
        let mut h = harness(devices(3));
        let (_, mut rx) = h.coordinator.subscribe();
        h.coordinator.allocator.availability().mark_unavailable();

        h.coordinator.start(&row(3)).unwrap();
        h.coordinator.tick(&row(3), FRAME).unwrap();

        assert_eq!(h.coordinator.state(), CoordinatorState::Active);
        assert_eq!(h.coordinator.active_slot_count(), 0);
        assert_eq!(h.backend.created_count(), 0);
        assert!(drain(&mut rx).contains(&CoordinatorEvent::HardwareUnavailable));
    }

    #[test]
    fn test_run_without_device_never_touches_backend() {
        let mut h = harness(devices(3));
        let settings = DisplaySettings {
            run_without_device: true,
            ..row(3)
        };

        h.coordinator.start(&settings).unwrap();

        assert_eq!(h.coordinator.state(), CoordinatorState::Active);
        assert_eq!(h.backend.created_count(), 0);
    }

    #[test]
    fn test_target_count_is_capped_by_connected_devices() {
        let mut h = harness(devices(2));
        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));

        assert_eq!(h.coordinator.active_slot_count(), 2);
        assert_eq!(h.coordinator.state(), CoordinatorState::Active);
    }

    // ── Sequential provisioning ───────────────────────────────────────────────

    #[test]
    fn test_each_slot_is_created_only_after_previous_reports_running() {
        let mut h = harness(SimulatedBackendConfig {
            devices: 4,
            startup_polls: 3,
            ..SimulatedBackendConfig::default()
        });
        let settings = DisplaySettings {
            mode: TopologyMode::VerticalStack,
            device_count: 4,
            ..DisplaySettings::default()
        };

        h.coordinator.start(&settings).unwrap();
        tick_until_settled(&mut h.coordinator, &settings);

        let log = h.backend.events();
        for device in 1..4 {
            let created = log
                .iter()
                .position(|e| *e == BackendEvent::Created { device })
                .expect("device created");
            let previous_running = log
                .iter()
                .position(|e| *e == BackendEvent::Running { device: device - 1 })
                .expect("previous device running");
            assert!(previous_running < created, "device {device} created too early: {log:?}");
        }
        assert_eq!(h.coordinator.active_slot_count(), 4);
    }

    #[test]
    fn test_provisioning_suspends_while_previous_slot_is_starting() {
        let mut h = harness(SimulatedBackendConfig {
            devices: 3,
            startup_polls: 5,
            ..SimulatedBackendConfig::default()
        });
        h.coordinator.start(&row(3)).unwrap();

        h.coordinator.tick(&row(3), FRAME).unwrap(); // slot 1 requested
        h.coordinator.tick(&row(3), FRAME).unwrap(); // slot 1 still starting

        assert_eq!(h.coordinator.state(), CoordinatorState::Provisioning);
        assert_eq!(h.coordinator.secondaries().len(), 1);
        assert_eq!(h.coordinator.current_index(), 1);
        assert_eq!(h.coordinator.pending_slots(), 1);
    }

    #[test]
    fn test_display_targets_are_activated_in_slot_order() {
        let mut platform = MockPlatform::new();
        let mut seq = Sequence::new();
        platform.expect_connected_device_count().return_const(3usize);
        platform.expect_display_target().returning(|i| Some(i + 1));
        platform
            .expect_activate_display()
            .withf(|t| *t == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        platform
            .expect_activate_display()
            .withf(|t| *t == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        platform
            .expect_activate_display()
            .withf(|t| *t == 3)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let backend = SimulatedSessionBackend::new(devices(3));
        let allocator = Arc::new(SessionAllocator::new(
            Arc::new(backend),
            HardwareAvailability::new(),
        ));
        let mut c = MultiDisplayCoordinator::new(
            allocator,
            Arc::new(platform),
            Arc::new(GeometryTable::standard()),
            "m",
        );

        c.start(&row(3)).unwrap();
        tick_until_settled(&mut c, &row(3));

        assert_eq!(c.secondaries()[0].target_display(), Some(2));
        assert_eq!(c.secondaries()[1].target_display(), Some(3));
        assert_eq!(c.primary().target_display(), Some(1));
    }

    // ── Halts ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_activation_failure_halts_and_keeps_running_slots() {
        let mut h = harness(SimulatedBackendConfig {
            devices: 3,
            startup_polls: 3,
            ..SimulatedBackendConfig::default()
        });
        h.platform.fail_activation_of(3);
        let (_, mut rx) = h.coordinator.subscribe();

        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));

        assert_eq!(h.coordinator.state(), CoordinatorState::Active);
        assert_eq!(h.coordinator.active_slot_count(), 2);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            CoordinatorEvent::ProvisioningHalted {
                provisioned: 2,
                requested: 3,
                reason: HaltReason::Platform(_)
            }
        )));

        // The failed slot's start is still in flight; it is released only
        // after its handshake resolves.
        assert!(h.coordinator.has_pending_teardown());
        assert_eq!(h.backend.live_count(), 3);
        for _ in 0..5 {
            h.coordinator.tick(&row(3), FRAME).unwrap();
        }
        assert!(!h.coordinator.has_pending_teardown());
        assert_eq!(h.backend.live_count(), 2);
        let log = h.backend.events();
        let running = log.iter().position(|e| *e == BackendEvent::Running { device: 2 });
        let destroyed = log.iter().position(|e| *e == BackendEvent::Destroyed { device: 2 });
        assert!(running.is_some(), "device 2 never finished starting: {log:?}");
        assert!(running < destroyed, "device 2 destroyed mid-start: {log:?}");
    }

    #[test]
    fn test_primary_activation_failure_halts_but_keeps_primary_session() {
        let mut h = harness(devices(3));
        h.platform.fail_activation_of(1);
        let (_, mut rx) = h.coordinator.subscribe();

        h.coordinator.start(&row(3)).unwrap();

        assert_eq!(h.coordinator.state(), CoordinatorState::Active);
        assert!(h.coordinator.primary().is_live());
        assert_eq!(h.coordinator.primary().target_display(), None);
        assert_eq!(h.coordinator.pending_slots(), 0);
        assert_eq!(h.backend.created_count(), 1);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            CoordinatorEvent::ProvisioningHalted {
                provisioned: 1,
                requested: 3,
                reason: HaltReason::Platform(_)
            }
        )));
    }

    #[test]
    fn test_failed_handshake_halts_and_flips_availability() {
        let mut h = harness(SimulatedBackendConfig {
            devices: 3,
            fail_handshake: Some(1),
            ..SimulatedBackendConfig::default()
        });
        let (_, mut rx) = h.coordinator.subscribe();

        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));

        assert_eq!(h.coordinator.active_slot_count(), 1);
        assert!(h.coordinator.secondaries().is_empty());
        assert!(!h.coordinator.allocator.availability().is_available());
        let events = drain(&mut rx);
        assert!(events.contains(&CoordinatorEvent::HardwareUnavailable));
        assert!(events.iter().any(|e| {
            matches!(e, CoordinatorEvent::ProvisioningHalted { reason, .. }
                if matches!(reason.allocation_error(), Some(AllocationError::SessionStartFailed { .. })))
        }));
    }

    #[test]
    fn test_late_failure_of_last_slot_is_dropped_after_activation() {
        let mut h = harness(SimulatedBackendConfig {
            devices: 3,
            fail_handshake: Some(2),
            ..SimulatedBackendConfig::default()
        });
        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));
        assert_eq!(h.coordinator.secondaries().len(), 2);

        h.coordinator.tick(&row(3), FRAME).unwrap();

        assert_eq!(h.coordinator.secondaries().len(), 1);
        assert_eq!(h.coordinator.active_slot_count(), 2);
        assert!(!h.coordinator.allocator.availability().is_available());
    }

    // ── Synchronization ───────────────────────────────────────────────────────

    #[test]
    fn test_horizontal_row_places_secondaries_one_body_width_apart() {
        let mut h = harness(devices(3));
        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));

        let s = h.coordinator.secondaries();
        assert!(s[0].transform().position.approx_eq(Vec3::new(REFERENCE_BODY_WIDTH, 0.0, 0.0), EPS));
        assert!(s[1].transform().position.approx_eq(Vec3::new(-REFERENCE_BODY_WIDTH, 0.0, 0.0), EPS));
    }

    #[test]
    fn test_unchanged_primary_does_not_recompute_secondaries() {
        let mut h = harness(devices(3));
        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));
        let before = h.coordinator.sync_count();

        h.coordinator.tick(&row(3), FRAME).unwrap();
        h.coordinator.tick(&row(3), FRAME).unwrap();

        assert_eq!(h.coordinator.sync_count(), before);
    }

    #[test]
    fn test_moving_primary_recomputes_once_per_tick() {
        let mut h = harness(devices(2));
        h.coordinator.start(&row(2)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(2));
        let before = h.coordinator.sync_count();

        h.coordinator.primary_mut().set_position(Vec3::new(0.0, 1.0, 0.0));
        h.coordinator.tick(&row(2), FRAME).unwrap();

        assert_eq!(h.coordinator.sync_count(), before + 1);
        let moved = h.coordinator.secondaries()[0].transform().position;
        assert!(moved.approx_eq(Vec3::new(REFERENCE_BODY_WIDTH, 1.0, 0.0), EPS));
    }

    #[test]
    fn test_secondaries_copy_primary_rotation_and_view_scale() {
        let mut h = harness(devices(2));
        h.coordinator.start(&row(2)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(2));
        let rotation = Quat::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.5);

        h.coordinator.primary_mut().set_rotation(rotation);
        h.coordinator.primary_mut().set_view_scale(2.5);
        h.coordinator.tick(&row(2), FRAME).unwrap();

        let t = h.coordinator.secondaries()[0].transform();
        assert_eq!(t.rotation, rotation);
        assert_eq!(t.view_scale, 2.5);
    }

    #[test]
    fn test_switching_to_scaled_size_divides_offset_by_scale_factor() {
        let mut h = harness(devices(3));
        let panel = PanelInfo {
            scale_factor: 2.0,
            ..PanelInfo::reference()
        };
        let absolute = DisplaySettings {
            scaling: ScalingMode::Absolute,
            panel,
            ..row(3)
        };
        let scaled = DisplaySettings {
            scaling: ScalingMode::ScaledSize,
            ..absolute.clone()
        };
        h.coordinator.start(&absolute).unwrap();
        tick_until_settled(&mut h.coordinator, &absolute);
        let origin = Vec3::new(1.0, -2.0, 0.5);
        h.coordinator.primary_mut().set_position(origin);
        h.coordinator
            .primary_mut()
            .set_rotation(Quat::from_axis_angle(Vec3::new(1.0, 1.0, 0.0), 0.7));
        h.coordinator.tick(&absolute, FRAME).unwrap();
        let before: Vec<Vec3> = h
            .coordinator
            .secondaries()
            .iter()
            .map(|s| s.transform().position - origin)
            .collect();

        h.coordinator.tick(&scaled, FRAME).unwrap();

        for (slot, abs) in h.coordinator.secondaries().iter().zip(before) {
            let rel = slot.transform().position - origin;
            assert!((rel * 2.0).approx_eq(abs, EPS), "{rel:?} vs {abs:?}");
        }
    }

    // ── Wall mount ────────────────────────────────────────────────────────────

    #[test]
    fn test_vertical_stack_forces_wall_mount_on_every_slot() {
        let mut h = harness(devices(3));
        let settings = DisplaySettings {
            mode: TopologyMode::VerticalStack,
            device_count: 3,
            ..DisplaySettings::default()
        };

        h.coordinator.start(&settings).unwrap();
        tick_until_settled(&mut h.coordinator, &settings);

        assert!(h.coordinator.primary().wall_mount());
        assert!(h.coordinator.secondaries().iter().all(DeviceSlot::wall_mount));
    }

    #[test]
    fn test_primary_wall_mount_toggle_propagates_next_tick() {
        let mut h = harness(devices(3));
        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));
        assert!(!h.coordinator.secondaries()[0].wall_mount());

        h.coordinator.primary_mut().set_wall_mount_preference(true);
        h.coordinator.tick(&row(3), FRAME).unwrap();

        assert!(h.coordinator.secondaries().iter().all(DeviceSlot::wall_mount));

        h.coordinator.primary_mut().set_wall_mount_preference(false);
        h.coordinator.tick(&row(3), FRAME).unwrap();

        assert!(!h.coordinator.secondaries().iter().any(DeviceSlot::wall_mount));
    }

    // ── Runtime configuration changes ─────────────────────────────────────────

    #[test]
    fn test_raising_device_count_while_active_provisions_new_slot() {
        let mut h = harness(devices(3));
        let (_, mut rx) = h.coordinator.subscribe();
        h.coordinator.start(&row(2)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(2));
        assert_eq!(h.coordinator.active_slot_count(), 2);

        h.coordinator.tick(&row(3), FRAME).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));

        assert_eq!(h.coordinator.active_slot_count(), 3);
        assert!(drain(&mut rx).contains(&CoordinatorEvent::TopologyChanged {
            mode: TopologyMode::HorizontalRow,
            device_count: 3
        }));
    }

    #[test]
    fn test_shrinking_topology_keeps_extra_slots_parked() {
        let mut h = harness(devices(4));
        let stack = DisplaySettings {
            mode: TopologyMode::VerticalStack,
            device_count: 4,
            ..DisplaySettings::default()
        };
        h.coordinator.start(&stack).unwrap();
        tick_until_settled(&mut h.coordinator, &stack);

        h.coordinator.tick(&row(3), FRAME).unwrap();

        assert_eq!(h.coordinator.state(), CoordinatorState::Active);
        assert_eq!(h.coordinator.active_slot_count(), 4);
        assert!(!h.coordinator.primary().wall_mount());
    }

    // ── Simulation ────────────────────────────────────────────────────────────

    #[test]
    fn test_simulation_cycles_primary_without_activating_displays() {
        let mut platform = MockPlatform::new();
        platform.expect_activate_display().never();
        platform.expect_connected_device_count().return_const(1usize);
        platform.expect_display_target().returning(|_| Some(0));
        let allocator = Arc::new(SessionAllocator::new(
            Arc::new(SimulatedSessionBackend::new(devices(1))),
            HardwareAvailability::new(),
        ));
        let mut c = MultiDisplayCoordinator::new(
            allocator,
            Arc::new(platform),
            Arc::new(GeometryTable::standard()),
            "m",
        );
        let settings = DisplaySettings {
            simulate: true,
            position_switch_interval_secs: 1.0,
            ..row(3)
        };
        let (_, mut rx) = c.subscribe();

        c.start(&settings).unwrap();
        assert_eq!(c.state(), CoordinatorState::Simulating);
        assert_eq!(c.primary().presence_offset(), Vec3::ZERO);

        c.tick(&settings, Duration::from_secs(1)).unwrap();

        assert_eq!(c.current_index(), 1);
        assert!(c
            .primary()
            .presence_offset()
            .approx_eq(Vec3::new(REFERENCE_BODY_WIDTH, 0.0, 0.0), EPS));
        assert!(c.secondaries().is_empty());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, CoordinatorEvent::SimulationAdvanced { position: 1, .. })));
    }

    #[test]
    fn test_simulation_continues_without_any_device() {
        let mut h = harness(devices(0));
        let settings = DisplaySettings {
            simulate: true,
            ..row(2)
        };

        h.coordinator.start(&settings).unwrap();

        assert_eq!(h.coordinator.state(), CoordinatorState::Simulating);
        assert_eq!(h.coordinator.active_slot_count(), 0);
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    #[test]
    fn test_shutdown_releases_secondaries_before_primary() {
        let mut h = harness(devices(3));
        h.coordinator.start(&row(3)).unwrap();
        tick_until_settled(&mut h.coordinator, &row(3));

        h.coordinator.shutdown();

        let destroyed: Vec<usize> = h
            .backend
            .events()
            .into_iter()
            .filter_map(|e| match e {
                BackendEvent::Destroyed { device } => Some(device),
                _ => None,
            })
            .collect();
        assert_eq!(destroyed, vec![2, 1, 0]);
        assert_eq!(h.coordinator.state(), CoordinatorState::Idle);
        assert_eq!(h.backend.live_count(), 0);
    }

    #[test]
    fn test_shutdown_defers_release_of_starting_session() {
        let mut h = harness(SimulatedBackendConfig {
            devices: 2,
            startup_polls: 3,
            ..SimulatedBackendConfig::default()
        });
        h.coordinator.start(&row(2)).unwrap();
        h.coordinator.tick(&row(2), FRAME).unwrap(); // slot 1 starting

        h.coordinator.shutdown();

        assert!(h.coordinator.has_pending_teardown());
        assert_eq!(h.backend.live_count(), 1);
        for _ in 0..5 {
            h.coordinator.tick(&row(2), FRAME).unwrap();
        }
        assert!(!h.coordinator.has_pending_teardown());
        assert_eq!(h.backend.live_count(), 0);
    }
}
