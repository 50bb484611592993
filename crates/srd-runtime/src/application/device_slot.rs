//! DeviceSlot: one logical display manager bound to one physical device.
//!
//! Slot 0 is the primary.  Its transform is driven by the application (the
//! user moves the virtual display rig around the scene) and every secondary
//! follows it at a fixed offset.  Secondaries are spawned from the primary so
//! they inherit its configuration, then bound to their own display target.
//!
//! # Change tracking
//!
//! The coordinator only recomputes secondaries when the primary actually
//! moved.  [`DeviceSlot::set_transform`] raises a dirty flag when the new pose
//! differs from the old one, and [`DeviceSlot::take_changed`] consumes it.  A
//! freshly created slot starts dirty so the first tick always syncs.

use srd_core::{Quat, Session, SessionState, Transform, Vec3};
use tracing::debug;

/// A logical display manager.
#[derive(Debug)]
pub struct DeviceSlot {
    name: String,
    index: usize,
    session: Option<Session>,
    transform: Transform,
    changed: bool,
    /// The user's own wall-mount toggle.  Only meaningful on the primary.
    wall_mount_preference: bool,
    /// The orientation actually rendered, after topology forcing.
    wall_mount: bool,
    target_display: Option<usize>,
    /// Local shift applied by the simulation driver.
    presence_offset: Vec3,
}

impl DeviceSlot {
    /// Creates the primary manager (slot 0) with no session yet.
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: 0,
            session: None,
            transform: Transform::default(),
            changed: true,
            wall_mount_preference: false,
            wall_mount: false,
            target_display: None,
            presence_offset: Vec3::ZERO,
        }
    }

    /// Clones this manager's configuration into a new secondary for `index`.
    ///
    /// The secondary is named `<this name><index>`, starts at this manager's
    /// pose and owns `session`.
    pub fn spawn_secondary(&self, index: usize, session: Session) -> Self {
        let name = format!("{}{}", self.name, index);
        debug!(%name, slot = index, session = %session.id(), "spawning secondary manager");
        Self {
            name,
            index,
            session: Some(session),
            transform: self.transform,
            changed: false,
            wall_mount_preference: self.wall_mount_preference,
            wall_mount: self.wall_mount,
            target_display: None,
            presence_offset: Vec3::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_primary(&self) -> bool {
        self.index == 0
    }

    // ── Session ───────────────────────────────────────────────────────────────

    pub fn attach_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Removes the session from this manager, handing ownership to the caller.
    pub fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    /// Last observed session state, or `None` when the slot has no session.
    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(Session::state)
    }

    /// Whether this slot holds a session that is not destroyed.
    pub fn is_live(&self) -> bool {
        matches!(self.session_state(), Some(s) if s != SessionState::Destroyed)
    }

    // ── Pose ──────────────────────────────────────────────────────────────────

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Moves this manager.  Marks it changed only when the pose differs.
    pub fn set_transform(&mut self, transform: Transform) {
        if transform != self.transform {
            self.transform = transform;
            self.changed = true;
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.set_transform(Transform { position, ..self.transform });
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.set_transform(Transform { rotation, ..self.transform });
    }

    pub fn set_view_scale(&mut self, view_scale: f32) {
        self.set_transform(Transform { view_scale, ..self.transform });
    }

    /// Returns and clears the changed flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Forces the next [`take_changed`](DeviceSlot::take_changed) to report a
    /// change.
    pub(crate) fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Overwrites the pose without raising the changed flag.  Used for
    /// secondaries, whose pose is derived.
    pub(crate) fn place(&mut self, transform: Transform) {
        self.transform = transform;
    }

    // ── Orientation & binding ─────────────────────────────────────────────────

    pub fn wall_mount_preference(&self) -> bool {
        self.wall_mount_preference
    }

    /// Sets the user's own wall-mount toggle.  The coordinator propagates it
    /// on its next tick.
    pub fn set_wall_mount_preference(&mut self, wall_mount: bool) {
        self.wall_mount_preference = wall_mount;
    }

    /// The wall-mount orientation actually in effect.
    pub fn wall_mount(&self) -> bool {
        self.wall_mount
    }

    pub(crate) fn set_wall_mount(&mut self, wall_mount: bool) {
        self.wall_mount = wall_mount;
    }

    pub fn target_display(&self) -> Option<usize> {
        self.target_display
    }

    pub(crate) fn register_target_display(&mut self, target: usize) {
        self.target_display = Some(target);
    }

    pub fn presence_offset(&self) -> Vec3 {
        self.presence_offset
    }

    pub(crate) fn set_presence_offset(&mut self, offset: Vec3) {
        self.presence_offset = offset;
    }
}
