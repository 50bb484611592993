//! Device sessions: the exclusive claim on one physical display.
//!
//! The device SDK is reached through two small traits:
//!
//! - [`SessionBackend`] – creates raw session handles (one per connected
//!   device).
//! - [`DeviceSession`] – one raw handle: start it synchronously or
//!   asynchronously, ask whether it is running, destroy it.
//!
//! [`Session`] wraps a raw handle and tracks its lifecycle:
//!
//! ```text
//! Created ──► Starting ──► Running
//!    │            │
//!    └──► Failed ◄┘
//!            │
//!        Destroyed ◄── (any state, on teardown)
//! ```
//!
//! A `Session` is owned by exactly one display manager.  Dropping it destroys
//! the underlying handle if nobody did so explicitly.

pub mod allocator;
pub mod availability;

use tracing::debug;
use uuid::Uuid;

/// Unique identifier of a device session.
pub type SessionId = Uuid;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handle exists; no start requested yet.
    Created,
    /// Asynchronous start handshake in flight.
    Starting,
    /// Device reported ready.
    Running,
    /// Start handshake failed.
    Failed,
    /// Handle released.
    Destroyed,
}

/// A raw session handle provided by the device SDK.
pub trait DeviceSession: Send {
    /// Starts the session and blocks until the device is ready or refuses.
    fn start(&mut self) -> bool;

    /// Requests an asynchronous start.  Returns `false` when the request
    /// itself is rejected; readiness is observed later via [`is_running`].
    ///
    /// [`is_running`]: DeviceSession::is_running
    fn start_async(&mut self) -> bool;

    /// Whether the device has reported ready.
    fn is_running(&self) -> bool;

    /// Whether an asynchronous start handshake has completed unsuccessfully.
    ///
    /// SDKs that cannot report late failures keep the default.
    fn start_failed(&self) -> bool {
        false
    }

    /// Releases the device.
    fn destroy(&mut self);
}

/// Creates raw session handles for connected devices.
pub trait SessionBackend: Send + Sync {
    /// Creates one session, or `None` when no device can be claimed.
    fn create_session(&self) -> Option<Box<dyn DeviceSession>>;

    /// Creates up to `max` sessions in one call, or `None` on failure.
    fn create_sessions(&self, max: usize) -> Option<Vec<Box<dyn DeviceSession>>>;
}

/// An owned device session with tracked state.
pub struct Session {
    id: SessionId,
    state: SessionState,
    handle: Box<dyn DeviceSession>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    /// Wraps a freshly created handle.
    pub fn new(handle: Box<dyn DeviceSession>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Created,
            handle,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Last observed state.  Call [`poll`](Session::poll) to refresh it.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Blocking start.  Moves to `Running` or `Failed`.
    pub(crate) fn start_blocking(&mut self) -> bool {
        let ok = self.handle.start();
        self.state = if ok { SessionState::Running } else { SessionState::Failed };
        ok
    }

    /// Asynchronous start request.  Moves to `Starting` or `Failed`.
    pub(crate) fn start_async(&mut self) -> bool {
        let ok = self.handle.start_async();
        self.state = if ok { SessionState::Starting } else { SessionState::Failed };
        ok
    }

    /// Refreshes the state of a starting session from the device.
    ///
    /// Only `Starting` can change here; every other state is sticky.
    pub fn poll(&mut self) -> SessionState {
        if self.state == SessionState::Starting {
            if self.handle.is_running() {
                self.state = SessionState::Running;
            } else if self.handle.start_failed() {
                self.state = SessionState::Failed;
            }
        }
        self.state
    }

    /// Readiness predicate used to gate sequential provisioning.
    pub fn is_running(&mut self) -> bool {
        self.poll() == SessionState::Running
    }

    /// Releases the device.  Idempotent.
    pub fn destroy(&mut self) {
        if self.state != SessionState::Destroyed {
            self.handle.destroy();
            self.state = SessionState::Destroyed;
            debug!(session = %self.id, "session destroyed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::test_support::{FakeHandle, Probe};
    use super::*;

    fn handle(start_ok: bool, late_failure: bool) -> (Box<FakeHandle>, Arc<Probe>, Arc<AtomicBool>) {
        let probe = Arc::new(Probe::default());
        let running = Arc::new(AtomicBool::new(false));
        let h = Box::new(FakeHandle {
            probe: Arc::clone(&probe),
            start_ok,
            running: Arc::clone(&running),
            late_failure,
        });
        (h, probe, running)
    }

    #[test]
    fn test_new_session_starts_in_created_state() {
        let (h, _, _) = handle(true, false);
        let session = Session::new(h);
        assert_eq!(session.state(), SessionState::Created);
    }

    #[test]
    fn test_async_start_moves_to_running_once_device_reports_ready() {
        let (h, _, running) = handle(true, false);
        let mut session = Session::new(h);
        assert!(session.start_async());
        assert_eq!(session.poll(), SessionState::Starting);

        running.store(true, Ordering::SeqCst);

        assert!(session.is_running());
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn test_poll_reports_late_start_failure() {
        let (h, _, _) = handle(true, true);
        let mut session = Session::new(h);
        session.start_async();
        assert_eq!(session.poll(), SessionState::Failed);
    }

    #[test]
    fn test_rejected_blocking_start_marks_failed() {
        let (h, _, _) = handle(false, false);
        let mut session = Session::new(h);
        assert!(!session.start_blocking());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_destroy_is_idempotent_and_drop_does_not_double_release() {
        let (h, probe, _) = handle(true, false);
        let mut session = Session::new(h);
        session.destroy();
        session.destroy();
        drop(session);
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_device_when_not_destroyed_explicitly() {
        let (h, probe, _) = handle(true, false);
        drop(Session::new(h));
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 1);
    }
}
