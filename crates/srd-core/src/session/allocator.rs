//! SessionAllocator: the single entry point for claiming display hardware.
//!
//! Every path that creates a device session goes through here so that
//! failures degrade gracefully instead of crashing callers:
//!
//! - The shared [`HardwareAvailability`] flag is checked first.  Once it is
//!   `false`, allocation fails with [`AllocationError::HardwareUnavailable`]
//!   without calling the backend at all.
//! - A failed creation or a failed start flips the flag.  A failed start also
//!   destroys the half-created session before the error is returned.
//! - Nothing is retried automatically.
//!
//! # Partial batches
//!
//! [`SessionAllocator::allocate_multiple`] starts sessions in order and stops
//! at the first one that fails.  Sessions that started before the failure are
//! kept and returned to the caller in a [`BatchAllocation`] together with the
//! error; the failing session and any not-yet-started ones are destroyed.  Only
//! when not a single session started is the whole call an `Err`.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::availability::HardwareAvailability;
use super::{Session, SessionBackend, SessionId, SessionState};

/// Why an allocation attempt failed.  Terminal for that attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// No device could be claimed; no resources were touched.
    #[error("display hardware is unavailable")]
    HardwareUnavailable,

    /// The session was created but its start handshake failed; it has been
    /// destroyed.
    #[error("session {session} failed to start")]
    SessionStartFailed { session: SessionId },
}

/// Outcome of [`SessionAllocator::allocate_multiple`].
#[derive(Debug)]
pub struct BatchAllocation {
    /// Sessions whose start was accepted, in device order.
    pub sessions: Vec<Session>,
    /// The `max` the caller asked for.
    pub requested: usize,
    /// The failure that cut the batch short, if any.
    pub failure: Option<AllocationError>,
}

impl BatchAllocation {
    /// `true` when no session in the batch failed.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Number of requested slots that did not receive a session.
    pub fn unavailable_slots(&self) -> usize {
        self.requested.saturating_sub(self.sessions.len())
    }
}

/// Creates, starts, and on failure tears down device sessions.
pub struct SessionAllocator {
    backend: Arc<dyn SessionBackend>,
    availability: HardwareAvailability,
}

impl SessionAllocator {
    pub fn new(backend: Arc<dyn SessionBackend>, availability: HardwareAvailability) -> Self {
        Self {
            backend,
            availability,
        }
    }

    /// The shared availability flag this allocator reads and writes.
    pub fn availability(&self) -> &HardwareAvailability {
        &self.availability
    }

    /// Creates a session and starts it synchronously.
    ///
    /// Blocks until the device reports ready or refuses.
    ///
    /// # Errors
    ///
    /// [`AllocationError::HardwareUnavailable`] if the flag is already down or
    /// no device could be created; [`AllocationError::SessionStartFailed`] if
    /// the start handshake failed.
    pub fn allocate_blocking(&self) -> Result<Session, AllocationError> {
        let mut session = self.create()?;
        if !session.start_blocking() {
            return Err(self.fail_start(session));
        }
        info!(session = %session.id(), "session started");
        Ok(session)
    }

    /// Creates a session and requests an asynchronous start.
    ///
    /// The returned session is `Starting`; completion is observed with
    /// [`resolve`](SessionAllocator::resolve) or [`Session::poll`].
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`allocate_blocking`](SessionAllocator::allocate_blocking),
    /// evaluated at request time.
    pub fn allocate_async(&self) -> Result<Session, AllocationError> {
        let mut session = self.create()?;
        if !session.start_async() {
            return Err(self.fail_start(session));
        }
        debug!(session = %session.id(), "session start requested");
        Ok(session)
    }

    /// Polls an asynchronously started session and applies the failure policy
    /// at handshake-completion time.
    ///
    /// # Errors
    ///
    /// [`AllocationError::SessionStartFailed`] once the handshake has failed.
    /// The session is destroyed in place and the availability flag flipped.
    pub fn resolve(&self, session: &mut Session) -> Result<SessionState, AllocationError> {
        match session.poll() {
            SessionState::Failed => {
                let id = session.id();
                session.destroy();
                self.availability.mark_unavailable();
                warn!(session = %id, "session start handshake failed");
                Err(AllocationError::SessionStartFailed { session: id })
            }
            state => Ok(state),
        }
    }

    /// Creates and starts up to `max` sessions.
    ///
    /// # Errors
    ///
    /// `Err` only when nothing could be allocated: the flag is down, the
    /// backend could not create sessions, or the very first start failed.
    /// Later failures are reported in [`BatchAllocation::failure`].
    pub fn allocate_multiple(&self, max: usize) -> Result<BatchAllocation, AllocationError> {
        if !self.availability.is_available() {
            debug!("multi-session allocation skipped: hardware unavailable");
            return Err(AllocationError::HardwareUnavailable);
        }

        let Some(handles) = self.backend.create_sessions(max) else {
            self.availability.mark_unavailable();
            warn!(max, "multi-session creation failed");
            return Err(AllocationError::HardwareUnavailable);
        };

        let mut sessions = Vec::with_capacity(handles.len());
        let mut failure = None;
        let mut pending = handles.into_iter().map(Session::new);

        for mut session in pending.by_ref() {
            if session.start_async() {
                sessions.push(session);
            } else {
                failure = Some(self.fail_start(session));
                break;
            }
        }
        // Created but never started; release them before reporting.
        for mut session in pending {
            session.destroy();
        }

        match failure {
            Some(err) if sessions.is_empty() => Err(err),
            failure => {
                info!(
                    started = sessions.len(),
                    requested = max,
                    partial = failure.is_some(),
                    "multi-session allocation finished"
                );
                Ok(BatchAllocation {
                    sessions,
                    requested: max,
                    failure,
                })
            }
        }
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn create(&self) -> Result<Session, AllocationError> {
        if !self.availability.is_available() {
            debug!("session allocation skipped: hardware unavailable");
            return Err(AllocationError::HardwareUnavailable);
        }
        match self.backend.create_session() {
            Some(handle) => Ok(Session::new(handle)),
            None => {
                self.availability.mark_unavailable();
                warn!("session creation failed");
                Err(AllocationError::HardwareUnavailable)
            }
        }
    }

    fn fail_start(&self, mut session: Session) -> AllocationError {
        let id = session.id();
        session.destroy();
        self.availability.mark_unavailable();
        warn!(session = %id, "session start failed; session destroyed");
        AllocationError::SessionStartFailed { session: id }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::session::test_support::FakeBackend;

    fn allocator(backend: FakeBackend) -> (SessionAllocator, Arc<crate::session::test_support::Probe>) {
        let probe = Arc::clone(&backend.probe);
        (
            SessionAllocator::new(Arc::new(backend), HardwareAvailability::new()),
            probe,
        )
    }

    // ── allocate_blocking ─────────────────────────────────────────────────────

    #[test]
    fn test_allocate_blocking_returns_running_session() {
        let (alloc, _) = allocator(FakeBackend::new(1));
        let session = alloc.allocate_blocking().expect("allocate");
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn test_allocate_blocking_start_failure_destroys_session_and_flips_flag() {
        let mut backend = FakeBackend::new(1);
        backend.start_results = vec![false];
        let (alloc, probe) = allocator(backend);

        let err = alloc.allocate_blocking().unwrap_err();

        assert!(matches!(err, AllocationError::SessionStartFailed { .. }));
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 1);
        assert!(!alloc.availability().is_available());
    }

    #[test]
    fn test_creation_failure_reports_unavailable_and_flips_flag() {
        let (alloc, _) = allocator(FakeBackend::new(0));
        assert_eq!(alloc.allocate_blocking().unwrap_err(), AllocationError::HardwareUnavailable);
        assert!(!alloc.availability().is_available());
    }

    #[test]
    fn test_every_entry_point_fails_fast_once_unavailable() {
        let (alloc, probe) = allocator(FakeBackend::new(4));
        alloc.availability().mark_unavailable();

        for _ in 0..3 {
            assert_eq!(alloc.allocate_blocking().unwrap_err(), AllocationError::HardwareUnavailable);
            assert_eq!(alloc.allocate_async().unwrap_err(), AllocationError::HardwareUnavailable);
            assert_eq!(alloc.allocate_multiple(4).unwrap_err(), AllocationError::HardwareUnavailable);
        }

        assert_eq!(probe.created.load(Ordering::SeqCst), 0, "backend must not be touched");
    }

    // ── allocate_async / resolve ──────────────────────────────────────────────

    #[test]
    fn test_allocate_async_returns_starting_session() {
        let (alloc, _) = allocator(FakeBackend::new(1));
        let session = alloc.allocate_async().expect("allocate");
        assert_eq!(session.state(), SessionState::Starting);
    }

    #[test]
    fn test_allocate_async_rejected_request_tears_down() {
        let mut backend = FakeBackend::new(1);
        backend.start_results = vec![false];
        let (alloc, probe) = allocator(backend);

        assert!(matches!(
            alloc.allocate_async(),
            Err(AllocationError::SessionStartFailed { .. })
        ));
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_reports_running_once_device_ready() {
        let backend = FakeBackend::new(1);
        let running = Arc::clone(&backend.running);
        let (alloc, _) = allocator(backend);
        let mut session = alloc.allocate_async().unwrap();

        assert_eq!(alloc.resolve(&mut session), Ok(SessionState::Starting));
        running.store(true, Ordering::SeqCst);
        assert_eq!(alloc.resolve(&mut session), Ok(SessionState::Running));
    }

    // ── allocate_multiple ─────────────────────────────────────────────────────

    #[test]
    fn test_allocate_multiple_caps_at_connected_devices() {
        let (alloc, _) = allocator(FakeBackend::new(2));
        let batch = alloc.allocate_multiple(4).expect("batch");
        assert_eq!(batch.sessions.len(), 2);
        assert!(batch.is_complete());
        assert_eq!(batch.unavailable_slots(), 2);
    }

    #[test]
    fn test_allocate_multiple_keeps_sessions_started_before_failure() {
        let mut backend = FakeBackend::new(4);
        backend.start_results = vec![true, true, false, true];
        let (alloc, probe) = allocator(backend);

        let batch = alloc.allocate_multiple(4).expect("partial batch");

        assert_eq!(batch.sessions.len(), 2);
        assert!(matches!(batch.failure, Some(AllocationError::SessionStartFailed { .. })));
        // The failing session and the never-started fourth one are released.
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(probe.start_calls.load(Ordering::SeqCst), 3);
        assert!(!alloc.availability().is_available());
    }

    #[test]
    fn test_allocate_multiple_first_failure_is_total_failure() {
        let mut backend = FakeBackend::new(3);
        backend.start_results = vec![false];
        let (alloc, probe) = allocator(backend);

        assert!(matches!(
            alloc.allocate_multiple(3),
            Err(AllocationError::SessionStartFailed { .. })
        ));
        assert_eq!(probe.destroyed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_allocate_multiple_backend_failure_flips_flag() {
        let (alloc, _) = allocator(FakeBackend::new(0));
        assert_eq!(alloc.allocate_multiple(2).unwrap_err(), AllocationError::HardwareUnavailable);
        assert!(!alloc.availability().is_available());
    }
}
