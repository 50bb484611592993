//! Simulated device-session backend.
//!
//! # Why a simulated backend?
//!
//! The real device SDK needs physical displays plugged in, and its start
//! handshake takes a variable number of frames to complete.  The simulated
//! backend replaces it with in-memory devices so the coordinator can be run
//! (and tested) anywhere:
//!
//! - `devices` sets how many devices are "connected".  A device is claimed by
//!   the session created on it and freed again when that session is destroyed.
//! - `startup_polls` sets how many readiness polls an asynchronous start takes
//!   before the device reports running.
//! - `reject_start` and `fail_handshake` inject the two kinds of start failure:
//!   refused outright, or accepted and failing later.
//!
//! Every lifecycle step is appended to a shared log ([`BackendEvent`]) so
//! tests can assert on the order devices were brought up and released.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use srd_core::{DeviceSession, SessionBackend};
use tracing::{debug, trace};

/// One entry of the backend's lifecycle log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    Created { device: usize },
    StartRequested { device: usize },
    Running { device: usize },
    Destroyed { device: usize },
}

/// Behaviour of the simulated devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedBackendConfig {
    pub devices: usize,
    /// Readiness polls an asynchronous start takes before it reports running.
    pub startup_polls: u32,
    /// Device whose start request is refused.
    pub reject_start: Option<usize>,
    /// Device whose asynchronous handshake fails once `startup_polls` elapse.
    pub fail_handshake: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    config: SimulatedBackendConfig,
    in_use: Mutex<Vec<bool>>,
    log: Mutex<Vec<BackendEvent>>,
    created: AtomicUsize,
}

impl Shared {
    fn record(&self, event: BackendEvent) {
        trace!(?event, "simulated backend");
        lock(&self.log).push(event);
    }

    fn claim(&self) -> Option<usize> {
        let mut in_use = lock(&self.in_use);
        let device = in_use.iter().position(|used| !used)?;
        in_use[device] = true;
        Some(device)
    }

    fn release(&self, device: usize) {
        if let Some(used) = lock(&self.in_use).get_mut(device) {
            *used = false;
        }
    }
}

/// A `SessionBackend` backed by in-memory devices.  Clones share devices and
/// log.
#[derive(Debug, Clone)]
pub struct SimulatedSessionBackend {
    shared: Arc<Shared>,
}

impl SimulatedSessionBackend {
    pub fn new(config: SimulatedBackendConfig) -> Self {
        let devices = config.devices;
        Self {
            shared: Arc::new(Shared {
                config,
                in_use: Mutex::new(vec![false; devices]),
                log: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
            }),
        }
    }

    /// `devices` devices that start instantly and never fail.
    pub fn with_devices(devices: usize) -> Self {
        Self::new(SimulatedBackendConfig {
            devices,
            ..SimulatedBackendConfig::default()
        })
    }

    /// Snapshot of the lifecycle log.
    pub fn events(&self) -> Vec<BackendEvent> {
        lock(&self.shared.log).clone()
    }

    /// Sessions created over the backend's lifetime.
    pub fn created_count(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Devices currently claimed by an undestroyed session.
    pub fn live_count(&self) -> usize {
        lock(&self.shared.in_use).iter().filter(|used| **used).count()
    }

    fn open(&self, device: usize) -> Box<dyn DeviceSession> {
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        self.shared.record(BackendEvent::Created { device });
        let config = &self.shared.config;
        Box::new(SimulatedSession {
            device,
            shared: Arc::clone(&self.shared),
            polls_left: AtomicU32::new(config.startup_polls),
            rejects_start: config.reject_start == Some(device),
            handshake_fails: config.fail_handshake == Some(device),
            started: false,
            running: AtomicBool::new(false),
        })
    }
}

impl SessionBackend for SimulatedSessionBackend {
    fn create_session(&self) -> Option<Box<dyn DeviceSession>> {
        let device = self.shared.claim()?;
        Some(self.open(device))
    }

    fn create_sessions(&self, max: usize) -> Option<Vec<Box<dyn DeviceSession>>> {
        if self.shared.config.devices == 0 {
            return None;
        }
        let mut sessions = Vec::new();
        while sessions.len() < max {
            match self.shared.claim() {
                Some(device) => sessions.push(self.open(device)),
                None => break,
            }
        }
        debug!(requested = max, created = sessions.len(), "simulated batch created");
        Some(sessions)
    }
}

/// One simulated device session.
#[derive(Debug)]
pub struct SimulatedSession {
    device: usize,
    shared: Arc<Shared>,
    polls_left: AtomicU32,
    rejects_start: bool,
    handshake_fails: bool,
    started: bool,
    running: AtomicBool,
}

impl SimulatedSession {
    fn mark_running(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.shared.record(BackendEvent::Running { device: self.device });
        }
    }
}

impl DeviceSession for SimulatedSession {
    fn start(&mut self) -> bool {
        self.shared
            .record(BackendEvent::StartRequested { device: self.device });
        if self.rejects_start || self.handshake_fails {
            return false;
        }
        self.started = true;
        self.mark_running();
        true
    }

    fn start_async(&mut self) -> bool {
        self.shared
            .record(BackendEvent::StartRequested { device: self.device });
        if self.rejects_start {
            return false;
        }
        self.started = true;
        true
    }

    fn is_running(&self) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return true;
        }
        if !self.started {
            return false;
        }
        let left = self.polls_left.load(Ordering::SeqCst);
        if left > 0 {
            self.polls_left.store(left - 1, Ordering::SeqCst);
            return false;
        }
        if self.handshake_fails {
            return false;
        }
        self.mark_running();
        true
    }

    fn start_failed(&self) -> bool {
        self.started && self.handshake_fails && self.polls_left.load(Ordering::SeqCst) == 0
    }

    fn destroy(&mut self) {
        self.shared.record(BackendEvent::Destroyed { device: self.device });
        self.shared.release(self.device);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
