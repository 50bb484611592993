//! Coordinator events and the observer registry that fans them out.
//!
//! Consumers outside the core (tracking feedback, UI overlays, logging sinks)
//! never call into the coordinator to learn what happened.  They register with
//! [`EventHub::subscribe`], receive [`CoordinatorEvent`]s on an unbounded tokio
//! channel, and unregister with [`EventHub::unsubscribe`] on teardown.
//! Dropping the receiver also works: the next publish prunes it.

use srd_core::{AllocationError, GeometryError, SessionId, TopologyMode, Vec3};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use super::coordinator::{CoordinatorState, PlatformError};

/// Handle returned by [`EventHub::subscribe`].
pub type SubscriptionId = u64;

/// Why provisioning stopped before the target device count was reached.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HaltReason {
    #[error("session allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    #[error("no display target for device {device}")]
    NoDisplayTarget { device: usize },

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("slot {slot} has no session to wait on")]
    PreviousSlotInactive { slot: usize },
}

impl HaltReason {
    /// The allocation failure behind this halt, if that is what caused it.
    pub fn allocation_error(&self) -> Option<&AllocationError> {
        match self {
            HaltReason::Allocation(err) => Some(err),
            _ => None,
        }
    }
}

/// Something observable happened inside a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    StateChanged {
        from: CoordinatorState,
        to: CoordinatorState,
    },
    /// A secondary slot was brought up and bound to a display target.
    SlotProvisioned {
        slot: usize,
        target_display: usize,
        session: SessionId,
    },
    /// Provisioning stopped early.  Slots already provisioned stay active.
    ProvisioningHalted {
        provisioned: usize,
        requested: usize,
        reason: HaltReason,
    },
    /// The hardware flag is down; the coordinator runs with what it has.
    HardwareUnavailable,
    TopologyChanged {
        mode: TopologyMode,
        device_count: usize,
    },
    WallMountChanged {
        wall_mount: bool,
    },
    /// The simulated device moved to another position of the layout.
    SimulationAdvanced {
        position: usize,
        offset: Vec3,
    },
    ShutDown,
}

/// Registry of event subscribers.
#[derive(Debug, Default)]
pub struct EventHub {
    next_id: SubscriptionId,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<CoordinatorEvent>)>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new observer.
    pub fn subscribe(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<CoordinatorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Removes an observer.  Returns `false` if `id` was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers `event` to every live subscriber, dropping closed ones.
    pub fn publish(&mut self, event: CoordinatorEvent) {
        trace!(?event, subscribers = self.subscribers.len(), "publishing event");
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}
