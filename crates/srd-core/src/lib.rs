//! # srd-core
//!
//! Shared library for driving one or more spatial-reality display devices as a
//! single, spatially consistent viewport.  It contains the topology geometry
//! tables, the small amount of 3-D math they need, and the session allocator
//! that mediates every claim on physical display hardware.
//!
//! It has zero dependencies on OS APIs, device SDKs, or rendering code.  The
//! hardware itself is reached through the [`session::SessionBackend`] trait,
//! which the runtime crate implements.
//!
//! # Architecture overview (for beginners)
//!
//! A spatial-reality display is a glasses-free 3-D monitor that tracks the
//! viewer's face.  Several of them can be placed side by side (or stacked, or
//! in a 2×2 grid) to form one large virtual window into the same 3-D scene.
//! One device is the *primary*; every other device is a *secondary* whose
//! virtual camera must follow the primary at a fixed physical offset.
//!
//! - **`domain`** – Pure data and math.  The [`GeometryTable`] says where each
//!   secondary sits relative to the primary for every [`TopologyMode`], and
//!   [`geometry::world_position`] turns that relative offset into a world-space
//!   position for the current primary pose.
//!
//! - **`session`** – The [`SessionAllocator`] creates and starts device
//!   sessions.  Failures never panic: they surface as [`AllocationError`]s and
//!   flip the shared [`HardwareAvailability`] flag so later attempts fail fast.

pub mod domain;
pub mod session;

// Re-export the most-used types at the crate root so callers can write
// `srd_core::GeometryTable` instead of `srd_core::domain::geometry::GeometryTable`.
pub use domain::geometry::{GeometryEntry, GeometryError, GeometryTable, PanelInfo, ScalingMode};
pub use domain::math::{Quat, Transform, Vec3};
pub use domain::topology::{TopologyMode, TopologyParameters};
pub use session::allocator::{AllocationError, BatchAllocation, SessionAllocator};
pub use session::availability::HardwareAvailability;
pub use session::{DeviceSession, Session, SessionBackend, SessionId, SessionState};
