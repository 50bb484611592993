//! Application layer: use cases that depend only on `srd-core` types and on
//! the collaborator traits declared here.
//!
//! - [`coordinator`] – the multi-display state machine.
//! - [`device_slot`] – one logical display manager per physical device.
//! - [`simulation`] – single-device emulation of a multi-device layout.
//! - [`events`] – observer registration and event fan-out.
//! - [`settings`] – the per-tick configuration snapshot.

pub mod coordinator;
pub mod device_slot;
pub mod events;
pub mod settings;
pub mod simulation;
