//! Domain entities for multi-device spatial displays.
//!
//! This module contains pure data and math with no infrastructure
//! dependencies.  Everything here can be compiled and tested on any machine,
//! with or without a display attached.
//!
//! - **`math`** – Minimal 3-D vector, quaternion, and transform types.
//! - **`topology`** – The supported device arrangements and their per-mode
//!   configuration bounds.
//! - **`geometry`** – Physical reference dimensions, the offset table for every
//!   topology, and the scaling rule that maps a table offset into world space.

pub mod geometry;
pub mod math;
pub mod topology;
