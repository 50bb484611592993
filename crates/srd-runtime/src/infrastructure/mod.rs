//! Infrastructure layer for the runtime.
//!
//! Contains the adapters behind the application traits and the I/O the
//! binary needs.
//!
//! **Dependency rule**: this layer may depend on `application` and `srd_core`,
//! but MUST NOT be imported by the `application` or domain layers outside of
//! their tests.
//!
//! # Sub-modules
//!
//! - **`platform`** – [`SimulatedDisplayPlatform`](platform::SimulatedDisplayPlatform),
//!   an in-memory `DisplayPlatform` that maps devices to display targets and
//!   records every activation.
//!
//! - **`session_backend`** – [`SimulatedSessionBackend`](session_backend::SimulatedSessionBackend),
//!   a `SessionBackend` with configurable start-up latency and failure
//!   injection.  It keeps an ordered log of what happened to each device.
//!
//! - **`storage`** – TOML persistence of the settings record.
//!
//! - **`frame_loop`** – the tokio-paced update loop that ticks a coordinator.

pub mod frame_loop;
pub mod platform;
pub mod session_backend;
pub mod storage;
