//! Persistent storage: the TOML settings record.

pub mod config;
