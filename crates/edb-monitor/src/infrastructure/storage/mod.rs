//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads `monitor.toml` from the platform config
//! directory (or an explicit path), fills in defaults for anything missing,
//! and can write the effective configuration back.

pub mod config;
