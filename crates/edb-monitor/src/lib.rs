//! edb-monitor library entry point.
//!
//! Exposes the session layer, the console and the transports so that the
//! binary in `main.rs` and the integration tests in `tests/` share one module
//! tree.

pub mod application;
pub mod cli;
pub mod infrastructure;
