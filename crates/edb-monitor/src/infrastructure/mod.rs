//! Infrastructure layer for the monitor.
//!
//! OS-facing adapters: the serial transport to the debugger board (plus the
//! scripted mock and the raw receive recorder) and TOML configuration
//! storage.
//!
//! The `transport` traits are the seam the application layer depends on;
//! concrete ports are chosen only by the binary.

pub mod storage;
pub mod transport;
