//! Application layer: the debug session and the operations built on it.
//!
//! # What lives here (for beginners)
//!
//! The *application* layer turns protocol messages (from `edb_core`) into
//! operator-level actions such as "halt the target" or "stream Vcap to a
//! file".  It talks to the board only through the
//! [`Transport`](crate::infrastructure::transport::Transport) trait, so every
//! use case here runs unchanged against the scripted mock device in tests.
//!
//! # Sub-modules
//!
//! - **`session`**  – The state machine (Detached / Running / Halted), the
//!   one-command-at-a-time rule, cancellation, and the event pump that every
//!   other operation is built on.
//!
//! - **`commands`** – The board's command set (power, charge, breakpoints,
//!   memory access, parameters, ...) as methods on the session.
//!
//! - **`stream`**   – Sample capture: pairs TIME samples with channel samples
//!   and hands the records to a sink.
//!
//! - **`observer`** – The seam through which asynchronous events (watchpoint
//!   hits, target std-I/O, interrupt contexts) leave the session.

pub mod commands;
pub mod observer;
pub mod session;
pub mod stream;
