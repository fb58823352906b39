//! Operator-facing layer: keyword abbreviation and the line console.
//!
//! Nothing here talks to the device directly; every command goes through
//! [`crate::application::session::Session`].

pub mod console;
pub mod keyword;
