//! Transport boundary: the byte pipe between the monitor and the debugger board.
//!
//! The session only ever sees the [`Transport`] trait.  Production code opens
//! a USB serial port ([`serial::SerialConnector`]); tests script the device
//! side with [`mock::MockConnector`].
//!
//! # Contract
//!
//! - [`Transport::read_available`] returns whatever bytes have arrived, or an
//!   empty vector after a short timeout.  Reads are **not** message-aligned.
//! - [`Transport::write_all`] writes a complete encoded command.
//! - [`Transport::close`] releases the underlying handle.  Closing twice is a
//!   no-op.
//!
//! Any error from a transport is fatal to the session that owns it.

use thiserror::Error;

pub mod mock;
pub mod recording;
pub mod serial;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device could not be opened.
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// No port was configured and none could be chosen automatically.
    #[error("no serial port configured (use --port or [serial].port); available: {available}")]
    NoPort { available: String },

    /// The link failed while reading or writing.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed by the other end.
    #[error("link closed")]
    Closed,
}

/// An open, bidirectional byte link to the debugger board.
pub trait Transport: Send {
    /// Returns bytes received since the last call.  An empty vector means
    /// nothing arrived within the read timeout.
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Writes all of `bytes` to the link.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Releases the link.
    fn close(&mut self);
}

/// Opens transports on demand, once per `attach`.
pub trait Connector: Send {
    /// Opens a fresh link to the device.
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Human-readable description of where `connect` goes, for log lines.
    fn describe(&self) -> String;
}
