//! # edb-core
//!
//! Protocol engine for the EDB energy-harvesting debug monitor.
//!
//! The crate turns the raw byte stream coming from the debugger board into
//! typed events, and turns host commands into bytes.  It has no dependencies
//! on serial ports, terminals or the file system, so everything here can be
//! tested with plain byte slices.
//!
//! # Data flow (for beginners)
//!
//! ```text
//!  transport bytes
//!        │ append
//!        ▼
//!  ByteAccumulator ──try_decode──▶ PacketDecoder ──RawMessage──▶ Classifier
//!                                                                   │
//!                                                                 Event
//!                                                                   │
//!                                   StreamingCorrelator ◀───────────┤
//!                                          │ LogRecord              ▼
//!                                          ▼                  session / observers
//!                                   RecordSink (capture file)
//! ```
//!
//! - **`protocol`**: the descriptor table, the receive buffer, framing and
//!   the descriptor → event mapping.
//! - **`domain`**: calibration, the streaming correlator and the capture
//!   file formats.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `edb_core::Event` instead of `edb_core::protocol::events::Event`.
pub use domain::calibration::{Calibration, CalibrationError};
pub use domain::correlator::{
    CorrelatorSummary, LogRecord, StreamingCorrelator, TimeBase, TimeBaseError,
};
pub use domain::records::{
    read_capture, CaptureFormatError, CaptureWriter, RecordSink, TextSink, WatchpointCsv,
};
pub use protocol::{
    encode_message, ByteAccumulator, ClassifyError, Classifier, Descriptor, Event, FramingError,
    PacketDecoder, RawMessage,
};
