//! Framing codec for the monitor serial link.
//!
//! Wire format (see [`crate::protocol::descriptor`] for the table):
//! ```text
//! Fixed(n):   [descriptor:1][payload:n]
//! Prefixed:   [descriptor:1][len:1][payload:len]
//! ```
//! All multi-byte integers inside payloads are little-endian.
//!
//! # Decoding contract
//!
//! [`PacketDecoder::try_decode`] has exactly three outcomes, and callers must
//! be able to tell them apart:
//!
//! | Result            | Meaning                       | Accumulator               |
//! |-------------------|-------------------------------|---------------------------|
//! | `Ok(Some(msg))`   | a complete message was framed | its bytes removed         |
//! | `Ok(None)`        | more data needed              | untouched                 |
//! | `Err(framing)`    | head byte is not a descriptor | exactly one byte removed  |
//!
//! Dropping a single byte on a framing error is how the decoder
//! resynchronises: the next call looks at the following byte, so a corrupt
//! byte can never wedge the stream.

use thiserror::Error;
use tracing::{trace, warn};

use crate::protocol::accumulator::ByteAccumulator;
use crate::protocol::descriptor::{Descriptor, Direction, PayloadLength};

/// Largest payload a `Prefixed` message can carry.
pub const MAX_PREFIXED_PAYLOAD: usize = u8::MAX as usize;

/// Errors raised while framing the receive stream.
///
/// Both variants are recoverable: the offending byte has already been
/// dropped and decoding can continue with the next call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The head byte is not in the descriptor table at all.
    #[error("unknown descriptor byte 0x{0:02X}; dropped one byte to resynchronise")]
    UnknownDescriptor(u8),

    /// The head byte is a valid descriptor, but one that only travels in the
    /// opposite direction (e.g. a command byte arriving from the device).
    #[error("descriptor {descriptor} is not valid in direction {direction:?}; dropped one byte to resynchronise")]
    UnexpectedDirection {
        descriptor: Descriptor,
        direction: Direction,
    },
}

/// Errors raised while encoding an outgoing message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A fixed-length descriptor was given a payload of the wrong size.
    #[error("{descriptor} carries exactly {expected} payload bytes, got {actual}")]
    PayloadLengthMismatch {
        descriptor: Descriptor,
        expected: usize,
        actual: usize,
    },

    /// A length-prefixed payload does not fit the one-byte length field.
    #[error("{descriptor} payload of {actual} bytes exceeds the 255-byte limit")]
    PayloadTooLong { descriptor: Descriptor, actual: usize },
}

/// One framed protocol message: a descriptor and its payload bytes.
///
/// For `Prefixed` descriptors the payload excludes the length byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub descriptor: Descriptor,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(descriptor: Descriptor, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            descriptor,
            payload: payload.into(),
        }
    }

    /// Encodes this message back to wire bytes.
    ///
    /// # Errors
    ///
    /// See [`encode_message`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode_message(self.descriptor, &self.payload)
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes a descriptor and payload into wire bytes.
///
/// # Errors
///
/// Returns [`EncodeError`] if the payload size does not match what the
/// descriptor table allows.
///
/// # Examples
///
/// ```rust
/// use edb_core::protocol::{encode_message, Descriptor};
///
/// let bytes = encode_message(Descriptor::Time, &1000u32.to_le_bytes()).unwrap();
/// assert_eq!(bytes, vec![0x80, 0xE8, 0x03, 0x00, 0x00]);
/// ```
pub fn encode_message(descriptor: Descriptor, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    match descriptor.payload_length() {
        PayloadLength::Fixed(expected) => {
            if payload.len() != expected {
                return Err(EncodeError::PayloadLengthMismatch {
                    descriptor,
                    expected,
                    actual: payload.len(),
                });
            }
            let mut buf = Vec::with_capacity(1 + expected);
            buf.push(descriptor.code());
            buf.extend_from_slice(payload);
            Ok(buf)
        }
        PayloadLength::Prefixed => {
            if payload.len() > MAX_PREFIXED_PAYLOAD {
                return Err(EncodeError::PayloadTooLong {
                    descriptor,
                    actual: payload.len(),
                });
            }
            let mut buf = Vec::with_capacity(2 + payload.len());
            buf.push(descriptor.code());
            buf.push(payload.len() as u8);
            buf.extend_from_slice(payload);
            Ok(buf)
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Incremental decoder that frames messages out of a [`ByteAccumulator`].
///
/// The decoder itself holds no partial-message state; everything not yet
/// framed stays in the accumulator.  It only keeps counters for diagnostics.
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    direction: Direction,
    decoded: u64,
    resyncs: u64,
}

impl PacketDecoder {
    /// Creates a decoder that accepts descriptors sent in `direction`.
    ///
    /// The host side uses [`Direction::DeviceToHost`]; a simulated device in
    /// tests uses [`Direction::HostToDevice`] to read the host's commands.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            decoded: 0,
            resyncs: 0,
        }
    }

    /// Decoder for the host end of the link.
    pub fn for_host() -> Self {
        Self::new(Direction::DeviceToHost)
    }

    /// Tries to frame one message from the head of `acc`.
    ///
    /// Call repeatedly until it returns `Ok(None)` to drain every complete
    /// message that arrived in a single read.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError`] when the head byte cannot start a message in
    /// this decoder's direction.  Exactly that one byte has been removed.
    pub fn try_decode(
        &mut self,
        acc: &mut ByteAccumulator,
    ) -> Result<Option<RawMessage>, FramingError> {
        let bytes = acc.peek();
        let Some(&head) = bytes.first() else {
            return Ok(None);
        };

        let descriptor = match Descriptor::try_from(head) {
            Ok(d) if d.direction() == self.direction => d,
            Ok(d) => {
                acc.consume(1);
                self.resyncs += 1;
                warn!(descriptor = %d, "descriptor in wrong direction; resynchronising");
                return Err(FramingError::UnexpectedDirection {
                    descriptor: d,
                    direction: self.direction,
                });
            }
            Err(()) => {
                acc.consume(1);
                self.resyncs += 1;
                warn!(byte = head, "unknown descriptor byte; resynchronising");
                return Err(FramingError::UnknownDescriptor(head));
            }
        };

        let length = descriptor.payload_length();
        let payload_len = match length {
            PayloadLength::Fixed(n) => n,
            PayloadLength::Prefixed => match bytes.get(1) {
                Some(&len) => len as usize,
                None => return Ok(None),
            },
        };
        let header_len = length.header_len();

        let total = header_len + payload_len;
        if bytes.len() < total {
            return Ok(None);
        }

        let msg = RawMessage {
            descriptor,
            payload: bytes[header_len..total].to_vec(),
        };
        acc.consume(total);
        self.decoded += 1;
        trace!(descriptor = %descriptor, len = payload_len, "framed message");
        Ok(Some(msg))
    }

    /// Number of messages framed so far.
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    /// Number of bytes dropped to resynchronise so far.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::for_host()
    }
}

// ── Payload field helpers ─────────────────────────────────────────────────────

/// Reads a little-endian `u16` at `offset`, or `None` if out of range.
pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Reads a little-endian `u32` at `offset`, or `None` if out of range.
pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
