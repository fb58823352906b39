//! Append-only receive buffer between the transport and the packet decoder.
//!
//! # Why a separate buffer? (for beginners)
//!
//! A serial link delivers bytes, not messages.  One `read()` may return half
//! a message, three and a half messages, or nothing at all.  The accumulator
//! keeps whatever has arrived so far; the decoder looks at the front of it and
//! only removes bytes once a *complete* message is there.
//!
//! ```text
//! read #1: [80 10 27]            → accumulator: 80 10 27         (need more)
//! read #2: [00 00 81 00 08]      → accumulator: 80 10 27 00 00 81 00 08
//!                                  decoder takes 80 10 27 00 00  (TIME)
//!                                  decoder takes 81 00 08        (VCAP)
//! ```
//!
//! The buffer has no upper bound; the session drains it after every read.

/// Bytes received from the transport that have not been decoded yet.
#[derive(Debug, Default, Clone)]
pub struct ByteAccumulator {
    buf: Vec<u8>,
}

impl ByteAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds newly read bytes to the tail.  Appending an empty slice is a no-op.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns everything buffered so far without removing it.
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Removes the first `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`ByteAccumulator::len`].  The decoder only ever
    /// consumes what it has already inspected through [`ByteAccumulator::peek`].
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.buf.len(),
            "consume({n}) past end of {}-byte buffer",
            self.buf.len()
        );
        self.buf.drain(..n);
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
