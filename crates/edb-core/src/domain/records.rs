//! On-disk formats for capture output.
//!
//! - **Binary capture file**: fixed 8-byte records, no header or trailer.
//!
//!   ```text
//!   [0x80][elapsed u32 LE][sample descriptor][value u16 LE]
//!    TIME  4 bytes          VCAP..VINJ         2 bytes
//!   ```
//!
//! - **Text capture**: one `elapsed_s,channel,volts` line per record, used
//!   when the operator streams to stdout.
//!
//! - **Watchpoint CSV**: header `id,timestamp,vcap`, timestamp to 6 decimal
//!   places and voltage to 4.
//!
//! All writers take any [`std::io::Write`], so tests write into a `Vec<u8>`.

use std::io::{self, Write};

use thiserror::Error;

use crate::domain::calibration::Calibration;
use crate::domain::correlator::LogRecord;
use crate::protocol::codec::{read_u16_le, read_u32_le};
use crate::protocol::descriptor::{Channel, Descriptor};
use crate::protocol::events::WatchpointEvent;

/// Size of one binary capture record in bytes.
pub const CAPTURE_RECORD_LEN: usize = 8;

/// Header row of the watchpoint CSV.
pub const WATCHPOINT_CSV_HEADER: &str = "id,timestamp,vcap";

/// Errors raised when reading a binary capture file back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureFormatError {
    #[error("capture length {0} is not a multiple of 8 bytes")]
    TruncatedRecord(usize),

    #[error("record {index}: expected {expected} descriptor, found 0x{found:02X}")]
    UnexpectedDescriptor {
        index: usize,
        expected: &'static str,
        found: u8,
    },
}

/// Destination for correlated records during a capture.
pub trait RecordSink {
    fn write_record(&mut self, record: &LogRecord) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

// ── Binary capture ────────────────────────────────────────────────────────────

/// Appends records in the fixed-width binary capture layout.
#[derive(Debug)]
pub struct CaptureWriter<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    /// Number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for CaptureWriter<W> {
    fn write_record(&mut self, record: &LogRecord) -> io::Result<()> {
        self.out.write_all(&encode_capture_record(record))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Encodes one record in the binary capture layout.
pub fn encode_capture_record(record: &LogRecord) -> [u8; CAPTURE_RECORD_LEN] {
    let mut buf = [0u8; CAPTURE_RECORD_LEN];
    buf[0] = Descriptor::Time.code();
    buf[1..5].copy_from_slice(&record.elapsed_cycles.to_le_bytes());
    buf[5] = record.channel.sample_descriptor().code();
    buf[6..8].copy_from_slice(&record.sample_value.to_le_bytes());
    buf
}

/// Parses a complete binary capture file.
///
/// # Errors
///
/// Returns [`CaptureFormatError`] for a partial trailing record or a byte that
/// is not the expected descriptor.
pub fn read_capture(bytes: &[u8]) -> Result<Vec<LogRecord>, CaptureFormatError> {
    if bytes.len() % CAPTURE_RECORD_LEN != 0 {
        return Err(CaptureFormatError::TruncatedRecord(bytes.len()));
    }

    bytes
        .chunks_exact(CAPTURE_RECORD_LEN)
        .enumerate()
        .map(|(index, chunk)| {
            if chunk[0] != Descriptor::Time.code() {
                return Err(CaptureFormatError::UnexpectedDescriptor {
                    index,
                    expected: "TIME",
                    found: chunk[0],
                });
            }
            let channel = Descriptor::try_from(chunk[5])
                .ok()
                .and_then(Channel::from_sample_descriptor)
                .ok_or(CaptureFormatError::UnexpectedDescriptor {
                    index,
                    expected: "sample",
                    found: chunk[5],
                })?;
            // chunks_exact guarantees both fields are in bounds.
            Ok(LogRecord {
                elapsed_cycles: read_u32_le(chunk, 1).unwrap_or_default(),
                sample_value: read_u16_le(chunk, 6).unwrap_or_default(),
                channel,
            })
        })
        .collect()
}

// ── Text capture ──────────────────────────────────────────────────────────────

/// Human-readable record sink: `elapsed_s,channel,volts` per line.
#[derive(Debug)]
pub struct TextSink<W: Write> {
    out: W,
    calibration: Calibration,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W, calibration: Calibration) -> Self {
        Self { out, calibration }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for TextSink<W> {
    fn write_record(&mut self, record: &LogRecord) -> io::Result<()> {
        writeln!(
            self.out,
            "{:.6},{},{:.4}",
            self.calibration
                .cycles_to_seconds(u64::from(record.elapsed_cycles)),
            record.channel.name(),
            self.calibration.adc_to_volts(record.sample_value),
        )
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

// ── Watchpoint CSV ────────────────────────────────────────────────────────────

/// Logs watchpoint hits as CSV rows.
#[derive(Debug)]
pub struct WatchpointCsv<W: Write> {
    out: W,
}

impl<W: Write> WatchpointCsv<W> {
    /// Writes the header row and returns the logger.
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{WATCHPOINT_CSV_HEADER}")?;
        Ok(Self { out })
    }

    pub fn write_hit(&mut self, hit: &WatchpointEvent) -> io::Result<()> {
        writeln!(self.out, "{},{:.6},{:.4}", hit.id, hit.timestamp, hit.vcap)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
