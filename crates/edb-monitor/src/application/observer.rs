//! Observer seam for asynchronous device events.
//!
//! Watchpoint hits, target std-I/O and unsolicited interrupt contexts are not
//! answers to any command.  The session hands them to observers in decode
//! order, and each observer answers with a [`Disposition`].  If any observer
//! answers [`Disposition::Halt`], the session records that the target is now
//! halted.  The session itself never decides that on its own.

use std::io::Write;

use edb_core::domain::records::WatchpointCsv;
use edb_core::Event;
use tracing::warn;

/// What the session should do after an observer has seen an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep pumping events.
    Continue,
    /// The target is in active debug mode; stop waiting.
    Halt,
}

/// Receives asynchronous events from the session.
#[cfg_attr(test, mockall::automock)]
pub trait EventObserver: Send {
    fn on_event(&mut self, event: &Event) -> Disposition;
}

/// Halts on any interrupt context and ignores everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaltOnInterrupt;

impl EventObserver for HaltOnInterrupt {
    fn on_event(&mut self, event: &Event) -> Disposition {
        match event {
            Event::InterruptContext(_) => Disposition::Halt,
            _ => Disposition::Continue,
        }
    }
}

/// Appends watchpoint hits to a CSV log and halts on interrupt contexts.
#[derive(Debug)]
pub struct WatchpointLogger<W: Write + Send> {
    csv: Option<WatchpointCsv<W>>,
    hits: u64,
}

impl<W: Write + Send> WatchpointLogger<W> {
    /// Writes the CSV header to `out`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the header cannot be written.
    pub fn new(out: W) -> std::io::Result<Self> {
        Ok(Self {
            csv: Some(WatchpointCsv::new(out)?),
            hits: 0,
        })
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Option<W> {
        let mut csv = self.csv.take()?;
        if let Err(e) = csv.flush() {
            warn!("watchpoint log flush failed: {e}");
        }
        Some(csv.into_inner())
    }
}

impl<W: Write + Send> EventObserver for WatchpointLogger<W> {
    fn on_event(&mut self, event: &Event) -> Disposition {
        match event {
            Event::Watchpoint(hit) => {
                self.hits += 1;
                if let Some(csv) = self.csv.as_mut() {
                    if let Err(e) = csv.write_hit(hit) {
                        warn!("watchpoint log write failed, logging stopped: {e}");
                        self.csv = None;
                    }
                }
                Disposition::Continue
            }
            Event::InterruptContext(_) => Disposition::Halt,
            _ => Disposition::Continue,
        }
    }
}
