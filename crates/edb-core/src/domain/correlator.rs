//! Streaming correlator: pairs each time sample with the data sample after it.
//!
//! # How a capture stream looks on the wire (for beginners)
//!
//! While streaming, the board interleaves timer readings and ADC readings:
//!
//! ```text
//! TIME(1000) VCAP(2048) TIME(2000) VCAP(3000) ...
//! ```
//!
//! A sample on its own is useless without knowing *when* it was taken, so the
//! correlator holds on to the most recent time value and only emits a
//! [`LogRecord`] once the matching data sample arrives.  The first time value
//! of the capture becomes time zero:
//!
//! ```text
//! TIME(1000)  → pending = 0
//! VCAP(2048)  → LogRecord { elapsed_cycles: 0,    sample_value: 2048 }
//! TIME(2000)  → pending = 1000
//! VCAP(3000)  → LogRecord { elapsed_cycles: 1000, sample_value: 3000 }
//! ```
//!
//! # Counter wraparound
//!
//! The board's counter is 32 bits wide and wraps after about 23 minutes at
//! 3 MHz.  [`TimeBase`] treats the first decrease in raw value as one wrap.
//! A second decrease, or an elapsed time that no longer fits in 32 bits, is
//! reported as [`TimeBaseError`] and ends the capture.  Longer captures are
//! not supported.

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::calibration::Calibration;
use crate::protocol::descriptor::Channel;
use crate::protocol::events::Event;

/// One counter period.
const WRAP: u64 = 1 << 32;

/// The capture ran past what a single counter wrap can represent.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TimeBaseError {
    #[error("timer counter wrapped a second time ({previous} -> {current})")]
    SecondWrap { previous: u32, current: u32 },

    #[error("elapsed time of {elapsed} cycles does not fit in 32 bits")]
    ElapsedOverflow { elapsed: u64 },
}

/// A correlated (time, data) pair.  Never mutated after emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    /// Cycles since the first time sample of the capture.
    pub elapsed_cycles: u32,
    /// Raw 16-bit field of the data sample.
    pub sample_value: u16,
    pub channel: Channel,
}

// ── TimeBase ──────────────────────────────────────────────────────────────────

/// Rebases raw counter readings to capture-relative elapsed cycles.
#[derive(Debug, Clone, Default)]
pub struct TimeBase {
    start_cycles: Option<u32>,
    last_cycles: u32,
    wrapped: bool,
}

impl TimeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_cycles(&self) -> Option<u32> {
        self.start_cycles
    }

    pub fn has_wrapped(&self) -> bool {
        self.wrapped
    }

    /// Records a raw counter value and returns the elapsed cycles since the
    /// first one.
    ///
    /// # Errors
    ///
    /// Returns [`TimeBaseError`] on a second wrap or when the elapsed value
    /// exceeds `u32::MAX`.  The time base is left unchanged in that case.
    pub fn rebase(&mut self, raw: u32) -> Result<u32, TimeBaseError> {
        let Some(start) = self.start_cycles else {
            self.start_cycles = Some(raw);
            self.last_cycles = raw;
            return Ok(0);
        };

        let wrapped = if raw < self.last_cycles {
            if self.wrapped {
                return Err(TimeBaseError::SecondWrap {
                    previous: self.last_cycles,
                    current: raw,
                });
            }
            debug!(previous = self.last_cycles, current = raw, "timer counter wrapped");
            true
        } else {
            self.wrapped
        };

        let elapsed = u64::from(raw) + if wrapped { WRAP } else { 0 } - u64::from(start);
        let elapsed =
            u32::try_from(elapsed).map_err(|_| TimeBaseError::ElapsedOverflow { elapsed })?;

        self.wrapped = wrapped;
        self.last_cycles = raw;
        Ok(elapsed)
    }
}

// ── StreamingCorrelator ───────────────────────────────────────────────────────

/// Counters reported when a capture ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorSummary {
    pub records: u64,
    /// Data samples that arrived with no time value to pair with.
    pub dropped_samples: u64,
    /// A time value was still waiting for its data sample at the end.
    pub flushed_unpaired_time: bool,
}

/// Owns the [`TimeBase`] for one capture and turns events into records.
#[derive(Debug, Default)]
pub struct StreamingCorrelator {
    time_base: TimeBase,
    pending: Option<u32>,
    latest_elapsed: u32,
    records: u64,
    dropped_samples: u64,
}

impl StreamingCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one event.  Returns a record when a data sample completes a pair.
    ///
    /// Events other than time and data samples are ignored.
    ///
    /// # Errors
    ///
    /// Propagates [`TimeBaseError`] from the time base; the capture should
    /// stop.
    pub fn push(&mut self, event: &Event) -> Result<Option<LogRecord>, TimeBaseError> {
        match event {
            Event::TimeSample(sample) => {
                let elapsed = self.time_base.rebase(sample.cycles)?;
                if let Some(replaced) = self.pending.replace(elapsed) {
                    debug!(replaced, elapsed, "time sample superseded before its data sample");
                }
                self.latest_elapsed = elapsed;
                Ok(None)
            }
            Event::DataSample(sample) => match self.pending.take() {
                Some(elapsed_cycles) => {
                    self.records += 1;
                    Ok(Some(LogRecord {
                        elapsed_cycles,
                        sample_value: sample.raw,
                        channel: sample.channel,
                    }))
                }
                None => {
                    self.dropped_samples += 1;
                    warn!(
                        channel = sample.channel.name(),
                        raw = sample.raw,
                        "data sample without a preceding time sample dropped"
                    );
                    Ok(None)
                }
            },
            _ => Ok(None),
        }
    }

    /// Elapsed cycles of the newest time sample seen so far.
    pub fn latest_elapsed(&self) -> u32 {
        self.latest_elapsed
    }

    /// Elapsed device time in seconds.
    pub fn latest_elapsed_seconds(&self, calibration: &Calibration) -> f64 {
        calibration.cycles_to_seconds(u64::from(self.latest_elapsed))
    }

    /// Ends the capture.  A buffered time value is discarded, never emitted.
    pub fn finish(mut self) -> CorrelatorSummary {
        let flushed_unpaired_time = self.pending.take().is_some();
        CorrelatorSummary {
            records: self.records,
            dropped_samples: self.dropped_samples,
            flushed_unpaired_time,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::events::{DataSample, TimeSample, WatchpointEvent};

    fn time(cycles: u32) -> Event {
        Event::TimeSample(TimeSample { cycles })
    }

    fn data(raw: u16) -> Event {
        Event::DataSample(DataSample {
            channel: Channel::Vcap,
            raw,
        })
    }

    #[test]
    fn test_first_time_sample_is_zero() {
        let mut tb = TimeBase::new();
        assert_eq!(tb.rebase(12345), Ok(0));
        assert_eq!(tb.start_cycles(), Some(12345));
    }

    #[test]
    fn test_single_wrap_is_added_once() {
        // Arrange
        let mut tb = TimeBase::new();

        // Act
        let elapsed: Vec<_> = [100, 150, 90, 95].iter().map(|&raw| tb.rebase(raw)).collect();

        // Assert
        let wrapped_90 = (WRAP + 90 - 100) as u32;
        assert_eq!(elapsed, vec![Ok(0), Ok(50), Ok(wrapped_90), Ok(wrapped_90 + 5)]);
        assert!(tb.has_wrapped());
    }

    #[test]
    fn test_elapsed_past_one_period_is_an_error() {
        let mut tb = TimeBase::new();
        for raw in [100, 150, 90] {
            tb.rebase(raw).unwrap();
        }

        assert_eq!(
            tb.rebase(200),
            Err(TimeBaseError::ElapsedOverflow {
                elapsed: WRAP + 100
            })
        );
    }

    #[test]
    fn test_second_decrease_is_an_error() {
        let mut tb = TimeBase::new();
        for raw in [1000, 10, 500] {
            tb.rebase(raw).unwrap();
        }

        let err = tb.rebase(20).unwrap_err();

        assert_eq!(
            err,
            TimeBaseError::SecondWrap {
                previous: 500,
                current: 20
            }
        );
    }

    #[test]
    fn test_failed_rebase_leaves_state_unchanged() {
        let mut tb = TimeBase::new();
        for raw in [100, 150, 90] {
            tb.rebase(raw).unwrap();
        }
        let _ = tb.rebase(200);
        // Still inside the first wrap, so a later reading below 100 works.
        assert_eq!(tb.rebase(99), Ok((WRAP - 1) as u32));
    }

    #[test]
    fn test_correlator_pairs_time_with_following_data() {
        let mut corr = StreamingCorrelator::new();
        let mut records = Vec::new();
        for event in [time(1000), data(2048), time(2000), data(3000)] {
            if let Some(record) = corr.push(&event).unwrap() {
                records.push((record.elapsed_cycles, record.sample_value));
            }
        }
        assert_eq!(records, vec![(0, 2048), (1000, 3000)]);
    }

    #[test]
    fn test_data_without_time_is_dropped() {
        let mut corr = StreamingCorrelator::new();

        assert_eq!(corr.push(&data(1)).unwrap(), None);
        corr.push(&time(5)).unwrap();
        corr.push(&data(2)).unwrap();
        // The pending time was used up by the previous sample.
        assert_eq!(corr.push(&data(3)).unwrap(), None);

        let summary = corr.finish();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.dropped_samples, 2);
    }

    #[test]
    fn test_newer_time_sample_replaces_pending_one() {
        let mut corr = StreamingCorrelator::new();
        corr.push(&time(0)).unwrap();
        corr.push(&time(300)).unwrap();

        let record = corr.push(&data(7)).unwrap().unwrap();

        assert_eq!(record.elapsed_cycles, 300);
    }

    #[test]
    fn test_trailing_time_sample_is_flushed_without_a_record() {
        let mut corr = StreamingCorrelator::new();
        corr.push(&time(0)).unwrap();
        corr.push(&data(1)).unwrap();
        corr.push(&time(10)).unwrap();

        let summary = corr.finish();

        assert_eq!(summary.records, 1);
        assert!(summary.flushed_unpaired_time);
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        let mut corr = StreamingCorrelator::new();
        corr.push(&time(0)).unwrap();
        let hit = Event::Watchpoint(WatchpointEvent {
            id: 1,
            cycles: 0,
            timestamp: 0.0,
            vcap: 2.0,
        });

        assert_eq!(corr.push(&hit).unwrap(), None);
        assert!(corr.push(&data(9)).unwrap().is_some());
    }

    #[test]
    fn test_latest_elapsed_seconds_uses_calibration() {
        let mut corr = StreamingCorrelator::new();
        corr.push(&time(0)).unwrap();
        corr.push(&time(1_500_000)).unwrap();

        let secs = corr.latest_elapsed_seconds(&Calibration::default());

        assert!((secs - 0.5).abs() < 1e-12);
    }
}
