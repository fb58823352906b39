//! Sample capture: STREAM_BEGIN, correlate, STREAM_END.
//!
//! While streaming, the board interleaves TIME samples with the requested
//! channel samples.  The [`StreamingCorrelator`] pairs them into records for
//! the sink; every other event still reaches the observers.  Whatever ends the
//! capture (duration, Ctrl-C, a timer that ran out of range, or a failing
//! sink) the board is told to stop streaming before this returns, unless the
//! link itself is gone.

use std::fmt;
use std::time::Instant;

use edb_core::protocol::Channel;
use edb_core::{Descriptor, Event, RecordSink, StreamingCorrelator, TimeBaseError};
use tracing::{info, warn};

use crate::application::session::{
    Outcome, Session, SessionError, Wait, CLEANUP_REPLY_TIMEOUT,
};
use crate::infrastructure::transport::Connector;

/// Why a capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The requested device-time duration elapsed.
    DurationElapsed,
    /// The operator cancelled.
    Cancelled,
    /// The device timer went beyond what a single wrap can represent.
    TimerRange(TimeBaseError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::DurationElapsed => f.write_str("duration elapsed"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::TimerRange(e) => write!(f, "timer out of range: {e}"),
        }
    }
}

/// Summary of one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReport {
    pub records: u64,
    pub dropped_samples: u64,
    pub flushed_unpaired_time: bool,
    /// Device time covered, from the first TIME sample to the last.
    pub elapsed_seconds: f64,
    pub stop: StopReason,
}

/// Bit mask of `channels` for STREAM_BEGIN / STREAM_END.
pub fn stream_mask(channels: &[Channel]) -> u8 {
    channels.iter().fold(0, |mask, c| mask | c.stream_bit())
}

impl<C: Connector> Session<C> {
    /// Streams `channels` into `sink` for `duration` seconds of device time,
    /// or until cancelled when `duration` is `None`.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidArgument`] for an empty channel list or a bad
    /// duration (nothing is sent), [`SessionError::Io`] if the sink fails,
    /// and connection or protocol errors from the link.
    pub fn stream(
        &mut self,
        channels: &[Channel],
        duration: Option<f64>,
        sink: &mut dyn RecordSink,
    ) -> Result<StreamReport, SessionError> {
        self.require_attached("stream")?;
        if channels.is_empty() {
            return Err(SessionError::InvalidArgument(
                "stream needs at least one channel".to_string(),
            ));
        }
        let calibration = *self.calibration();
        let limit = duration
            .map(|seconds| calibration.seconds_to_cycles(seconds))
            .transpose()?;
        let mask = stream_mask(channels);

        if self
            .request("stream", Descriptor::StreamBegin, &[mask])?
            .is_cancelled()
        {
            self.end_stream(mask)?;
            return Ok(StreamReport {
                records: 0,
                dropped_samples: 0,
                flushed_unpaired_time: false,
                elapsed_seconds: 0.0,
                stop: StopReason::Cancelled,
            });
        }
        info!(mask, ?duration, "streaming started");

        let mut correlator = StreamingCorrelator::new();
        let result = self.pump_samples(&mut correlator, limit, sink);

        let stop = match result {
            Ok(stop) => stop,
            Err(SessionError::Connection(e)) => return Err(SessionError::Connection(e)),
            Err(e) => {
                if let Err(cleanup) = self.end_stream(mask) {
                    warn!("could not stop streaming: {cleanup}");
                }
                return Err(e);
            }
        };

        if let Err(e) = sink.flush() {
            self.end_stream(mask)?;
            return Err(e.into());
        }
        self.end_stream(mask)?;

        let elapsed_seconds = correlator.latest_elapsed_seconds(&calibration);
        let summary = correlator.finish();
        info!(
            records = summary.records,
            dropped = summary.dropped_samples,
            %stop,
            "streaming finished"
        );
        Ok(StreamReport {
            records: summary.records,
            dropped_samples: summary.dropped_samples,
            flushed_unpaired_time: summary.flushed_unpaired_time,
            elapsed_seconds,
            stop,
        })
    }

    fn pump_samples(
        &mut self,
        correlator: &mut StreamingCorrelator,
        limit: Option<u64>,
        sink: &mut dyn RecordSink,
    ) -> Result<StopReason, SessionError> {
        loop {
            if limit.is_some_and(|cycles| u64::from(correlator.latest_elapsed()) >= cycles) {
                return Ok(StopReason::DurationElapsed);
            }

            let event = match self.next_event(Wait::Cancellable)? {
                Outcome::Completed(event) => event,
                Outcome::Cancelled => return Ok(StopReason::Cancelled),
            };

            match event {
                Event::TimeSample(_) | Event::DataSample(_) => match correlator.push(&event) {
                    Ok(Some(record)) => sink.write_record(&record)?,
                    Ok(None) => {}
                    Err(e) => {
                        warn!("capture stopped: {e}");
                        return Ok(StopReason::TimerRange(e));
                    }
                },
                other => {
                    self.dispatch(other, None)?;
                }
            }
        }
    }

    /// Settles a still-pending STREAM_BEGIN, then sends STREAM_END and waits a
    /// bounded time for its acknowledgement, regardless of cancellation.
    fn end_stream(&mut self, mask: u8) -> Result<(), SessionError> {
        if !self.is_attached() {
            return Ok(());
        }
        if self.outstanding().is_some() {
            let deadline = Instant::now() + CLEANUP_REPLY_TIMEOUT;
            if self.await_reply(Wait::Until(deadline))?.is_cancelled() {
                warn!("no reply to STREAM_BEGIN; abandoning it");
                let _ = self.abandon_pending();
            }
        }

        self.issue("stream", Descriptor::StreamEnd, &[mask])?;
        let deadline = Instant::now() + CLEANUP_REPLY_TIMEOUT;
        if self.await_reply(Wait::Until(deadline))?.is_cancelled() {
            warn!("STREAM_END was not acknowledged in time");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::{MockConnector, MockDevice};
    use edb_core::domain::correlator::LogRecord;
    use edb_core::{encode_message, Calibration};

    #[derive(Default)]
    struct VecSink(Vec<LogRecord>);

    impl RecordSink for VecSink {
        fn write_record(&mut self, record: &LogRecord) -> std::io::Result<()> {
            self.0.push(*record);
            Ok(())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn msg(descriptor: Descriptor, payload: &[u8]) -> Vec<u8> {
        encode_message(descriptor, payload).unwrap()
    }

    fn time(cycles: u32) -> Vec<u8> {
        msg(Descriptor::Time, &cycles.to_le_bytes())
    }

    fn vcap(raw: u16) -> Vec<u8> {
        msg(Descriptor::Vcap, &raw.to_le_bytes())
    }

    fn attached() -> (Session<MockConnector>, MockDevice) {
        let device = MockDevice::new();
        let mut session = Session::new(MockConnector::new(device.clone()), Calibration::default());
        session.attach().unwrap();
        device.cancel_when_idle(session.cancel_token());
        (session, device)
    }

    #[test]
    fn test_stream_mask_sets_one_bit_per_channel() {
        assert_eq!(stream_mask(&[Channel::Vcap, Channel::Vinj]), 0b1_0001);
        assert_eq!(stream_mask(&[]), 0);
    }

    #[test]
    fn test_stream_until_cancelled_writes_pairs_and_always_ends() {
        // Arrange
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut samples = time(1000);
        samples.extend(vcap(2048));
        samples.extend(time(2000));
        samples.extend(vcap(3000));
        samples.extend(time(2500));
        device.push_split(&samples, 3);
        device.push_idle();
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut sink = VecSink::default();

        // Act
        let report = session.stream(&[Channel::Vcap], None, &mut sink).unwrap();

        // Assert
        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(report.records, 2);
        assert!(report.flushed_unpaired_time);
        assert_eq!(
            sink.0
                .iter()
                .map(|r| (r.elapsed_cycles, r.sample_value))
                .collect::<Vec<_>>(),
            vec![(0, 2048), (1000, 3000)]
        );
        assert_eq!(device.written(), vec![vec![0x16, 0x01], vec![0x17, 0x01]]);
        assert_eq!(session.outstanding(), None);
    }

    #[test]
    fn test_stream_stops_when_duration_elapses() {
        // 1 ms of device time is 3000 cycles at the default 3 MHz.
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut samples = time(0);
        samples.extend(vcap(1));
        samples.extend(time(3000));
        samples.extend(vcap(2));
        samples.extend(time(6000));
        samples.extend(vcap(3));
        device.push_chunk(&samples);
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut sink = VecSink::default();

        let report = session
            .stream(&[Channel::Vcap], Some(0.001), &mut sink)
            .unwrap();

        assert_eq!(report.stop, StopReason::DurationElapsed);
        assert_eq!(report.records, 1);
        assert!(report.flushed_unpaired_time);
        assert!((report.elapsed_seconds - 0.001).abs() < 1e-9);
        assert_eq!(device.written().last(), Some(&vec![0x17, 0x01]));
    }

    #[test]
    fn test_stream_timer_overflow_keeps_written_records() {
        // Arrange: one wrap is tolerated, a second decrease is not
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut samples = time(1000);
        samples.extend(vcap(7));
        samples.extend(time(10));
        samples.extend(vcap(8));
        samples.extend(time(500));
        samples.extend(time(20));
        device.push_chunk(&samples);
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut sink = VecSink::default();

        // Act
        let report = session
            .stream(&[Channel::Vcap], None, &mut sink)
            .unwrap();

        // Assert
        assert!(matches!(
            report.stop,
            StopReason::TimerRange(TimeBaseError::SecondWrap { .. })
        ));
        assert_eq!(sink.0.len(), 2);
        assert_eq!(device.written().len(), 2);
    }

    #[test]
    fn test_stream_drops_samples_without_time_and_forwards_other_events() {
        use crate::application::observer::{Disposition, MockEventObserver};

        let (mut session, device) = attached();
        let mut observer = MockEventObserver::new();
        observer
            .expect_on_event()
            .times(1)
            .returning(|_| Disposition::Continue);
        session.register_observer(Box::new(observer));
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut samples = vcap(5);
        samples.extend(msg(Descriptor::StdIo, b"hi\n"));
        samples.extend(time(40));
        samples.extend(vcap(6));
        device.push_chunk(&samples);
        device.push_idle();
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut sink = VecSink::default();

        let report = session
            .stream(&[Channel::Vcap], None, &mut sink)
            .unwrap();

        assert_eq!(report.dropped_samples, 1);
        assert_eq!(report.records, 1);
    }

    #[test]
    fn test_stream_rejects_empty_channel_list_without_sending() {
        let (mut session, device) = attached();
        let mut sink = VecSink::default();

        let err = session.stream(&[], None, &mut sink).unwrap_err();

        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_stream_rejects_negative_duration() {
        let (mut session, device) = attached();
        let mut sink = VecSink::default();

        let err = session
            .stream(&[Channel::Vinj], Some(-1.0), &mut sink)
            .unwrap_err();

        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_stream_end_without_ack_does_not_hang() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        let mut sink = VecSink::default();

        let report = session.stream(&[Channel::Vreg], None, &mut sink).unwrap();

        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(device.written(), vec![vec![0x16, 0x04], vec![0x17, 0x04]]);
        assert_eq!(
            session.outstanding().map(|h| h.command),
            Some(Descriptor::StreamEnd)
        );
    }
}
