//! Event classification: every framed message becomes exactly one [`Event`].
//!
//! The mapping is keyed on the descriptor and is total over the device → host
//! half of the table:
//!
//! | Descriptor(s)              | Event                          |
//! |----------------------------|--------------------------------|
//! | TIME                       | [`Event::TimeSample`]          |
//! | VCAP VBOOST VREG VRECT VINJ| [`Event::DataSample`]          |
//! | INTERRUPTED                | [`Event::InterruptContext`]    |
//! | WATCHPOINT                 | [`Event::Watchpoint`]          |
//! | STDIO                      | [`Event::StdIo`]               |
//! | ACK .. PARAM (0x90..0x99)  | [`Event::CommandReply`]        |
//!
//! Command descriptors have no event and are reported as
//! [`ClassifyError::NotAnEvent`].  The decoder never produces them on the
//! host side, so seeing one here means the caller built a message by hand.

use thiserror::Error;

use crate::domain::calibration::Calibration;
use crate::protocol::codec::{read_u16_le, read_u32_le, RawMessage};
use crate::protocol::descriptor::{Channel, Descriptor, InterruptKind, PayloadLength};

/// Errors raised while classifying a framed message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// The descriptor has no event mapping (it is a host → device command).
    #[error("descriptor {0} does not describe a device event")]
    NotAnEvent(Descriptor),

    /// The payload does not match the descriptor's fixed layout.
    #[error("malformed {descriptor} payload: {reason}")]
    MalformedPayload {
        descriptor: Descriptor,
        reason: String,
    },
}

// ── Event types ───────────────────────────────────────────────────────────────

/// The target stopped and reported why.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptContext {
    pub kind: InterruptKind,
    /// Breakpoint index, or source line for an ASSERT.
    pub id: u16,
    /// Vcap saved when the target entered active debug mode, if recorded.
    pub saved_vcap: Option<f32>,
}

/// A watchpoint fired.  Execution continues.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchpointEvent {
    pub id: u8,
    /// Raw counter value at the hit.
    pub cycles: u32,
    /// `cycles` converted to seconds.
    pub timestamp: f64,
    pub vcap: f32,
}

/// Text the target printed on its UART.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdIoData {
    pub text: String,
}

/// Timer reading that precedes a [`DataSample`] in a capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSample {
    pub cycles: u32,
}

/// One ADC reading from a streamed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSample {
    pub channel: Channel,
    /// The 16-bit field exactly as received.
    pub raw: u16,
}

/// Opaque reply to the outstanding command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub descriptor: Descriptor,
    pub payload: Vec<u8>,
}

/// Everything the device can say, as a closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    InterruptContext(InterruptContext),
    Watchpoint(WatchpointEvent),
    StdIo(StdIoData),
    TimeSample(TimeSample),
    DataSample(DataSample),
    CommandReply(CommandReply),
}

impl Event {
    /// Short name used in log lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::InterruptContext(_) => "interrupt-context",
            Event::Watchpoint(_) => "watchpoint",
            Event::StdIo(_) => "stdio",
            Event::TimeSample(_) => "time-sample",
            Event::DataSample(_) => "data-sample",
            Event::CommandReply(_) => "command-reply",
        }
    }
}

// ── Classifier ────────────────────────────────────────────────────────────────

/// Maps framed messages to events, scaling raw fields with a [`Calibration`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    calibration: Calibration,
}

impl Classifier {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Classifies one message.  The message is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError`] for command descriptors and for payloads
    /// whose length disagrees with the descriptor table.
    pub fn classify(&self, msg: RawMessage) -> Result<Event, ClassifyError> {
        let RawMessage {
            descriptor,
            payload,
        } = msg;

        if let PayloadLength::Fixed(expected) = descriptor.payload_length() {
            if payload.len() != expected {
                return Err(malformed(
                    descriptor,
                    format!("expected {expected} bytes, got {}", payload.len()),
                ));
            }
        }

        use Descriptor::*;
        match descriptor {
            Time => Ok(Event::TimeSample(TimeSample {
                cycles: u32_at(descriptor, &payload, 0)?,
            })),
            Vcap | Vboost | Vreg | Vrect | Vinj => {
                let channel = Channel::from_sample_descriptor(descriptor)
                    .ok_or(ClassifyError::NotAnEvent(descriptor))?;
                Ok(Event::DataSample(DataSample {
                    channel,
                    raw: u16_at(descriptor, &payload, 0)?,
                }))
            }
            Interrupted => {
                parse_interrupt_context(descriptor, &payload, &self.calibration)
                    .map(Event::InterruptContext)
            }
            Watchpoint => {
                let cycles = u32_at(descriptor, &payload, 1)?;
                Ok(Event::Watchpoint(WatchpointEvent {
                    id: payload[0],
                    cycles,
                    timestamp: self.calibration.cycles_to_seconds(u64::from(cycles)),
                    vcap: self.calibration.adc_to_volts(u16_at(descriptor, &payload, 5)?),
                }))
            }
            StdIo => Ok(Event::StdIo(StdIoData {
                text: String::from_utf8_lossy(&payload).into_owned(),
            })),
            Ack | SenseResult | VcapSaved | VcapRestored | VcapReached
            | InterruptContextReply | Memory | Pc | Echo | Param => {
                Ok(Event::CommandReply(CommandReply {
                    descriptor,
                    payload,
                }))
            }
            Sense | Power | Charge | Discharge | ChargeCmp | DischargeCmp | EnterDebug
            | ExitDebug | BreakAtVcap | ToggleBreakpoint | ToggleWatchpoint
            | GetInterruptContext | ReadMemory | WriteMemory | GetPc | SerialEcho | DmaEcho
            | SetParam | GetParam | EnableTargetUart | ResetDebugState | StreamBegin
            | StreamEnd => Err(ClassifyError::NotAnEvent(descriptor)),
        }
    }
}

/// Parses the 5-byte interrupt context layout shared by INTERRUPTED and
/// INTERRUPT_CONTEXT_REPLY: `[kind:1][id:u16][saved_vcap:u16]`.
///
/// # Errors
///
/// Returns [`ClassifyError::MalformedPayload`] if the payload is too short.
pub fn parse_interrupt_context(
    descriptor: Descriptor,
    payload: &[u8],
    calibration: &Calibration,
) -> Result<InterruptContext, ClassifyError> {
    let kind = payload
        .first()
        .copied()
        .ok_or_else(|| malformed(descriptor, "missing interrupt kind".to_string()))?;
    Ok(InterruptContext {
        kind: InterruptKind::from(kind),
        id: u16_at(descriptor, payload, 1)?,
        saved_vcap: calibration.optional_adc_to_volts(u16_at(descriptor, payload, 3)?),
    })
}

fn malformed(descriptor: Descriptor, reason: String) -> ClassifyError {
    ClassifyError::MalformedPayload { descriptor, reason }
}

fn u16_at(descriptor: Descriptor, payload: &[u8], offset: usize) -> Result<u16, ClassifyError> {
    read_u16_le(payload, offset)
        .ok_or_else(|| malformed(descriptor, format!("no u16 at offset {offset}")))
}

fn u32_at(descriptor: Descriptor, payload: &[u8], offset: usize) -> Result<u32, ClassifyError> {
    read_u32_le(payload, offset)
        .ok_or_else(|| malformed(descriptor, format!("no u32 at offset {offset}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
