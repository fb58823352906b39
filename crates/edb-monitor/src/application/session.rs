//! The debug session: one attachment to the debugger board and its state machine.
//!
//! # States (for beginners)
//!
//! ```text
//!             attach()                      interrupt() / break reached
//!  Detached ───────────▶ Running ─────────────────────────────▶ Halted
//!     ▲                     ▲                                     │
//!     │                     └───────────── resume() ──────────────┘
//!     └──────── detach() (from any attached state) ──────────────┘
//! ```
//!
//! *Running* means the target executes normally.  *Halted* means the target
//! sits in active debug mode and its memory and registers can be inspected.
//!
//! # One command at a time
//!
//! The board has a single serial channel and answers commands strictly in
//! order, so the session allows at most one outstanding command.  It records
//! the command in `outstanding` *before* writing it and clears it when the
//! matching reply arrives.  Issuing another command in the meantime fails with
//! [`ProtocolViolation::CommandOutstanding`] and changes nothing.
//!
//! Waiting for a reply can be cancelled through the session's
//! [`CancelToken`].  A cancelled wait returns [`Outcome::Cancelled`] and leaves
//! the command outstanding; the reply is accepted whenever it eventually
//! arrives, or the operator can give up on it with
//! [`Session::abandon_pending`].
//!
//! # Event pump
//!
//! Every wait goes through the same loop: decode whatever is buffered, and
//! only read from the transport when nothing decodable is left.  Replies are
//! matched against the outstanding command; everything else goes to the
//! registered [`EventObserver`]s in arrival order.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use edb_core::protocol::{
    parse_interrupt_context, ChargeMethod, CommandReply, EncodeError, InterruptContext,
    InterruptKind,
};
use edb_core::{
    encode_message, ByteAccumulator, Calibration, CalibrationError, Classifier, Descriptor, Event,
    PacketDecoder,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::observer::{Disposition, EventObserver};
use crate::infrastructure::transport::recording::RecordingTransport;
use crate::infrastructure::transport::{Connector, Transport, TransportError};

/// How long to wait for the acknowledgement of a clean-up command (such as
/// STREAM_END) that must not be skipped by a pending cancellation.
pub const CLEANUP_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Request/response pairing failures.  Never corrupt session state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("cannot issue {attempted}: {outstanding} is still waiting for {expected}")]
    CommandOutstanding {
        attempted: Descriptor,
        outstanding: Descriptor,
        expected: Descriptor,
    },

    #[error("received {received} while {command} was waiting for {expected}")]
    UnexpectedReply {
        command: Descriptor,
        expected: Descriptor,
        received: Descriptor,
    },

    #[error("received {received} with no command outstanding")]
    UnsolicitedReply { received: Descriptor },

    #[error("malformed {descriptor} reply: {reason}")]
    MalformedReply {
        descriptor: Descriptor,
        reason: String,
    },

    #[error("no command is outstanding")]
    NothingOutstanding,
}

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be opened or failed; the session is detached.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("{operation} requires an attached session")]
    NotAttached { operation: &'static str },

    #[error("{operation} is not allowed while {mode}")]
    InvalidMode {
        operation: &'static str,
        mode: Mode,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    /// Rejected before anything was sent to the device.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CalibrationError> for SessionError {
    fn from(e: CalibrationError) -> Self {
        SessionError::InvalidArgument(e.to_string())
    }
}

impl From<EncodeError> for SessionError {
    fn from(e: EncodeError) -> Self {
        SessionError::InvalidArgument(e.to_string())
    }
}

// ── State types ───────────────────────────────────────────────────────────────

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Detached,
    Running,
    Halted,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Detached => "detached",
            Mode::Running => "running",
            Mode::Halted => "halted",
        })
    }
}

/// The command currently waiting for its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHandle {
    pub command: Descriptor,
    pub expected: Descriptor,
}

/// Result of a wait that the operator may cut short.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Cancelled => Outcome::Cancelled,
        }
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// Shared flag the operator trips to abandon the current wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears the flag before the next operation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Counts from [`Session::replay`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: u64,
    pub replies_skipped: u64,
    pub framing_errors: u64,
    /// Bytes of an incomplete final message, discarded.
    pub trailing_bytes: u64,
}

/// How long a pump may block.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Wait {
    /// Until the cancel token trips.
    Cancellable,
    /// Until the deadline, ignoring the cancel token.
    Until(Instant),
}

struct Link {
    transport: Box<dyn Transport>,
    mode: Mode,
    outstanding: Option<CommandHandle>,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One debug session.  Owns the transport, the receive buffer and the state.
pub struct Session<C: Connector> {
    connector: C,
    classifier: Classifier,
    acc: ByteAccumulator,
    decoder: PacketDecoder,
    link: Option<Link>,
    observers: Vec<Box<dyn EventObserver>>,
    cancel: CancelToken,
    record_path: Option<PathBuf>,
}

impl<C: Connector> Session<C> {
    /// Creates a detached session.
    pub fn new(connector: C, calibration: Calibration) -> Self {
        Self {
            connector,
            classifier: Classifier::new(calibration),
            acc: ByteAccumulator::new(),
            decoder: PacketDecoder::for_host(),
            link: None,
            observers: Vec::new(),
            cancel: CancelToken::new(),
            record_path: None,
        }
    }

    /// Tees every received byte into `path` on each attach.
    pub fn with_recording(mut self, path: Option<PathBuf>) -> Self {
        self.record_path = path;
        self
    }

    /// Adds an observer for asynchronous events.
    pub fn register_observer(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// The token that cancels this session's waits.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn calibration(&self) -> &Calibration {
        self.classifier.calibration()
    }

    pub fn mode(&self) -> Mode {
        self.link.as_ref().map_or(Mode::Detached, |l| l.mode)
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    pub fn outstanding(&self) -> Option<CommandHandle> {
        self.link.as_ref().and_then(|l| l.outstanding)
    }

    /// Frames dropped by the decoder since the session was created.
    pub fn framing_errors(&self) -> u64 {
        self.decoder.resync_count()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Detached → Running.
    ///
    /// # Errors
    ///
    /// [`SessionError::Connection`] if the transport cannot be opened, and
    /// [`SessionError::InvalidMode`] if already attached.
    pub fn attach(&mut self) -> Result<(), SessionError> {
        if let Some(link) = &self.link {
            return Err(SessionError::InvalidMode {
                operation: "attach",
                mode: link.mode,
            });
        }

        let mut transport = self.connector.connect()?;
        if let Some(path) = &self.record_path {
            transport = Box::new(RecordingTransport::create(transport, path)?);
        }

        self.acc.clear();
        self.link = Some(Link {
            transport,
            mode: Mode::Running,
            outstanding: None,
        });
        info!(device = %self.connector.describe(), "attached");
        Ok(())
    }

    /// Any state → Detached.  Releases the transport.  Never fails.
    pub fn detach(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Some(handle) = link.outstanding {
                warn!(command = %handle.command, "detaching with a reply still outstanding");
            }
            link.transport.close();
            info!("detached");
        }
        self.acc.clear();
    }

    fn drop_link(&mut self, reason: &TransportError) {
        warn!("link lost: {reason}");
        self.detach();
    }

    // ── Mode guards ───────────────────────────────────────────────────────────

    pub(crate) fn require_attached(&self, operation: &'static str) -> Result<Mode, SessionError> {
        self.link
            .as_ref()
            .map(|l| l.mode)
            .ok_or(SessionError::NotAttached { operation })
    }

    pub(crate) fn require_mode(
        &self,
        operation: &'static str,
        required: Mode,
    ) -> Result<(), SessionError> {
        let mode = self.require_attached(operation)?;
        if mode != required {
            return Err(SessionError::InvalidMode { operation, mode });
        }
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode) {
        if let Some(link) = self.link.as_mut() {
            if link.mode != mode {
                info!(from = %link.mode, to = %mode, "mode transition");
                link.mode = mode;
            }
        }
    }

    // ── Command issuance ──────────────────────────────────────────────────────

    /// Encodes and writes `command`, marking it outstanding first.
    pub(crate) fn issue(
        &mut self,
        operation: &'static str,
        command: Descriptor,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        let expected = command.expected_reply().ok_or_else(|| {
            SessionError::InvalidArgument(format!("{command} is not a command descriptor"))
        })?;
        let bytes = encode_message(command, payload)?;

        let link = self
            .link
            .as_mut()
            .ok_or(SessionError::NotAttached { operation })?;
        if let Some(handle) = link.outstanding {
            return Err(ProtocolViolation::CommandOutstanding {
                attempted: command,
                outstanding: handle.command,
                expected: handle.expected,
            }
            .into());
        }

        link.outstanding = Some(CommandHandle { command, expected });
        debug!(%command, len = payload.len(), "issuing command");
        if let Err(e) = link.transport.write_all(&bytes) {
            self.drop_link(&e);
            return Err(SessionError::Connection(e));
        }
        Ok(())
    }

    /// Issues `command` and waits (cancellably) for its reply.
    pub(crate) fn request(
        &mut self,
        operation: &'static str,
        command: Descriptor,
        payload: &[u8],
    ) -> Result<Outcome<CommandReply>, SessionError> {
        self.issue(operation, command, payload)?;
        self.await_reply(Wait::Cancellable)
    }

    /// Pumps events until the outstanding command's reply arrives.
    pub(crate) fn await_reply(&mut self, wait: Wait) -> Result<Outcome<CommandReply>, SessionError> {
        loop {
            let event = match self.next_event(wait)? {
                Outcome::Completed(event) => event,
                Outcome::Cancelled => {
                    if let Some(handle) = self.outstanding() {
                        info!(command = %handle.command, "wait cancelled; reply left pending");
                    }
                    return Ok(Outcome::Cancelled);
                }
            };
            match event {
                Event::CommandReply(reply) => {
                    self.settle_reply(&reply)?;
                    return Ok(Outcome::Completed(reply));
                }
                other => {
                    self.dispatch(other, None)?;
                }
            }
        }
    }

    /// Matches a reply against the outstanding command and clears it.
    fn settle_reply(&mut self, reply: &CommandReply) -> Result<CommandHandle, SessionError> {
        let link = self.link.as_mut().ok_or(ProtocolViolation::UnsolicitedReply {
            received: reply.descriptor,
        })?;
        let handle = match link.outstanding {
            Some(handle) if handle.expected == reply.descriptor => handle,
            Some(handle) => {
                return Err(ProtocolViolation::UnexpectedReply {
                    command: handle.command,
                    expected: handle.expected,
                    received: reply.descriptor,
                }
                .into())
            }
            None => {
                return Err(ProtocolViolation::UnsolicitedReply {
                    received: reply.descriptor,
                }
                .into())
            }
        };
        link.outstanding = None;
        debug!(command = %handle.command, reply = %reply.descriptor, "reply settled");

        match handle.command {
            Descriptor::EnterDebug => self.set_mode(Mode::Halted),
            Descriptor::ExitDebug => self.set_mode(Mode::Running),
            _ => {}
        }
        Ok(handle)
    }

    // ── Event pump ────────────────────────────────────────────────────────────

    /// Returns the next classified event, reading from the transport only when
    /// nothing decodable is buffered.
    pub(crate) fn next_event(&mut self, wait: Wait) -> Result<Outcome<Event>, SessionError> {
        loop {
            if let Some(event) = self.decode_buffered() {
                return Ok(Outcome::Completed(event));
            }

            let expired = match wait {
                Wait::Cancellable => self.cancel.is_cancelled(),
                Wait::Until(deadline) => Instant::now() >= deadline,
            };
            if expired {
                return Ok(Outcome::Cancelled);
            }

            let link = self
                .link
                .as_mut()
                .ok_or(SessionError::NotAttached { operation: "read" })?;
            match link.transport.read_available() {
                Ok(bytes) => self.acc.append(&bytes),
                Err(e) => {
                    self.drop_link(&e);
                    return Err(SessionError::Connection(e));
                }
            }
        }
    }

    /// Decodes and classifies the next buffered message, skipping anything
    /// that fails to frame or classify.
    fn decode_buffered(&mut self) -> Option<Event> {
        decode_next(&mut self.decoder, &mut self.acc, &self.classifier)
    }

    /// Delivers an asynchronous event to the observers.
    ///
    /// A reply seen here settles a command left pending by a cancelled wait.
    pub(crate) fn dispatch(
        &mut self,
        event: Event,
        extra: Option<&mut dyn EventObserver>,
    ) -> Result<Disposition, SessionError> {
        if let Event::CommandReply(reply) = &event {
            let handle = self.settle_reply(reply)?;
            info!(command = %handle.command, "late reply received");
            return Ok(Disposition::Continue);
        }

        let mut disposition = Disposition::Continue;
        for observer in self.observers.iter_mut() {
            if observer.on_event(&event) == Disposition::Halt {
                disposition = Disposition::Halt;
            }
        }
        if let Some(observer) = extra {
            if observer.on_event(&event) == Disposition::Halt {
                disposition = Disposition::Halt;
            }
        }
        if disposition == Disposition::Halt {
            self.set_mode(Mode::Halted);
        }
        Ok(disposition)
    }

    // ── Core operations ───────────────────────────────────────────────────────

    /// Running → Halted.  Returns the Vcap saved on entry to debug mode.
    ///
    /// If cancelled before the board answers, the mode stays Running and the
    /// command stays outstanding.
    pub fn interrupt(&mut self) -> Result<Outcome<f32>, SessionError> {
        self.require_mode("interrupt", Mode::Running)?;
        let reply = self.request("interrupt", Descriptor::EnterDebug, &[])?;
        let calibration = *self.calibration();
        reply
            .map(|r| reply_u16(&r).map(|raw| calibration.adc_to_volts(raw)))
            .transpose()
    }

    /// Halted → Running.  Returns the Vcap restored on exit from debug mode.
    pub fn resume(&mut self) -> Result<Outcome<f32>, SessionError> {
        self.require_mode("resume", Mode::Halted)?;
        let reply = self.request("resume", Descriptor::ExitDebug, &[])?;
        let calibration = *self.calibration();
        reply
            .map(|r| reply_u16(&r).map(|raw| calibration.adc_to_volts(raw)))
            .transpose()
    }

    /// Arms an energy breakpoint at `volts` and waits until the target halts.
    ///
    /// Completes on an interrupt context of kind BREAKPOINT or
    /// ENERGY_BREAKPOINT, or on any other interrupt context that an observer
    /// treats as a halt.  On cancellation the mode is whatever the board last
    /// reported.
    pub fn break_at_voltage_level(
        &mut self,
        volts: f32,
        method: ChargeMethod,
    ) -> Result<Outcome<InterruptContext>, SessionError> {
        self.require_mode("break", Mode::Running)?;
        let [lo, hi] = self.calibration().volts_to_adc(volts)?.to_le_bytes();

        if self
            .request("break", Descriptor::BreakAtVcap, &[method as u8, lo, hi])?
            .is_cancelled()
        {
            return Ok(Outcome::Cancelled);
        }

        loop {
            let event = match self.next_event(Wait::Cancellable)? {
                Outcome::Completed(event) => event,
                Outcome::Cancelled => return Ok(Outcome::Cancelled),
            };
            let context = match &event {
                Event::InterruptContext(ctx) => Some(ctx.clone()),
                _ => None,
            };
            let disposition = self.dispatch(event, None)?;
            if let Some(ctx) = context {
                let is_break = matches!(
                    ctx.kind,
                    InterruptKind::Breakpoint | InterruptKind::EnergyBreakpoint
                );
                if is_break || disposition == Disposition::Halt {
                    self.set_mode(Mode::Halted);
                    return Ok(Outcome::Completed(ctx));
                }
            }
        }
    }

    /// Pumps asynchronous events until an observer requests a halt.
    ///
    /// `observer` sees every event after the registered observers.
    pub fn wait(&mut self, observer: &mut dyn EventObserver) -> Result<Outcome<()>, SessionError> {
        self.require_attached("wait")?;
        loop {
            let event = match self.next_event(Wait::Cancellable)? {
                Outcome::Completed(event) => event,
                Outcome::Cancelled => return Ok(Outcome::Cancelled),
            };
            if self.dispatch(event, Some(&mut *observer))? == Disposition::Halt {
                return Ok(Outcome::Completed(()));
            }
        }
    }

    /// Waits again for the reply of a command whose wait was cancelled.
    pub fn finish_pending(&mut self) -> Result<Outcome<(CommandHandle, CommandReply)>, SessionError> {
        let handle = self
            .outstanding()
            .ok_or(ProtocolViolation::NothingOutstanding)?;
        Ok(self
            .await_reply(Wait::Cancellable)?
            .map(|reply| (handle, reply)))
    }

    /// Forgets the outstanding command.  A reply arriving later is reported
    /// as unsolicited.
    pub fn abandon_pending(&mut self) -> Option<CommandHandle> {
        let handle = self.link.as_mut()?.outstanding.take()?;
        warn!(command = %handle.command, "abandoned outstanding command");
        Some(handle)
    }

    /// Decodes a previously recorded receive log and shows its events to the
    /// observers.
    ///
    /// The log gets its own buffer and decoder, so a log cut mid-message
    /// never mixes with live traffic.  Observer dispositions are ignored:
    /// recorded interrupt contexts describe a past run and leave the live
    /// mode alone.  Replies in the log are counted and skipped.  Works
    /// detached.
    pub fn replay(&mut self, bytes: &[u8]) -> Result<ReplaySummary, SessionError> {
        let mut acc = ByteAccumulator::new();
        let mut decoder = PacketDecoder::for_host();
        let mut summary = ReplaySummary::default();

        acc.append(bytes);
        while let Some(event) = decode_next(&mut decoder, &mut acc, &self.classifier) {
            if matches!(event, Event::CommandReply(_)) {
                summary.replies_skipped += 1;
                continue;
            }
            summary.events += 1;
            for observer in self.observers.iter_mut() {
                observer.on_event(&event);
            }
        }

        if !acc.is_empty() {
            warn!(bytes = acc.len(), "replay log ends mid-message; trailing bytes discarded");
            summary.trailing_bytes = acc.len() as u64;
        }
        summary.framing_errors = decoder.resync_count();
        info!(
            events = summary.events,
            skipped = summary.replies_skipped,
            framing_errors = summary.framing_errors,
            trailing = summary.trailing_bytes,
            "replay finished"
        );
        Ok(summary)
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        self.detach();
    }
}

fn decode_next(
    decoder: &mut PacketDecoder,
    acc: &mut ByteAccumulator,
    classifier: &Classifier,
) -> Option<Event> {
    loop {
        match decoder.try_decode(acc) {
            Ok(Some(msg)) => match classifier.classify(msg) {
                Ok(event) => {
                    debug!(kind = event.kind_name(), "event");
                    return Some(event);
                }
                Err(e) => warn!("dropping message: {e}"),
            },
            Ok(None) => return None,
            Err(e) => debug!("framing: {e}"),
        }
    }
}

// ── Reply payload helpers ─────────────────────────────────────────────────────

pub(crate) fn malformed(reply: &CommandReply, reason: impl Into<String>) -> SessionError {
    ProtocolViolation::MalformedReply {
        descriptor: reply.descriptor,
        reason: reason.into(),
    }
    .into()
}

pub(crate) fn reply_u8(reply: &CommandReply) -> Result<u8, SessionError> {
    match reply.payload.as_slice() {
        [value] => Ok(*value),
        other => Err(malformed(reply, format!("expected 1 byte, got {}", other.len()))),
    }
}

pub(crate) fn reply_u16(reply: &CommandReply) -> Result<u16, SessionError> {
    match reply.payload.as_slice() {
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        other => Err(malformed(reply, format!("expected 2 bytes, got {}", other.len()))),
    }
}

pub(crate) fn reply_u32(reply: &CommandReply) -> Result<u32, SessionError> {
    match reply.payload.as_slice() {
        [a, b, c, d] => Ok(u32::from_le_bytes([*a, *b, *c, *d])),
        other => Err(malformed(reply, format!("expected 4 bytes, got {}", other.len()))),
    }
}

pub(crate) fn reply_interrupt_context(
    reply: &CommandReply,
    calibration: &Calibration,
) -> Result<InterruptContext, SessionError> {
    parse_interrupt_context(reply.descriptor, &reply.payload, calibration)
        .map_err(|e| malformed(reply, e.to_string()))
}

/// `Outcome<Result<T, E>>` → `Result<Outcome<T>, E>`.
trait TransposeOutcome<T, E> {
    fn transpose(self) -> Result<Outcome<T>, E>;
}

impl<T, E> TransposeOutcome<T, E> for Outcome<Result<T, E>> {
    fn transpose(self) -> Result<Outcome<T>, E> {
        match self {
            Outcome::Completed(Ok(v)) => Ok(Outcome::Completed(v)),
            Outcome::Completed(Err(e)) => Err(e),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
