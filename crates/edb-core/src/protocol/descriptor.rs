//! The descriptor table: every message kind the monitor link knows about.
//!
//! Every message on the serial link starts with a single *descriptor* byte.
//! The descriptor alone tells the receiver two things:
//!
//! - **What the message means** (a command, a reply, or an asynchronous event).
//! - **How many payload bytes follow**, either as a fixed count or through a
//!   one-byte length prefix.
//!
//! There is no start-of-frame marker and no checksum, so the table below is
//! the only thing that keeps the two ends in step.  A receiver that meets a
//! byte it cannot find in this table has lost synchronisation.
//!
//! # Wire layout
//!
//! ```text
//! Fixed(n):   [descriptor:1][payload:n]
//! Prefixed:   [descriptor:1][len:1][payload:len]
//! ```
//!
//! Host → device descriptors live in `0x01..=0x17`; device → host descriptors
//! live in `0x80..=0x99`.

use serde::{Deserialize, Serialize};

/// How the payload length of a message is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLength {
    /// Exactly this many payload bytes follow the descriptor.
    Fixed(usize),
    /// A single length byte follows the descriptor, then that many bytes.
    Prefixed,
}

impl PayloadLength {
    /// Total bytes occupied on the wire by the framing (descriptor + length
    /// byte, if any), excluding the payload itself.
    pub fn header_len(self) -> usize {
        match self {
            PayloadLength::Fixed(_) => 1,
            PayloadLength::Prefixed => 2,
        }
    }
}

/// Which end of the link originates a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the host monitor to the debugger board.
    HostToDevice,
    /// Sent by the debugger board to the host monitor.
    DeviceToHost,
}

/// All descriptor codes defined by the monitor protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Descriptor {
    // Commands (host → device)
    Sense = 0x01,
    Power = 0x02,
    Charge = 0x03,
    Discharge = 0x04,
    ChargeCmp = 0x05,
    DischargeCmp = 0x06,
    EnterDebug = 0x07,
    ExitDebug = 0x08,
    BreakAtVcap = 0x09,
    ToggleBreakpoint = 0x0A,
    ToggleWatchpoint = 0x0B,
    GetInterruptContext = 0x0C,
    ReadMemory = 0x0D,
    WriteMemory = 0x0E,
    GetPc = 0x0F,
    SerialEcho = 0x10,
    DmaEcho = 0x11,
    SetParam = 0x12,
    GetParam = 0x13,
    EnableTargetUart = 0x14,
    ResetDebugState = 0x15,
    StreamBegin = 0x16,
    StreamEnd = 0x17,
    // Samples and asynchronous events (device → host)
    Time = 0x80,
    Vcap = 0x81,
    Vboost = 0x82,
    Vreg = 0x83,
    Vrect = 0x84,
    Vinj = 0x85,
    Interrupted = 0x86,
    Watchpoint = 0x87,
    StdIo = 0x88,
    // Command replies (device → host)
    Ack = 0x90,
    SenseResult = 0x91,
    VcapSaved = 0x92,
    VcapRestored = 0x93,
    VcapReached = 0x94,
    InterruptContextReply = 0x95,
    Memory = 0x96,
    Pc = 0x97,
    Echo = 0x98,
    Param = 0x99,
}

impl TryFrom<u8> for Descriptor {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Descriptor::Sense),
            0x02 => Ok(Descriptor::Power),
            0x03 => Ok(Descriptor::Charge),
            0x04 => Ok(Descriptor::Discharge),
            0x05 => Ok(Descriptor::ChargeCmp),
            0x06 => Ok(Descriptor::DischargeCmp),
            0x07 => Ok(Descriptor::EnterDebug),
            0x08 => Ok(Descriptor::ExitDebug),
            0x09 => Ok(Descriptor::BreakAtVcap),
            0x0A => Ok(Descriptor::ToggleBreakpoint),
            0x0B => Ok(Descriptor::ToggleWatchpoint),
            0x0C => Ok(Descriptor::GetInterruptContext),
            0x0D => Ok(Descriptor::ReadMemory),
            0x0E => Ok(Descriptor::WriteMemory),
            0x0F => Ok(Descriptor::GetPc),
            0x10 => Ok(Descriptor::SerialEcho),
            0x11 => Ok(Descriptor::DmaEcho),
            0x12 => Ok(Descriptor::SetParam),
            0x13 => Ok(Descriptor::GetParam),
            0x14 => Ok(Descriptor::EnableTargetUart),
            0x15 => Ok(Descriptor::ResetDebugState),
            0x16 => Ok(Descriptor::StreamBegin),
            0x17 => Ok(Descriptor::StreamEnd),
            0x80 => Ok(Descriptor::Time),
            0x81 => Ok(Descriptor::Vcap),
            0x82 => Ok(Descriptor::Vboost),
            0x83 => Ok(Descriptor::Vreg),
            0x84 => Ok(Descriptor::Vrect),
            0x85 => Ok(Descriptor::Vinj),
            0x86 => Ok(Descriptor::Interrupted),
            0x87 => Ok(Descriptor::Watchpoint),
            0x88 => Ok(Descriptor::StdIo),
            0x90 => Ok(Descriptor::Ack),
            0x91 => Ok(Descriptor::SenseResult),
            0x92 => Ok(Descriptor::VcapSaved),
            0x93 => Ok(Descriptor::VcapRestored),
            0x94 => Ok(Descriptor::VcapReached),
            0x95 => Ok(Descriptor::InterruptContextReply),
            0x96 => Ok(Descriptor::Memory),
            0x97 => Ok(Descriptor::Pc),
            0x98 => Ok(Descriptor::Echo),
            0x99 => Ok(Descriptor::Param),
            _ => Err(()),
        }
    }
}

impl Descriptor {
    /// Returns the raw wire byte for this descriptor.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns how the payload length for this descriptor is framed.
    pub fn payload_length(self) -> PayloadLength {
        use Descriptor::*;
        match self {
            EnterDebug | ExitDebug | GetPc | ResetDebugState | Ack => PayloadLength::Fixed(0),
            Sense | Power | SerialEcho | DmaEcho | EnableTargetUart | StreamBegin | StreamEnd
            | Echo => PayloadLength::Fixed(1),
            Charge | Discharge | ChargeCmp | DischargeCmp | ToggleWatchpoint | GetParam => {
                PayloadLength::Fixed(2)
            }
            Vcap | Vboost | Vreg | Vrect | Vinj | SenseResult | VcapSaved | VcapRestored
            | VcapReached => PayloadLength::Fixed(2),
            BreakAtVcap => PayloadLength::Fixed(3),
            GetInterruptContext => PayloadLength::Fixed(1),
            Time | Pc => PayloadLength::Fixed(4),
            ToggleBreakpoint | ReadMemory | Interrupted | InterruptContextReply => {
                PayloadLength::Fixed(5)
            }
            Watchpoint => PayloadLength::Fixed(7),
            WriteMemory | SetParam | StdIo | Memory | Param => PayloadLength::Prefixed,
        }
    }

    /// Returns which end of the link sends this descriptor.
    pub fn direction(self) -> Direction {
        if self.code() < 0x80 {
            Direction::HostToDevice
        } else {
            Direction::DeviceToHost
        }
    }

    /// Returns `true` for the device → host descriptors that answer a command.
    pub fn is_reply(self) -> bool {
        (0x90..=0x99).contains(&self.code())
    }

    /// For a command descriptor, the reply descriptor the device answers with.
    ///
    /// Returns `None` for descriptors that are not commands.
    pub fn expected_reply(self) -> Option<Descriptor> {
        use Descriptor::*;
        let reply = match self {
            Sense => SenseResult,
            Charge | Discharge => VcapReached,
            EnterDebug => VcapSaved,
            ExitDebug => VcapRestored,
            GetInterruptContext => InterruptContextReply,
            ReadMemory => Memory,
            GetPc => Pc,
            SerialEcho | DmaEcho => Echo,
            SetParam | GetParam => Param,
            Power | ChargeCmp | DischargeCmp | BreakAtVcap | ToggleBreakpoint
            | ToggleWatchpoint | WriteMemory | EnableTargetUart | ResetDebugState
            | StreamBegin | StreamEnd => Ack,
            _ => return None,
        };
        Some(reply)
    }
}

impl std::fmt::Display for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.code())
    }
}

// ── Enumerated payload fields ─────────────────────────────────────────────────

/// ADC channels that can be sensed once or streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Channel {
    Vcap = 0,
    Vboost = 1,
    Vreg = 2,
    Vrect = 3,
    Vinj = 4,
}

impl Channel {
    /// All channels, in bit order of the stream mask.
    pub const ALL: [Channel; 5] = [
        Channel::Vcap,
        Channel::Vboost,
        Channel::Vreg,
        Channel::Vrect,
        Channel::Vinj,
    ];

    /// Upper-case keyword used on the console.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Vcap => "VCAP",
            Channel::Vboost => "VBOOST",
            Channel::Vreg => "VREG",
            Channel::Vrect => "VRECT",
            Channel::Vinj => "VINJ",
        }
    }

    /// Descriptor used when samples of this channel are streamed.
    pub fn sample_descriptor(self) -> Descriptor {
        match self {
            Channel::Vcap => Descriptor::Vcap,
            Channel::Vboost => Descriptor::Vboost,
            Channel::Vreg => Descriptor::Vreg,
            Channel::Vrect => Descriptor::Vrect,
            Channel::Vinj => Descriptor::Vinj,
        }
    }

    /// Inverse of [`Channel::sample_descriptor`].
    pub fn from_sample_descriptor(descriptor: Descriptor) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|c| c.sample_descriptor() == descriptor)
    }

    /// Bit in the STREAM_BEGIN / STREAM_END mask.
    pub fn stream_bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Interrupt kinds reported in INTERRUPTED and INTERRUPT_CONTEXT_REPLY payloads.
///
/// Unknown codes map to [`InterruptKind::Other`] so classification is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Debugger,
    Breakpoint,
    EnergyBreakpoint,
    Assert,
    Boot,
    Other(u8),
}

impl From<u8> for InterruptKind {
    fn from(value: u8) -> Self {
        match value {
            0 => InterruptKind::Debugger,
            1 => InterruptKind::Breakpoint,
            2 => InterruptKind::EnergyBreakpoint,
            3 => InterruptKind::Assert,
            4 => InterruptKind::Boot,
            n => InterruptKind::Other(n),
        }
    }
}

impl std::fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptKind::Debugger => f.write_str("DEBUGGER"),
            InterruptKind::Breakpoint => f.write_str("BREAKPOINT"),
            InterruptKind::EnergyBreakpoint => f.write_str("ENERGY_BREAKPOINT"),
            InterruptKind::Assert => f.write_str("ASSERT"),
            InterruptKind::Boot => f.write_str("BOOT"),
            InterruptKind::Other(n) => write!(f, "OTHER({n})"),
        }
    }
}

/// Breakpoint implementations the debugger board can arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakpointType {
    Passive = 0,
    Internal = 1,
    External = 2,
    Combined = 3,
}

impl BreakpointType {
    pub const ALL: [BreakpointType; 4] = [
        BreakpointType::Passive,
        BreakpointType::Internal,
        BreakpointType::External,
        BreakpointType::Combined,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BreakpointType::Passive => "PASSIVE",
            BreakpointType::Internal => "INTERNAL",
            BreakpointType::External => "EXTERNAL",
            BreakpointType::Combined => "COMBINED",
        }
    }
}

/// Which side's saved context GET_INTERRUPT_CONTEXT should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterruptSource {
    Debugger = 0,
    Target = 1,
}

impl InterruptSource {
    pub const ALL: [InterruptSource; 2] = [InterruptSource::Debugger, InterruptSource::Target];

    pub fn name(self) -> &'static str {
        match self {
            InterruptSource::Debugger => "DEBUGGER",
            InterruptSource::Target => "TARGET",
        }
    }
}

/// How the debugger board decides a voltage threshold has been reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChargeMethod {
    /// Poll the ADC in a loop; the reached voltage is reported back.
    Adc = 0,
    /// Arm the analog comparator; nothing is reported back.
    Cmp = 1,
}

impl ChargeMethod {
    pub const ALL: [ChargeMethod; 2] = [ChargeMethod::Adc, ChargeMethod::Cmp];

    pub fn name(self) -> &'static str {
        match self {
            ChargeMethod::Adc => "ADC",
            ChargeMethod::Cmp => "CMP",
        }
    }
}

/// Whether a parameter lives on the debugger board or on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamScope {
    Local = 0,
    Remote = 1,
}

/// Tunable parameters addressable through SET_PARAM / GET_PARAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Param {
    /// Scratch value used to check the parameter path end to end.
    Test = 0,
    /// Correction applied to the Vcap level restored on exit from debug mode.
    SavedVcapAdjust = 1,
}

impl Param {
    pub const ALL: [Param; 2] = [Param::Test, Param::SavedVcapAdjust];

    pub fn name(self) -> &'static str {
        match self {
            Param::Test => "TEST",
            Param::SavedVcapAdjust => "SAVED_VCAP_ADJUST",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
