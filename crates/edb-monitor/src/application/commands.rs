//! The debugger board's command set, as operations on [`Session`].
//!
//! Each operation validates its arguments, then goes through
//! [`Session::request`], so the one-command-at-a-time rule and cancellation
//! behave the same for all of them.  Arguments are checked before anything is
//! written: a rejected call leaves the device and the session untouched.

use std::fmt;

use edb_core::protocol::{
    BreakpointType, ChargeMethod, Channel, InterruptContext, InterruptSource, Param, ParamScope,
};
use edb_core::Descriptor;

use crate::application::session::{
    malformed, reply_interrupt_context, reply_u16, reply_u32, reply_u8, Mode, Outcome, Session,
    SessionError,
};
use crate::infrastructure::transport::Connector;

/// Largest memory block one READ_MEMORY or WRITE_MEMORY can carry.
///
/// A prefixed payload holds at most 255 bytes, four of which are the address.
pub const MAX_MEMORY_BLOCK: usize = 251;

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    U16(u16),
    F32(f32),
}

impl ParamValue {
    /// Parses the console text for `param`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] if the text is not a valid
    /// value of the parameter's type.
    pub fn parse(param: Param, text: &str) -> Result<Self, SessionError> {
        let invalid = || SessionError::InvalidArgument(format!("invalid {} value: {text}", param.name()));
        match param {
            Param::Test => parse_u16(text).map(ParamValue::U16).ok_or_else(invalid),
            Param::SavedVcapAdjust => text
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::F32)
                .ok_or_else(invalid),
        }
    }

    fn matches(self, param: Param) -> bool {
        matches!(
            (self, param),
            (ParamValue::U16(_), Param::Test) | (ParamValue::F32(_), Param::SavedVcapAdjust)
        )
    }

    fn to_le_bytes(self) -> Vec<u8> {
        match self {
            ParamValue::U16(v) => v.to_le_bytes().to_vec(),
            ParamValue::F32(v) => v.to_le_bytes().to_vec(),
        }
    }

    fn from_le_bytes(param: Param, bytes: &[u8]) -> Option<Self> {
        match (param, bytes) {
            (Param::Test, [a, b]) => Some(ParamValue::U16(u16::from_le_bytes([*a, *b]))),
            (Param::SavedVcapAdjust, [a, b, c, d]) => {
                Some(ParamValue::F32(f32::from_le_bytes([*a, *b, *c, *d])))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::U16(v) => write!(f, "{v}"),
            ParamValue::F32(v) => write!(f, "{v}"),
        }
    }
}

fn parse_u16(text: &str) -> Option<u16> {
    match text.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl<C: Connector> Session<C> {
    /// Switches the target's continuous power supply on or off.
    pub fn power(&mut self, on: bool) -> Result<Outcome<()>, SessionError> {
        self.require_attached("power")?;
        Ok(self
            .request("power", Descriptor::Power, &[u8::from(on)])?
            .map(|_| ()))
    }

    /// Samples one ADC channel.
    pub fn sense(&mut self, channel: Channel) -> Result<Outcome<f32>, SessionError> {
        self.require_attached("sense")?;
        let calibration = *self.calibration();
        match self.request("sense", Descriptor::Sense, &[channel as u8])? {
            Outcome::Completed(reply) => Ok(Outcome::Completed(
                calibration.adc_to_volts(reply_u16(&reply)?),
            )),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }

    /// Clears the board's record of debug mode, for recovery after a target
    /// reset left the two sides disagreeing.
    pub fn reset_debug_state(&mut self) -> Result<Outcome<()>, SessionError> {
        self.require_attached("reset")?;
        Ok(self
            .request("reset", Descriptor::ResetDebugState, &[])?
            .map(|_| ()))
    }

    /// Charges the storage capacitor up to `volts`.
    ///
    /// With [`ChargeMethod::Adc`] the board reports the level reached; with
    /// [`ChargeMethod::Cmp`] it only acknowledges, and `None` is returned.
    pub fn charge(
        &mut self,
        volts: f32,
        method: ChargeMethod,
    ) -> Result<Outcome<Option<f32>>, SessionError> {
        let command = match method {
            ChargeMethod::Adc => Descriptor::Charge,
            ChargeMethod::Cmp => Descriptor::ChargeCmp,
        };
        self.move_vcap("charge", command, volts)
    }

    /// Discharges the storage capacitor down to `volts`.
    pub fn discharge(
        &mut self,
        volts: f32,
        method: ChargeMethod,
    ) -> Result<Outcome<Option<f32>>, SessionError> {
        let command = match method {
            ChargeMethod::Adc => Descriptor::Discharge,
            ChargeMethod::Cmp => Descriptor::DischargeCmp,
        };
        self.move_vcap("discharge", command, volts)
    }

    fn move_vcap(
        &mut self,
        operation: &'static str,
        command: Descriptor,
        volts: f32,
    ) -> Result<Outcome<Option<f32>>, SessionError> {
        self.require_attached(operation)?;
        let calibration = *self.calibration();
        let target = calibration.volts_to_adc(volts)?;
        match self.request(operation, command, &target.to_le_bytes())? {
            Outcome::Completed(reply) if reply.descriptor == Descriptor::VcapReached => Ok(
                Outcome::Completed(Some(calibration.adc_to_volts(reply_u16(&reply)?))),
            ),
            Outcome::Completed(_) => Ok(Outcome::Completed(None)),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }

    /// Arms or disarms breakpoint `index` of the given implementation.
    ///
    /// `energy_level` is the Vcap threshold for energy-conditioned
    /// breakpoints.  COMBINED breakpoints require one; for the other types it
    /// is optional and sent as "no level" when absent.
    pub fn toggle_breakpoint(
        &mut self,
        kind: BreakpointType,
        index: u8,
        enable: bool,
        energy_level: Option<f32>,
    ) -> Result<Outcome<()>, SessionError> {
        self.require_attached("break")?;
        let level = match (kind, energy_level) {
            (BreakpointType::Combined, None) if enable => {
                return Err(SessionError::InvalidArgument(
                    "COMBINED breakpoints need an energy level".to_string(),
                ))
            }
            (_, Some(volts)) => self.calibration().volts_to_adc(volts)?,
            (_, None) => edb_core::domain::calibration::NO_VOLTAGE,
        };
        let [lo, hi] = level.to_le_bytes();
        Ok(self
            .request(
                "break",
                Descriptor::ToggleBreakpoint,
                &[kind as u8, index, u8::from(enable), lo, hi],
            )?
            .map(|_| ()))
    }

    /// Arms or disarms watchpoint `index`.
    pub fn toggle_watchpoint(&mut self, index: u8, enable: bool) -> Result<Outcome<()>, SessionError> {
        self.require_attached("watch")?;
        Ok(self
            .request(
                "watch",
                Descriptor::ToggleWatchpoint,
                &[index, u8::from(enable)],
            )?
            .map(|_| ()))
    }

    /// Routes the target's UART to the host as STDIO events, or stops doing so.
    pub fn enable_target_uart(&mut self, enable: bool) -> Result<Outcome<()>, SessionError> {
        self.require_attached("uart")?;
        Ok(self
            .request("uart", Descriptor::EnableTargetUart, &[u8::from(enable)])?
            .map(|_| ()))
    }

    /// Fetches the saved context of the last interrupt from `source`.
    pub fn interrupt_context(
        &mut self,
        source: InterruptSource,
    ) -> Result<Outcome<InterruptContext>, SessionError> {
        self.require_attached("intctx")?;
        let calibration = *self.calibration();
        match self.request("intctx", Descriptor::GetInterruptContext, &[source as u8])? {
            Outcome::Completed(reply) => Ok(Outcome::Completed(reply_interrupt_context(
                &reply,
                &calibration,
            )?)),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }

    /// Reads `len` bytes of target memory.  Returns the address the board
    /// echoed back along with the bytes.
    pub fn read_memory(
        &mut self,
        address: u32,
        len: usize,
    ) -> Result<Outcome<(u32, Vec<u8>)>, SessionError> {
        self.require_mode("read", Mode::Halted)?;
        let len = u8::try_from(len)
            .ok()
            .filter(|n| (1..=MAX_MEMORY_BLOCK).contains(&usize::from(*n)))
            .ok_or_else(|| {
                SessionError::InvalidArgument(format!(
                    "read length {len} outside 1..={MAX_MEMORY_BLOCK}"
                ))
            })?;

        let mut payload = address.to_le_bytes().to_vec();
        payload.push(len);
        let reply = match self.request("read", Descriptor::ReadMemory, &payload)? {
            Outcome::Completed(reply) => reply,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
        };

        if reply.payload.len() < 4 {
            return Err(malformed(&reply, "missing address"));
        }
        let (addr, bytes) = reply.payload.split_at(4);
        let echoed = u32::from_le_bytes([addr[0], addr[1], addr[2], addr[3]]);
        Ok(Outcome::Completed((echoed, bytes.to_vec())))
    }

    /// Writes `bytes` to target memory at `address`.
    pub fn write_memory(&mut self, address: u32, bytes: &[u8]) -> Result<Outcome<()>, SessionError> {
        self.require_mode("write", Mode::Halted)?;
        if bytes.is_empty() || bytes.len() > MAX_MEMORY_BLOCK {
            return Err(SessionError::InvalidArgument(format!(
                "write length {} outside 1..={MAX_MEMORY_BLOCK}",
                bytes.len()
            )));
        }
        let mut payload = address.to_le_bytes().to_vec();
        payload.extend_from_slice(bytes);
        Ok(self
            .request("write", Descriptor::WriteMemory, &payload)?
            .map(|_| ()))
    }

    /// Reads the target's program counter.
    pub fn get_pc(&mut self) -> Result<Outcome<u32>, SessionError> {
        self.require_mode("pc", Mode::Halted)?;
        match self.request("pc", Descriptor::GetPc, &[])? {
            Outcome::Completed(reply) => Ok(Outcome::Completed(reply_u32(&reply)?)),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }

    /// Round-trips a byte over the debugger ↔ target serial link.
    pub fn serial_echo(&mut self, value: u8) -> Result<Outcome<u8>, SessionError> {
        self.echo("secho", Descriptor::SerialEcho, value)
    }

    /// Round-trips a byte through the board's DMA path.
    pub fn dma_echo(&mut self, value: u8) -> Result<Outcome<u8>, SessionError> {
        self.echo("decho", Descriptor::DmaEcho, value)
    }

    fn echo(
        &mut self,
        operation: &'static str,
        command: Descriptor,
        value: u8,
    ) -> Result<Outcome<u8>, SessionError> {
        self.require_attached(operation)?;
        match self.request(operation, command, &[value])? {
            Outcome::Completed(reply) => Ok(Outcome::Completed(reply_u8(&reply)?)),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }

    /// Reads a parameter from the board (`Local`) or the target (`Remote`).
    pub fn get_param(
        &mut self,
        scope: ParamScope,
        param: Param,
    ) -> Result<Outcome<ParamValue>, SessionError> {
        self.require_attached("get param")?;
        match self.request("get param", Descriptor::GetParam, &[scope as u8, param as u8])? {
            Outcome::Completed(reply) => ParamValue::from_le_bytes(param, &reply.payload)
                .map(Outcome::Completed)
                .ok_or_else(|| malformed(&reply, format!("bad {} value", param.name()))),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }

    /// Sets a parameter and returns the value the device now holds.
    pub fn set_param(
        &mut self,
        scope: ParamScope,
        param: Param,
        value: ParamValue,
    ) -> Result<Outcome<ParamValue>, SessionError> {
        self.require_attached("set param")?;
        if !value.matches(param) {
            return Err(SessionError::InvalidArgument(format!(
                "{value} is the wrong type for {}",
                param.name()
            )));
        }
        let mut payload = vec![scope as u8, param as u8];
        payload.extend(value.to_le_bytes());
        match self.request("set param", Descriptor::SetParam, &payload)? {
            Outcome::Completed(reply) => ParamValue::from_le_bytes(param, &reply.payload)
                .map(Outcome::Completed)
                .ok_or_else(|| malformed(&reply, format!("bad {} value", param.name()))),
            Outcome::Cancelled => Ok(Outcome::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::ProtocolViolation;
    use crate::infrastructure::transport::mock::{MockConnector, MockDevice};
    use edb_core::protocol::InterruptKind;
    use edb_core::{encode_message, Calibration};

    fn msg(descriptor: Descriptor, payload: &[u8]) -> Vec<u8> {
        encode_message(descriptor, payload).unwrap()
    }

    fn attached() -> (Session<MockConnector>, MockDevice) {
        let device = MockDevice::new();
        let mut session = Session::new(MockConnector::new(device.clone()), Calibration::default());
        session.attach().unwrap();
        device.cancel_when_idle(session.cancel_token());
        (session, device)
    }

    fn halted() -> (Session<MockConnector>, MockDevice) {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::VcapSaved, &[0, 8]));
        assert!(!session.interrupt().unwrap().is_cancelled());
        (session, device)
    }

    fn last_write(device: &MockDevice) -> Vec<u8> {
        device.written().last().cloned().unwrap_or_default()
    }

    #[test]
    fn test_power_sends_state_and_waits_for_ack() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));

        let outcome = session.power(true).unwrap();

        assert_eq!(outcome, Outcome::Completed(()));
        assert_eq!(device.written(), vec![vec![0x02, 0x01]]);
    }

    #[test]
    fn test_sense_converts_reading_to_volts() {
        // Arrange
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::SenseResult, &1024u16.to_le_bytes()));

        // Act
        let volts = session.sense(Channel::Vreg).unwrap().completed().unwrap();

        // Assert
        assert!((volts - 0.75).abs() < 1e-6);
        assert_eq!(last_write(&device), vec![0x01, Channel::Vreg as u8]);
    }

    #[test]
    fn test_charge_with_adc_reports_reached_level() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::VcapReached, &2048u16.to_le_bytes()));

        let reached = session.charge(1.5, ChargeMethod::Adc).unwrap();

        assert_eq!(reached, Outcome::Completed(Some(1.5)));
        assert_eq!(last_write(&device), vec![0x03, 0x00, 0x08]);
    }

    #[test]
    fn test_discharge_with_comparator_only_acknowledges() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));

        let reached = session.discharge(1.5, ChargeMethod::Cmp).unwrap();

        assert_eq!(reached, Outcome::Completed(None));
        assert_eq!(last_write(&device), vec![0x06, 0x00, 0x08]);
    }

    #[test]
    fn test_charge_rejects_out_of_range_voltage_without_sending() {
        let (mut session, device) = attached();

        let err = session.charge(-0.1, ChargeMethod::Adc).unwrap_err();

        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(device.written().is_empty());
        assert_eq!(session.outstanding(), None);
    }

    #[test]
    fn test_toggle_breakpoint_encodes_type_index_enable_and_level() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));

        session
            .toggle_breakpoint(BreakpointType::Combined, 2, true, Some(1.5))
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(last_write(&device), vec![0x0A, 3, 2, 1, 0x00, 0x08]);
    }

    #[test]
    fn test_toggle_breakpoint_without_level_sends_no_voltage() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));

        session
            .toggle_breakpoint(BreakpointType::Internal, 0, false, None)
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(last_write(&device), vec![0x0A, 1, 0, 0, 0xFF, 0xFF]);
    }

    #[test]
    fn test_combined_breakpoint_requires_energy_level() {
        let (mut session, device) = attached();

        let err = session
            .toggle_breakpoint(BreakpointType::Combined, 0, true, None)
            .unwrap_err();

        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_toggle_watchpoint_and_uart() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Ack, &[]));
        device.push_chunk(&msg(Descriptor::Ack, &[]));

        session.toggle_watchpoint(4, true).unwrap().completed().unwrap();
        session.enable_target_uart(false).unwrap().completed().unwrap();

        assert_eq!(device.written(), vec![vec![0x0B, 4, 1], vec![0x14, 0]]);
    }

    #[test]
    fn test_interrupt_context_parses_reply() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(
            Descriptor::InterruptContextReply,
            &[3, 0x2A, 0x00, 0xFF, 0xFF],
        ));

        let ctx = session
            .interrupt_context(InterruptSource::Target)
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(ctx.kind, InterruptKind::Assert);
        assert_eq!(ctx.id, 42);
        assert_eq!(ctx.saved_vcap, None);
        assert_eq!(last_write(&device), vec![0x0C, 1]);
    }

    #[test]
    fn test_memory_access_requires_halted() {
        let (mut session, device) = attached();

        assert!(matches!(
            session.read_memory(0x4400, 4),
            Err(SessionError::InvalidMode {
                operation: "read",
                mode: Mode::Running
            })
        ));
        assert!(matches!(
            session.write_memory(0x4400, &[1]),
            Err(SessionError::InvalidMode { .. })
        ));
        assert!(matches!(
            session.get_pc(),
            Err(SessionError::InvalidMode { .. })
        ));
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_read_memory_returns_echoed_address_and_bytes() {
        // Arrange
        let (mut session, device) = halted();
        let mut reply = 0x4400u32.to_le_bytes().to_vec();
        reply.extend([0xDE, 0xAD]);
        device.push_chunk(&msg(Descriptor::Memory, &reply));

        // Act
        let (addr, bytes) = session.read_memory(0x4400, 2).unwrap().completed().unwrap();

        // Assert
        assert_eq!(addr, 0x4400);
        assert_eq!(bytes, vec![0xDE, 0xAD]);
        assert_eq!(last_write(&device), vec![0x0D, 0x00, 0x44, 0x00, 0x00, 2]);
    }

    #[test]
    fn test_read_memory_rejects_bad_lengths() {
        let (mut session, _device) = halted();
        assert!(matches!(
            session.read_memory(0, 0),
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.read_memory(0, MAX_MEMORY_BLOCK + 1),
            Err(SessionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_write_memory_sends_prefixed_address_and_bytes() {
        let (mut session, device) = halted();
        device.push_chunk(&msg(Descriptor::Ack, &[]));

        session
            .write_memory(0x1C00, &[0x01, 0x02, 0x03])
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(
            last_write(&device),
            vec![0x0E, 7, 0x00, 0x1C, 0x00, 0x00, 0x01, 0x02, 0x03]
        );
    }

    #[test]
    fn test_write_memory_rejects_oversized_block() {
        let (mut session, device) = halted();
        let before = device.written().len();

        let err = session
            .write_memory(0, &[0u8; MAX_MEMORY_BLOCK + 1])
            .unwrap_err();

        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert_eq!(device.written().len(), before);
    }

    #[test]
    fn test_get_pc_reads_u32() {
        let (mut session, device) = halted();
        device.push_chunk(&msg(Descriptor::Pc, &0x0000_C0DEu32.to_le_bytes()));

        assert_eq!(session.get_pc().unwrap(), Outcome::Completed(0xC0DE));
    }

    #[test]
    fn test_echo_commands_return_device_byte() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Echo, &[0x5A]));
        device.push_chunk(&msg(Descriptor::Echo, &[0xA5]));

        assert_eq!(session.serial_echo(0x5A).unwrap(), Outcome::Completed(0x5A));
        assert_eq!(session.dma_echo(0xA5).unwrap(), Outcome::Completed(0xA5));
        assert_eq!(device.written(), vec![vec![0x10, 0x5A], vec![0x11, 0xA5]]);
    }

    #[test]
    fn test_get_param_decodes_typed_value() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Param, &0.25f32.to_le_bytes()));

        let value = session
            .get_param(ParamScope::Remote, Param::SavedVcapAdjust)
            .unwrap();

        assert_eq!(value, Outcome::Completed(ParamValue::F32(0.25)));
        assert_eq!(last_write(&device), vec![0x13, 1, 1]);
    }

    #[test]
    fn test_set_param_sends_scope_param_and_value() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Param, &300u16.to_le_bytes()));

        let value = session
            .set_param(ParamScope::Local, Param::Test, ParamValue::U16(300))
            .unwrap();

        assert_eq!(value, Outcome::Completed(ParamValue::U16(300)));
        assert_eq!(last_write(&device), vec![0x12, 4, 0, 0, 0x2C, 0x01]);
    }

    #[test]
    fn test_set_param_rejects_mismatched_type() {
        let (mut session, device) = attached();

        let err = session
            .set_param(ParamScope::Local, Param::Test, ParamValue::F32(1.0))
            .unwrap_err();

        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_param_with_wrong_width_is_malformed_reply() {
        let (mut session, device) = attached();
        device.push_chunk(&msg(Descriptor::Param, &[1]));

        let err = session.get_param(ParamScope::Local, Param::Test).unwrap_err();

        assert!(matches!(
            err,
            SessionError::ProtocolViolation(ProtocolViolation::MalformedReply { .. })
        ));
    }

    #[test]
    fn test_param_value_parsing() {
        assert_eq!(
            ParamValue::parse(Param::Test, "0x10").unwrap(),
            ParamValue::U16(16)
        );
        assert_eq!(
            ParamValue::parse(Param::SavedVcapAdjust, "-0.5").unwrap(),
            ParamValue::F32(-0.5)
        );
        assert!(ParamValue::parse(Param::Test, "70000").is_err());
        assert!(ParamValue::parse(Param::SavedVcapAdjust, "NaN").is_err());
    }

    #[test]
    fn test_commands_while_detached_are_rejected() {
        let mut session = Session::new(MockConnector::new(MockDevice::new()), Calibration::default());
        assert!(matches!(
            session.power(true),
            Err(SessionError::NotAttached { operation: "power" })
        ));
        assert!(matches!(
            session.sense(Channel::Vcap),
            Err(SessionError::NotAttached { .. })
        ));
    }
}
