//! Conversions between raw device units and physical units.
//!
//! The debugger board reports two kinds of raw numbers:
//!
//! - **ADC counts** from its 12-bit converter (0..=4095).  The upper four bits
//!   of the 16-bit field are unused and masked off.
//! - **Timer cycles** from a free-running 32-bit counter.
//!
//! [`Calibration`] turns both into volts and seconds.  The defaults match the
//! reference board: a 3.0 V ADC reference and a 3 MHz timer (24 MHz SMCLK
//! divided by 8).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of distinct ADC codes (12-bit converter).
pub const ADC_FULL_SCALE: u32 = 4096;

/// Mask selecting the meaningful bits of a raw ADC field.
pub const ADC_MASK: u16 = 0x0FFF;

/// Raw voltage field value meaning "no voltage was recorded".
pub const NO_VOLTAGE: u16 = 0xFFFF;

/// Errors raised when converting operator-supplied physical values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    /// The requested voltage lies outside `0.0..=vdd`.
    #[error("voltage {volts} V is outside the measurable range 0..={vdd} V")]
    VoltageOutOfRange { volts: f32, vdd: f32 },

    /// The requested duration is negative or not a number.
    #[error("duration {0} s is not a non-negative number")]
    InvalidDuration(f64),
}

/// Scale factors for the attached board.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// ADC reference voltage in volts.
    #[serde(default = "default_vdd_volts")]
    pub vdd_volts: f32,
    /// Frequency of the time-stamping counter in Hz.
    #[serde(default = "default_timer_hz")]
    pub timer_hz: u32,
}

fn default_vdd_volts() -> f32 {
    3.0
}
fn default_timer_hz() -> u32 {
    3_000_000
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            vdd_volts: default_vdd_volts(),
            timer_hz: default_timer_hz(),
        }
    }
}

impl Calibration {
    /// Converts a raw ADC field to volts.
    pub fn adc_to_volts(&self, raw: u16) -> f32 {
        f32::from(raw & ADC_MASK) * self.vdd_volts / ADC_FULL_SCALE as f32
    }

    /// Converts a raw voltage field to volts, honouring the [`NO_VOLTAGE`]
    /// sentinel.
    pub fn optional_adc_to_volts(&self, raw: u16) -> Option<f32> {
        (raw != NO_VOLTAGE).then(|| self.adc_to_volts(raw))
    }

    /// Converts a target voltage to the ADC code the board compares against.
    ///
    /// Rounds up, so the board stops at or just above the requested level,
    /// and clamps to the largest representable code.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::VoltageOutOfRange`] for negative, NaN, or
    /// above-reference voltages.
    pub fn volts_to_adc(&self, volts: f32) -> Result<u16, CalibrationError> {
        if !(0.0..=self.vdd_volts).contains(&volts) {
            return Err(CalibrationError::VoltageOutOfRange {
                volts,
                vdd: self.vdd_volts,
            });
        }
        let code = (volts * ADC_FULL_SCALE as f32 / self.vdd_volts).ceil() as u32;
        Ok(code.min(u32::from(ADC_MASK)) as u16)
    }

    /// Converts a cycle count to seconds.
    pub fn cycles_to_seconds(&self, cycles: u64) -> f64 {
        cycles as f64 / f64::from(self.timer_hz)
    }

    /// Converts a duration in seconds to whole timer cycles (rounded up).
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationError::InvalidDuration`] for negative or NaN input.
    pub fn seconds_to_cycles(&self, seconds: f64) -> Result<u64, CalibrationError> {
        if !(seconds >= 0.0) {
            return Err(CalibrationError::InvalidDuration(seconds));
        }
        Ok((seconds * f64::from(self.timer_hz)).ceil() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_calibration_matches_reference_board() {
        let cal = Calibration::default();
        assert_eq!(cal.vdd_volts, 3.0);
        assert_eq!(cal.timer_hz, 3_000_000);
    }

    #[test]
    fn test_adc_to_volts_scales_and_masks_upper_bits() {
        let cal = Calibration::default();
        assert!((cal.adc_to_volts(2048) - 1.5).abs() < 1e-6);
        // Upper nibble is garbage and must be ignored.
        assert!((cal.adc_to_volts(0xF800) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_optional_adc_to_volts_honours_sentinel() {
        let cal = Calibration::default();
        assert_eq!(cal.optional_adc_to_volts(NO_VOLTAGE), None);
        assert!(cal.optional_adc_to_volts(0).is_some());
    }

    #[test]
    fn test_volts_to_adc_rounds_up() {
        // 2.0 V with a 3.0 V reference is 2730.67 counts.
        let cal = Calibration::default();
        assert_eq!(cal.volts_to_adc(2.0), Ok(2731));
    }

    #[test]
    fn test_volts_to_adc_clamps_full_scale() {
        let cal = Calibration::default();
        assert_eq!(cal.volts_to_adc(3.0), Ok(4095));
    }

    #[test]
    fn test_volts_to_adc_rejects_out_of_range_values() {
        let cal = Calibration::default();
        assert!(cal.volts_to_adc(-0.1).is_err());
        assert!(cal.volts_to_adc(3.01).is_err());
        assert!(cal.volts_to_adc(f32::NAN).is_err());
    }

    #[test]
    fn test_cycle_conversions() {
        let cal = Calibration::default();
        assert!((cal.cycles_to_seconds(1_500_000) - 0.5).abs() < 1e-12);
        assert_eq!(cal.seconds_to_cycles(2.0), Ok(6_000_000));
        assert!(cal.seconds_to_cycles(-1.0).is_err());
        assert!(cal.seconds_to_cycles(f64::NAN).is_err());
    }
}
