//! Conversion between physical units and converter codes.
//!
//! The DAC is a 16-bit part spanning 0..5 V; the feedback ADC reads the
//! current-sense chain, 4.096 V reference over a 1.25 V offset and a
//! 2 V-per-ampere sense network. Current-to-code conversion goes through each
//! channel's calibrated gain and zero offset.

use crate::hardware::{CHANNELS_PER_BOARD, NUM_BOARDS};

/// DAC full-scale code.
pub const DAC_FULL_SCALE: f32 = 65535.0;
/// DAC output span in volts.
pub const DAC_SPAN_V: f32 = 5.0;
/// DAC mid-scale output, the zero-current operating point.
pub const DAC_MIDSCALE_V: f32 = 2.5;
/// Nominal amplifier transconductance in amperes per volt.
pub const NOMINAL_GAIN_A_PER_V: f32 = -1.62;

/// ADC volts per count.
const ADC_LSB_V: f32 = 4.096 / 4096.0;
/// Current-sense chain offset voltage.
const SENSE_OFFSET_V: f32 = 1.25;
/// Current-sense chain scale, volts per ampere.
const SENSE_V_PER_A: f32 = 2.0;

/// Wiring polarity of a channel's gradient axis.
///
/// Some axes are wired with the coil sense reversed; that is a per-channel
/// configuration here, not a sign flip buried in the conversion math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    #[default]
    Normal,
    Inverted,
}

impl Polarity {
    fn apply(self, amps: f32) -> f32 {
        match self {
            Polarity::Normal => amps,
            Polarity::Inverted => -amps,
        }
    }
}

/// A DAC code plus a flag noting that the requested value fell outside the
/// representable range and was saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DacCode {
    pub code: u16,
    pub clamped: bool,
}

fn quantize(raw: f32) -> DacCode {
    if raw > DAC_FULL_SCALE {
        DacCode { code: u16::MAX, clamped: true }
    } else if raw >= 0.0 {
        DacCode { code: raw as u16, clamped: false }
    } else {
        // Negative and NaN drive requests saturate low.
        DacCode { code: 0, clamped: true }
    }
}

/// Per-channel calibration parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCal {
    /// Amperes of output per volt of drive, measured by the gain probe.
    pub gain: f32,
    /// Drive-voltage correction that nulls the output at zero current.
    pub zero_offset_v: f32,
    /// Set once calibration has converged; cleared on any failure.
    pub valid: bool,
    pub polarity: Polarity,
}

impl Default for ChannelCal {
    fn default() -> Self {
        Self {
            gain: NOMINAL_GAIN_A_PER_V,
            zero_offset_v: 0.0,
            valid: false,
            polarity: Polarity::Normal,
        }
    }
}

impl ChannelCal {
    /// Code that drives a given output voltage, corrected by the zero offset.
    pub fn code_from_voltage(&self, volts: f32) -> DacCode {
        quantize(DAC_FULL_SCALE * (volts - self.zero_offset_v) / DAC_SPAN_V)
    }

    /// Code that drives a given output current through the calibrated gain.
    ///
    /// Any 4-byte wire pattern decodes to an f32, so the target may be
    /// non-finite; those fall back to the zero-current code, flagged.
    pub fn code_from_current(&self, amps: f32) -> DacCode {
        if !amps.is_finite() {
            return DacCode {
                code: self.zero_code().code,
                clamped: true,
            };
        }
        let amps = self.polarity.apply(amps);
        quantize(DAC_FULL_SCALE * (amps / self.gain + DAC_MIDSCALE_V - self.zero_offset_v) / DAC_SPAN_V)
    }

    /// Code for zero output current.
    pub fn zero_code(&self) -> DacCode {
        self.code_from_current(0.0)
    }
}

/// Code for a raw drive voltage, bypassing calibration. Used by the gain
/// probe, which must drive known absolute voltages.
pub fn raw_voltage_code(volts: f32) -> DacCode {
    quantize(DAC_FULL_SCALE * volts / DAC_SPAN_V)
}

/// Feedback ADC code to volts.
pub fn voltage_from_code(code: u16) -> f32 {
    code as f32 * ADC_LSB_V
}

/// Feedback ADC code to amperes through the sense chain.
pub fn current_from_code(code: u16) -> f32 {
    (voltage_from_code(code) - SENSE_OFFSET_V) / SENSE_V_PER_A
}

/// Inverse of [`current_from_code`]; what the ADC would read for a given
/// output current. Used by the simulated bus.
pub fn adc_code_from_current(amps: f32) -> u16 {
    let raw = (amps * SENSE_V_PER_A + SENSE_OFFSET_V) / ADC_LSB_V;
    raw.round().clamp(0.0, u16::MAX as f32) as u16
}

/// DAC code to the voltage the output stage is driven with. Used by the
/// simulated bus.
pub fn dac_output_voltage(code: u16) -> f32 {
    code as f32 / DAC_FULL_SCALE * DAC_SPAN_V
}

/// Calibration table for every populated channel, board-major.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelBank {
    cals: [[ChannelCal; CHANNELS_PER_BOARD]; NUM_BOARDS],
}

impl ChannelBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, board: usize, channel: usize) -> &ChannelCal {
        &self.cals[board][channel]
    }

    pub fn get_mut(&mut self, board: usize, channel: usize) -> &mut ChannelCal {
        &mut self.cals[board][channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_current_is_midscale_on_default_channel() {
        let cal = ChannelCal::default();
        let code = cal.code_from_current(0.0);
        assert_eq!(code.code, 32767);
        assert!(!code.clamped);
    }

    #[test]
    fn out_of_range_current_clamps_and_flags() {
        let cal = ChannelCal::default();
        // 10 A through a -1.62 A/V channel wants a drive voltage below 0 V.
        let low = cal.code_from_current(10.0);
        assert_eq!(low.code, 0);
        assert!(low.clamped);
        let high = cal.code_from_current(-10.0);
        assert_eq!(high.code, u16::MAX);
        assert!(high.clamped);
    }

    #[test]
    fn non_finite_current_falls_back_to_zero_code() {
        let cal = ChannelCal::default();
        for amps in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let code = cal.code_from_current(amps);
            assert_eq!(code.code, cal.zero_code().code, "{amps}");
            assert!(code.clamped, "{amps}");
        }
        // NaN reaching the quantizer directly saturates low, flagged.
        let raw = raw_voltage_code(f32::NAN);
        assert_eq!(raw.code, 0);
        assert!(raw.clamped);
    }

    #[test]
    fn zero_offset_shifts_the_code() {
        let mut cal = ChannelCal::default();
        cal.zero_offset_v = 0.1;
        let shifted = cal.code_from_current(0.0).code;
        let neutral = ChannelCal::default().code_from_current(0.0).code;
        assert!(shifted < neutral);
        // 0.1 V over a 5 V span is 1310.7 counts.
        assert_eq!(neutral - shifted, 1311);
    }

    #[test]
    fn inverted_polarity_mirrors_the_current() {
        let normal = ChannelCal::default();
        let inverted = ChannelCal {
            polarity: Polarity::Inverted,
            ..ChannelCal::default()
        };
        assert_eq!(
            inverted.code_from_current(0.75),
            normal.code_from_current(-0.75)
        );
    }

    #[test]
    fn adc_transfer_round_trips() {
        for amps in [-0.4, -0.05, 0.0, 0.25, 0.6] {
            let back = current_from_code(adc_code_from_current(amps));
            assert!((back - amps).abs() < 0.0005, "{amps} -> {back}");
        }
    }

    #[test]
    fn sense_chain_zero_point() {
        // 1.25 V at the ADC is zero current.
        let code = adc_code_from_current(0.0);
        assert_eq!(code, 1250);
        assert!(current_from_code(code).abs() < 1e-5);
    }

    #[test]
    fn raw_voltage_code_ignores_calibration() {
        assert_eq!(raw_voltage_code(0.0).code, 0);
        assert_eq!(raw_voltage_code(2.0).code, 26214);
        assert_eq!(raw_voltage_code(5.0).code, 65535);
        assert!(raw_voltage_code(5.1).clamped);
    }
}
