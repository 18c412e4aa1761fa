//! Per-channel closed-loop calibration against the analog feedback path.
//!
//! Each channel goes through two phases. The gain probe drives two known
//! voltages half a volt apart and takes the slope of the read-back current.
//! Zero convergence then iterates the zero-offset estimate until the channel
//! outputs no measurable current at its zero-current code. Failure in either
//! phase leaves the channel invalid and driven to its neutral code, and does
//! not touch any other channel.

use std::time::Duration;

use crate::convert::{current_from_code, raw_voltage_code, ChannelBank, ChannelCal, NOMINAL_GAIN_A_PER_V};
use crate::error::CalibrationError;
use crate::hardware::{AnalogBus, CHANNELS_PER_BOARD, NUM_BOARDS};

/// Lower gain-probe point, volts.
pub const GAIN_PROBE_LOW_V: f32 = 2.0;
/// Upper gain-probe point, volts.
pub const GAIN_PROBE_HIGH_V: f32 = 2.5;
/// Accepted deviation from the nominal gain.
pub const GAIN_TOLERANCE: f32 = 0.5;
/// Residual current below which the zero offset has converged.
pub const ZERO_TOLERANCE_A: f32 = 0.001;
/// Iteration bound for zero convergence.
pub const ZERO_MAX_ITERATIONS: usize = 10;

const PROBE_SETTLE: Duration = Duration::from_millis(1);
// Long enough for the slower amplifier rise times seen on real boards.
const ZERO_SETTLE: Duration = Duration::from_millis(25);
const BOARD_SELECT_SETTLE: Duration = Duration::from_millis(1);
/// Pause between boards in a batch run, letting supply transients die out.
const BOARD_BATCH_SETTLE: Duration = Duration::from_millis(500);

/// Two-point gain probe on one channel of the selected board.
pub fn measure_gain(bus: &mut impl AnalogBus, channel: usize) -> f32 {
    bus.write_dac(channel, raw_voltage_code(GAIN_PROBE_LOW_V).code);
    bus.settle(PROBE_SETTLE);
    let low_a = current_from_code(bus.read_adc(channel));

    bus.write_dac(channel, raw_voltage_code(GAIN_PROBE_HIGH_V).code);
    bus.settle(PROBE_SETTLE);
    let high_a = current_from_code(bus.read_adc(channel));

    (high_a - low_a) / (GAIN_PROBE_HIGH_V - GAIN_PROBE_LOW_V)
}

/// Calibrate one channel, updating its entry in place.
///
/// On failure the entry is reset to defaults (polarity kept), flagged
/// invalid, and the channel is driven to its zero-current code.
pub fn calibrate_channel(
    bus: &mut impl AnalogBus,
    board: usize,
    channel: usize,
    cal: &mut ChannelCal,
) -> Result<(), CalibrationError> {
    bus.select_board(board);
    bus.settle(BOARD_SELECT_SETTLE);

    *cal = ChannelCal {
        polarity: cal.polarity,
        ..ChannelCal::default()
    };

    let gain = measure_gain(bus, channel);
    if (gain - NOMINAL_GAIN_A_PER_V).abs() > GAIN_TOLERANCE {
        bus.write_dac(channel, cal.zero_code().code);
        return Err(CalibrationError::GainOutOfTolerance { measured: gain });
    }
    cal.gain = gain;

    let mut residual = 0.0;
    for _ in 0..ZERO_MAX_ITERATIONS {
        bus.write_dac(channel, cal.zero_code().code);
        bus.settle(ZERO_SETTLE);
        residual = current_from_code(bus.read_adc(channel));
        if residual.abs() <= ZERO_TOLERANCE_A {
            cal.valid = true;
            return Ok(());
        }
        cal.zero_offset_v += residual / cal.gain;
    }

    cal.zero_offset_v = 0.0;
    cal.valid = false;
    bus.write_dac(channel, cal.zero_code().code);
    Err(CalibrationError::NoConvergence { residual })
}

/// Outcome of one channel in a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalReport {
    pub board: usize,
    pub channel: usize,
    pub result: Result<(), CalibrationError>,
}

/// Calibrate every channel on every board in order.
///
/// Failures are collected, not propagated; one bad channel never stops the
/// batch.
pub fn calibrate_all(bus: &mut impl AnalogBus, bank: &mut ChannelBank) -> Vec<CalReport> {
    let mut reports = Vec::with_capacity(NUM_BOARDS * CHANNELS_PER_BOARD);
    for board in 0..NUM_BOARDS {
        for channel in 0..CHANNELS_PER_BOARD {
            let result = calibrate_channel(bus, board, channel, bank.get_mut(board, channel));
            reports.push(CalReport {
                board,
                channel,
                result,
            });
        }
        bus.settle(BOARD_BATCH_SETTLE);
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedBus;

    #[test]
    fn nominal_channel_converges() {
        let mut bus = SimulatedBus::new();
        bus.channel_mut(0, 0).input_offset_v = 0.05;
        let mut cal = ChannelCal::default();

        calibrate_channel(&mut bus, 0, 0, &mut cal).unwrap();

        assert!(cal.valid);
        assert!((cal.gain - NOMINAL_GAIN_A_PER_V).abs() < 0.02, "gain {}", cal.gain);
        // The offset estimate nulls the simulated input offset.
        assert!((cal.zero_offset_v + 0.05).abs() < 0.005, "offset {}", cal.zero_offset_v);
        // The channel sits at zero output current afterwards.
        assert!(bus.output_current(0, 0).abs() <= ZERO_TOLERANCE_A);
    }

    #[test]
    fn measured_gain_matches_true_gain() {
        let mut bus = SimulatedBus::new();
        bus.channel_mut(1, 2).true_gain = -1.9;
        bus.select_board(1);
        let gain = measure_gain(&mut bus, 2);
        assert!((gain + 1.9).abs() < 0.02, "gain {gain}");
    }

    #[test]
    fn flat_feedback_fails_the_gain_probe() {
        let mut bus = SimulatedBus::new();
        bus.channel_mut(0, 3).responsive = false;
        let mut cal = ChannelCal::default();

        let err = calibrate_channel(&mut bus, 0, 3, &mut cal).unwrap_err();
        match err {
            CalibrationError::GainOutOfTolerance { measured } => {
                assert!(measured.abs() < 0.01, "flat channel measured {measured}");
            }
            other => panic!("expected gain failure, got {other:?}"),
        }
        assert!(!cal.valid);
        assert_eq!(cal.gain, NOMINAL_GAIN_A_PER_V);
        assert_eq!(cal.zero_offset_v, 0.0);
    }

    #[test]
    fn gain_outside_tolerance_fails() {
        let mut bus = SimulatedBus::new();
        bus.channel_mut(2, 0).true_gain = -0.8;
        let mut cal = ChannelCal::default();

        let err = calibrate_channel(&mut bus, 2, 0, &mut cal).unwrap_err();
        assert!(matches!(err, CalibrationError::GainOutOfTolerance { .. }));
        assert!(!cal.valid);
    }

    #[test]
    fn offset_beyond_dac_range_fails_to_converge() {
        let mut bus = SimulatedBus::new();
        // Nulling this offset needs a drive voltage above the DAC span, so
        // the zero loop saturates and never converges.
        bus.channel_mut(0, 0).input_offset_v = 2.6;
        let mut cal = ChannelCal::default();

        let err = calibrate_channel(&mut bus, 0, 0, &mut cal).unwrap_err();
        assert!(matches!(err, CalibrationError::NoConvergence { .. }));
        assert!(!cal.valid);
        assert_eq!(cal.zero_offset_v, 0.0);
    }

    #[test]
    fn calibrating_one_channel_leaves_others_alone() {
        let mut bus = SimulatedBus::new();
        bus.select_board(0);
        bus.write_dac(1, 40_000);
        bus.select_board(1);
        bus.write_dac(0, 20_000);

        let mut cal = ChannelCal::default();
        calibrate_channel(&mut bus, 0, 0, &mut cal).unwrap();

        assert_eq!(bus.dac_code(0, 1), 40_000);
        assert_eq!(bus.dac_code(1, 0), 20_000);
    }

    #[test]
    fn batch_run_covers_every_channel_and_keeps_going() {
        let mut bus = SimulatedBus::new();
        bus.channel_mut(1, 4).responsive = false;
        let mut bank = ChannelBank::new();

        let reports = calibrate_all(&mut bus, &mut bank);

        assert_eq!(reports.len(), NUM_BOARDS * CHANNELS_PER_BOARD);
        let failed: Vec<_> = reports.iter().filter(|r| r.result.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!((failed[0].board, failed[0].channel), (1, 4));
        assert!(!bank.get(1, 4).valid);
        assert!(bank.get(0, 0).valid);
        assert!(bank.get(3, 7).valid);
    }
}
