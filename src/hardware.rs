//! Hardware seam: the analog bus trait and a simulated implementation.
//!
//! The real stack is a board-select mux in front of per-board octal DACs with
//! a multiplexed feedback ADC. Everything above it is written against
//! [`AnalogBus`] so the whole controller runs, and is tested, without
//! hardware.

use std::time::Duration;

use crate::convert::{adc_code_from_current, dac_output_voltage, DAC_MIDSCALE_V, NOMINAL_GAIN_A_PER_V};

/// Number of driver boards behind the board-select mux.
pub const NUM_BOARDS: usize = 4;
/// DAC channels per board.
pub const CHANNELS_PER_BOARD: usize = 8;
/// Total addressable channels.
pub const MAX_CHANNELS: usize = NUM_BOARDS * CHANNELS_PER_BOARD;

/// Low-level analog front end.
///
/// `write_dac` and `read_adc` address channels on the currently selected
/// board. Settling delays belong to the bus so a simulated bus is instant.
pub trait AnalogBus {
    /// Route the DAC/ADC bus to one board.
    fn select_board(&mut self, board: usize);
    /// Write-and-update one DAC channel on the selected board.
    fn write_dac(&mut self, channel: usize, code: u16);
    /// Read the feedback ADC for one channel on the selected board.
    fn read_adc(&mut self, channel: usize) -> u16;
    /// Drive the sync output pin.
    fn set_sync(&mut self, high: bool);
    /// Wait for analog settling.
    fn settle(&mut self, time: Duration);
}

/// Analog model of one simulated channel.
///
/// The output stage is `I = gain * (V_dac - 2.5 - input_offset)`; a channel
/// with `responsive` cleared returns a flat feedback reading no matter what
/// is driven, like a disconnected coil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimChannel {
    pub true_gain: f32,
    pub input_offset_v: f32,
    pub responsive: bool,
}

impl Default for SimChannel {
    fn default() -> Self {
        Self {
            true_gain: NOMINAL_GAIN_A_PER_V,
            input_offset_v: 0.0,
            responsive: true,
        }
    }
}

/// In-memory stand-in for the full driver stack.
///
/// Used by the test suite and by the CLI when no hardware is attached.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    selected: usize,
    channels: [[SimChannel; CHANNELS_PER_BOARD]; NUM_BOARDS],
    dac_codes: [[u16; CHANNELS_PER_BOARD]; NUM_BOARDS],
    sync: bool,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self {
            selected: 0,
            channels: [[SimChannel::default(); CHANNELS_PER_BOARD]; NUM_BOARDS],
            dac_codes: [[0; CHANNELS_PER_BOARD]; NUM_BOARDS],
            sync: false,
        }
    }

    pub fn channel_mut(&mut self, board: usize, channel: usize) -> &mut SimChannel {
        &mut self.channels[board][channel]
    }

    /// Last code written to a DAC channel.
    pub fn dac_code(&self, board: usize, channel: usize) -> u16 {
        self.dac_codes[board][channel]
    }

    pub fn sync_high(&self) -> bool {
        self.sync
    }

    /// Physical output current implied by the last DAC write.
    pub fn output_current(&self, board: usize, channel: usize) -> f32 {
        let ch = &self.channels[board][channel];
        let drive_v = dac_output_voltage(self.dac_codes[board][channel]);
        ch.true_gain * (drive_v - DAC_MIDSCALE_V - ch.input_offset_v)
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalogBus for SimulatedBus {
    fn select_board(&mut self, board: usize) {
        debug_assert!(board < NUM_BOARDS);
        self.selected = board;
    }

    fn write_dac(&mut self, channel: usize, code: u16) {
        self.dac_codes[self.selected][channel] = code;
    }

    fn read_adc(&mut self, channel: usize) -> u16 {
        let ch = &self.channels[self.selected][channel];
        if !ch.responsive {
            // Dead feedback path reads a constant mid-rail value.
            return adc_code_from_current(0.0);
        }
        adc_code_from_current(self.output_current(self.selected, channel))
    }

    fn set_sync(&mut self, high: bool) {
        self.sync = high;
    }

    fn settle(&mut self, _time: Duration) {
        // Simulation settles instantly.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::current_from_code;

    #[test]
    fn simulated_channel_tracks_drive_voltage() {
        let mut bus = SimulatedBus::new();
        bus.select_board(1);
        // Mid-scale drive on an ideal channel is zero current.
        bus.write_dac(3, 32767);
        let amps = current_from_code(bus.read_adc(3));
        assert!(amps.abs() < 0.001, "expected ~0 A, got {amps}");
    }

    #[test]
    fn unresponsive_channel_reads_flat() {
        let mut bus = SimulatedBus::new();
        bus.channel_mut(0, 0).responsive = false;
        bus.select_board(0);
        bus.write_dac(0, 10_000);
        let low = bus.read_adc(0);
        bus.write_dac(0, 50_000);
        let high = bus.read_adc(0);
        assert_eq!(low, high);
    }

    #[test]
    fn writes_land_on_selected_board_only() {
        let mut bus = SimulatedBus::new();
        bus.select_board(2);
        bus.write_dac(5, 1234);
        assert_eq!(bus.dac_code(2, 5), 1234);
        assert_eq!(bus.dac_code(0, 5), 0);
        assert_eq!(bus.dac_code(3, 5), 0);
    }
}
