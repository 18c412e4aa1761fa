//! Playback engine: one trigger event, one schedule step.
//!
//! Each step resolves the trigger counter against the active schedule,
//! writes every configured channel in board-major order (switching the board
//! select only when the board actually changes), optionally raises the sync
//! output, and advances the counter. Manual single-stepping goes through the
//! same path and the same counter as triggered playback.

use std::time::{Duration, Instant};

use crate::convert::ChannelBank;
use crate::hardware::{AnalogBus, CHANNELS_PER_BOARD};
use crate::schedule::Schedule;
use crate::store::CoefficientStore;

/// Hold time of the sync pulse after a step begins.
pub const SYNC_PULSE_WIDTH: Duration = Duration::from_millis(1);

/// The configuration playback runs against: a compiled schedule and the
/// coefficient table loaded for it. Swapped in whole on reconfiguration so a
/// step never sees half of each.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConfig {
    pub schedule: Schedule,
    pub store: CoefficientStore,
}

/// What one step resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    pub block: usize,
    pub table_row: u32,
    /// Channels whose converted code saturated this step.
    pub clamped: u32,
}

/// Trigger counter and sync-pulse state.
#[derive(Debug)]
pub struct Playback {
    counter: u32,
    sync_enabled: bool,
    sync_deadline: Option<Instant>,
}

impl Playback {
    pub fn new() -> Self {
        Self {
            counter: 0,
            sync_enabled: false,
            sync_deadline: None,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    pub fn set_sync_enabled(&mut self, enabled: bool) {
        self.sync_enabled = enabled;
    }

    /// Perform one playback step.
    pub fn step(
        &mut self,
        config: &ActiveConfig,
        bank: &ChannelBank,
        bus: &mut impl AnalogBus,
    ) -> StepInfo {
        if self.counter >= config.schedule.period() {
            self.counter = 0;
        }
        let (block, table_row) = config.schedule.resolve(self.counter);

        let mut selected = None;
        let mut clamped = 0;
        for index in 0..config.store.channels() {
            let board = index / CHANNELS_PER_BOARD;
            let channel = index % CHANNELS_PER_BOARD;
            if selected != Some(board) {
                bus.select_board(board);
                selected = Some(board);
            }
            let amps = config.store.get(table_row, index);
            let code = bank.get(board, channel).code_from_current(amps);
            if code.clamped {
                clamped += 1;
            }
            bus.write_dac(channel, code.code);
        }

        if self.sync_enabled {
            bus.set_sync(true);
            self.sync_deadline = Some(Instant::now() + SYNC_PULSE_WIDTH);
        }

        self.counter += 1;
        StepInfo {
            block,
            table_row,
            clamped,
        }
    }

    /// Drop the sync output once its hold time has elapsed. Called from the
    /// polling loop; never blocks.
    pub fn poll_sync(&mut self, bus: &mut impl AnalogBus) {
        if let Some(deadline) = self.sync_deadline {
            if Instant::now() >= deadline {
                bus.set_sync(false);
                self.sync_deadline = None;
            }
        }
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}
