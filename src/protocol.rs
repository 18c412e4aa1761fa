//! Configuration protocol state machine and interactive command dispatch.
//!
//! Inbound bytes arrive one at a time from the link. In `Accept` each byte is
//! a command; the `d` start byte opens a configuration download, whose header
//! is parsed on its terminator and whose binary body is counted to the exact
//! declared length. A finished download is committed as a whole: schedule and
//! coefficient table are staged off to the side and swapped in only when the
//! last byte lands, so playback never observes a partial configuration.

use std::time::{Duration, Instant};

use crate::calibration::{calibrate_all, calibrate_channel};
use crate::convert::{current_from_code, raw_voltage_code, ChannelBank};
use crate::error::{ConfigError, LoadError};
use crate::hardware::{AnalogBus, CHANNELS_PER_BOARD, MAX_CHANNELS, NUM_BOARDS};
use crate::playback::{ActiveConfig, Playback};
use crate::schedule::{ConfigHeader, Schedule};
use crate::store::CoefficientStore;

/// Drive every channel to its zero-current code.
pub const CMD_ZERO_ALL: u8 = b'z';
/// Calibrate every channel on every board.
pub const CMD_CALIBRATE_ALL: u8 = b'c';
/// Calibrate one channel; followed by `<board> <channel>\n`.
pub const CMD_CALIBRATE_ONE: u8 = b'o';
/// Perform one playback step without a trigger.
pub const CMD_SINGLE_STEP: u8 = b's';
/// Read back every configured channel in playback order.
pub const CMD_READ_CHANNELS: u8 = b'p';
/// Read back every channel of every board.
pub const CMD_READ_BOARDS: u8 = b'b';
/// Drive all channels to the fixed test voltage.
pub const CMD_TEST_OUTPUT: u8 = b't';
/// Rewind to the start of the schedule and drive the first row.
pub const CMD_RESET_AND_ARM: u8 = b'r';
/// Set one channel manually; followed by `<board> <channel> <amps>\n`.
pub const CMD_MANUAL_SET: u8 = b'm';
/// Start byte of a configuration download.
pub const CMD_LOAD_CONFIG: u8 = b'd';

/// Raw drive voltage used by the test-output command.
pub const TEST_OUTPUT_V: f32 = 3.0;
/// Default bound on an in-progress download, header and body alike; a host
/// that stalls longer than this aborts it.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest accepted header; the widest legal record is well under this.
pub const MAX_HEADER_LEN: usize = 256;

enum State {
    Accept,
    /// Accumulating the ASCII header until its terminator.
    Header { buf: String, deadline: Instant },
    /// Counting body bytes into the staging buffer.
    Body {
        header: ConfigHeader,
        schedule: Schedule,
        buf: Vec<u8>,
        deadline: Instant,
    },
    /// Accumulating `<board> <channel>` for calibrate-one.
    CalibrateOne { buf: String },
    /// Accumulating `<board> <channel> <amps>` for manual set.
    ManualSet { buf: String },
}

/// The device controller: owns the bus, the calibration table, the active
/// configuration and all protocol state. Single-threaded; `process_byte`,
/// `on_trigger` and `poll` are all called from one loop.
pub struct Controller<B: AnalogBus> {
    bus: B,
    bank: ChannelBank,
    playback: Playback,
    active: Option<ActiveConfig>,
    state: State,
    load_timeout: Duration,
}

impl<B: AnalogBus> Controller<B> {
    pub fn new(bus: B) -> Self {
        Self::with_load_timeout(bus, DEFAULT_LOAD_TIMEOUT)
    }

    pub fn with_load_timeout(bus: B, load_timeout: Duration) -> Self {
        Self {
            bus,
            bank: ChannelBank::new(),
            playback: Playback::new(),
            active: None,
            state: State::Accept,
            load_timeout,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn bank(&self) -> &ChannelBank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut ChannelBank {
        &mut self.bank
    }

    pub fn active(&self) -> Option<&ActiveConfig> {
        self.active.as_ref()
    }

    pub fn counter(&self) -> u32 {
        self.playback.counter()
    }

    pub fn set_sync_enabled(&mut self, enabled: bool) {
        self.playback.set_sync_enabled(enabled);
    }

    /// External trigger edge: one playback step against the active
    /// configuration, silently ignored when nothing is loaded.
    pub fn on_trigger(&mut self) {
        if let Some(config) = &self.active {
            self.playback.step(config, &self.bank, &mut self.bus);
        }
    }

    /// Housekeeping between bytes: drops an elapsed sync pulse and aborts a
    /// stalled download, whether it stalled in the header or the body.
    pub fn poll(&mut self) -> Option<String> {
        self.playback.poll_sync(&mut self.bus);
        let deadline = match &self.state {
            State::Header { deadline, .. } | State::Body { deadline, .. } => Some(*deadline),
            _ => None,
        };
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                self.state = State::Accept;
                let err = LoadError::Timeout(self.load_timeout);
                return Some(format!("configuration rejected: {err}"));
            }
        }
        None
    }

    /// Feed one inbound byte through the state machine. Returns a response
    /// line when the byte completed a command.
    pub fn process_byte(&mut self, byte: u8) -> Option<String> {
        let state = std::mem::replace(&mut self.state, State::Accept);
        let (next, response) = match state {
            State::Accept => self.accept_byte(byte),
            State::Header { mut buf, deadline } => {
                // NUL per the wire framing; newline accepted for hand-typed
                // headers.
                if byte == b'\0' || byte == b'\n' {
                    self.finish_header(buf.trim_end_matches('\r'))
                } else if buf.len() >= MAX_HEADER_LEN {
                    let err = ConfigError::HeaderTooLong(MAX_HEADER_LEN);
                    (State::Accept, Some(format!("configuration rejected: {err}")))
                } else {
                    buf.push(byte as char);
                    (State::Header { buf, deadline }, None)
                }
            }
            State::Body {
                header,
                schedule,
                mut buf,
                deadline,
            } => {
                buf.push(byte);
                if buf.len() == header.body_len() {
                    let store = CoefficientStore::from_le_bytes(header.channels as usize, &buf);
                    self.active = Some(ActiveConfig { schedule, store });
                    self.playback.reset();
                    let response = format!(
                        "configuration loaded: {} rows x {} channels",
                        header.total_rows(),
                        header.channels
                    );
                    (State::Accept, Some(response))
                } else {
                    (
                        State::Body {
                            header,
                            schedule,
                            buf,
                            deadline,
                        },
                        None,
                    )
                }
            }
            State::CalibrateOne { mut buf } => {
                if byte == b'\n' || byte == b'\r' {
                    let response = self.finish_calibrate_one(&buf);
                    (State::Accept, Some(response))
                } else {
                    buf.push(byte as char);
                    (State::CalibrateOne { buf }, None)
                }
            }
            State::ManualSet { mut buf } => {
                if byte == b'\n' || byte == b'\r' {
                    let response = self.finish_manual_set(&buf);
                    (State::Accept, Some(response))
                } else {
                    buf.push(byte as char);
                    (State::ManualSet { buf }, None)
                }
            }
        };
        self.state = next;
        response
    }

    fn accept_byte(&mut self, byte: u8) -> (State, Option<String>) {
        match byte {
            CMD_LOAD_CONFIG => (
                State::Header {
                    buf: String::new(),
                    deadline: Instant::now() + self.load_timeout,
                },
                None,
            ),
            CMD_MANUAL_SET => (State::ManualSet { buf: String::new() }, None),
            CMD_CALIBRATE_ONE => (State::CalibrateOne { buf: String::new() }, None),
            CMD_ZERO_ALL => {
                self.zero_all();
                (State::Accept, Some("all channels zeroed".to_owned()))
            }
            CMD_CALIBRATE_ALL => {
                let report = self.run_calibrate_all();
                (State::Accept, Some(report))
            }
            CMD_SINGLE_STEP => {
                let response = self.single_step();
                (State::Accept, Some(response))
            }
            CMD_RESET_AND_ARM => {
                let response = self.reset_and_arm();
                (State::Accept, Some(response))
            }
            CMD_READ_CHANNELS => {
                let report = self.read_channels();
                (State::Accept, Some(report))
            }
            CMD_READ_BOARDS => {
                let report = self.read_boards();
                (State::Accept, Some(report))
            }
            CMD_TEST_OUTPUT => {
                self.set_test_output();
                (
                    State::Accept,
                    Some(format!("all channels driven to {TEST_OUTPUT_V} V")),
                )
            }
            // Line noise between commands.
            b'\r' | b'\n' | b' ' | b'\t' => (State::Accept, None),
            other => (
                State::Accept,
                Some(format!("unknown command '{}'", other as char)),
            ),
        }
    }

    fn finish_header(&mut self, text: &str) -> (State, Option<String>) {
        let header = match ConfigHeader::parse(text) {
            Ok(header) => header,
            Err(err) => return (State::Accept, Some(format!("configuration rejected: {err}"))),
        };
        let schedule = match Schedule::compile(&header) {
            Ok(schedule) => schedule,
            Err(err) => return (State::Accept, Some(format!("configuration rejected: {err}"))),
        };
        let expected = header.body_len();
        let response = format!(
            "header ok: {} channels, {} blocks, awaiting {} bytes",
            header.channels,
            header.blocks.len(),
            expected
        );
        (
            State::Body {
                buf: Vec::with_capacity(expected),
                deadline: Instant::now() + self.load_timeout,
                header,
                schedule,
            },
            Some(response),
        )
    }

    fn finish_calibrate_one(&mut self, text: &str) -> String {
        let (board, channel) = match parse_board_channel(text) {
            Ok(pair) => pair,
            Err(msg) => return msg,
        };
        match calibrate_channel(
            &mut self.bus,
            board,
            channel,
            self.bank.get_mut(board, channel),
        ) {
            Ok(()) => {
                let cal = self.bank.get(board, channel);
                format!(
                    "({board},{channel}) calibrated: gain {:.3} A/V, zero offset {:.4} V",
                    cal.gain, cal.zero_offset_v
                )
            }
            Err(err) => format!("({board},{channel}) failed: {err}"),
        }
    }

    fn finish_manual_set(&mut self, text: &str) -> String {
        let mut tokens = text.split_whitespace();
        let (board, channel) = match parse_board_channel_tokens(&mut tokens) {
            Ok(pair) => pair,
            Err(msg) => return msg,
        };
        let amps: f32 = match tokens.next().map(str::parse) {
            Some(Ok(value)) => value,
            _ => return "expected: <board> <channel> <amps>".to_owned(),
        };
        if tokens.next().is_some() {
            return "expected: <board> <channel> <amps>".to_owned();
        }

        let code = self.bank.get(board, channel).code_from_current(amps);
        self.bus.select_board(board);
        self.bus.write_dac(channel, code.code);
        if code.clamped {
            format!("({board},{channel}) set to {amps} A, code {} (clamped)", code.code)
        } else {
            format!("({board},{channel}) set to {amps} A, code {}", code.code)
        }
    }

    fn zero_all(&mut self) {
        for board in 0..NUM_BOARDS {
            self.bus.select_board(board);
            for channel in 0..CHANNELS_PER_BOARD {
                let code = self.bank.get(board, channel).zero_code();
                self.bus.write_dac(channel, code.code);
            }
        }
    }

    fn set_test_output(&mut self) {
        let code = raw_voltage_code(TEST_OUTPUT_V);
        for board in 0..NUM_BOARDS {
            self.bus.select_board(board);
            for channel in 0..CHANNELS_PER_BOARD {
                self.bus.write_dac(channel, code.code);
            }
        }
    }

    fn run_calibrate_all(&mut self) -> String {
        let reports = calibrate_all(&mut self.bus, &mut self.bank);
        let mut out = String::new();
        let mut failed = 0;
        for report in &reports {
            if let Err(err) = &report.result {
                failed += 1;
                out.push_str(&format!("({},{}) failed: {err}\n", report.board, report.channel));
            }
        }
        out.push_str(&format!(
            "calibration complete, {}/{} channels ok",
            reports.len() - failed,
            reports.len()
        ));
        out
    }

    fn single_step(&mut self) -> String {
        match &self.active {
            Some(config) => {
                let info = self.playback.step(config, &self.bank, &mut self.bus);
                format!(
                    "step: block {}, row {}, counter {}",
                    info.block,
                    info.table_row,
                    self.playback.counter()
                )
            }
            None => "no configuration loaded".to_owned(),
        }
    }

    fn reset_and_arm(&mut self) -> String {
        match &self.active {
            Some(config) => {
                self.playback.reset();
                let info = self.playback.step(config, &self.bank, &mut self.bus);
                format!("reset: block {}, row {} driven", info.block, info.table_row)
            }
            None => "no configuration loaded".to_owned(),
        }
    }

    /// Readback of the configured channels in playback order.
    fn read_channels(&mut self) -> String {
        let count = self
            .active
            .as_ref()
            .map(|c| c.store.channels())
            .unwrap_or(MAX_CHANNELS);
        let mut out = String::from("-------------\n");
        let mut selected = None;
        for index in 0..count {
            let board = index / CHANNELS_PER_BOARD;
            let channel = index % CHANNELS_PER_BOARD;
            if selected != Some(board) {
                self.bus.select_board(board);
                selected = Some(board);
            }
            let amps = current_from_code(self.bus.read_adc(channel));
            let cal = self.bank.get(board, channel);
            out.push_str(&format!(
                "{index} ({board},{channel})\t{amps:.4}\t{:.2}{}\n",
                cal.gain,
                if cal.valid { "" } else { " X" }
            ));
        }
        out
    }

    /// Readback of every channel on every board.
    fn read_boards(&mut self) -> String {
        let mut out = String::new();
        for board in 0..NUM_BOARDS {
            self.bus.select_board(board);
            out.push_str("---------------\n");
            out.push_str(&format!("B: {board}\n"));
            for channel in 0..CHANNELS_PER_BOARD {
                let amps = current_from_code(self.bus.read_adc(channel));
                let cal = self.bank.get(board, channel);
                out.push_str(&format!(
                    "{channel}: {amps:.4}\t{:.2}{}\n",
                    cal.gain,
                    if cal.valid { "" } else { " X" }
                ));
            }
        }
        out
    }
}

fn parse_board_channel(text: &str) -> Result<(usize, usize), String> {
    let mut tokens = text.split_whitespace();
    let pair = parse_board_channel_tokens(&mut tokens)?;
    if tokens.next().is_some() {
        return Err("expected: <board> <channel>".to_owned());
    }
    Ok(pair)
}

fn parse_board_channel_tokens<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<(usize, usize), String> {
    let board: usize = match tokens.next().map(str::parse) {
        Some(Ok(value)) => value,
        _ => return Err("expected: <board> <channel> ...".to_owned()),
    };
    let channel: usize = match tokens.next().map(str::parse) {
        Some(Ok(value)) => value,
        _ => return Err("expected: <board> <channel> ...".to_owned()),
    };
    if board >= NUM_BOARDS {
        return Err(format!("board {board} out of range"));
    }
    if channel >= CHANNELS_PER_BOARD {
        return Err(format!("channel {channel} out of range"));
    }
    Ok((board, channel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ChannelCal;
    use crate::hardware::SimulatedBus;

    fn feed(ctl: &mut Controller<SimulatedBus>, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|&b| ctl.process_byte(b)).collect()
    }

    fn body(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Download the standard two-channel test configuration.
    fn load_test_config(ctl: &mut Controller<SimulatedBus>) {
        feed(ctl, b"d");
        let responses = feed(ctl, b"c2|b1|l2|r3|\0");
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with("header ok"), "{}", responses[0]);
        let responses = feed(ctl, &body(&[1.0, -1.0, 0.5, -0.5]));
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with("configuration loaded"), "{}", responses[0]);
    }

    fn expected_code(amps: f32) -> u16 {
        ChannelCal::default().code_from_current(amps).code
    }

    #[test]
    fn full_download_then_triggered_playback() {
        let mut ctl = Controller::new(SimulatedBus::new());
        load_test_config(&mut ctl);

        // Five triggers walk rows 0,1,0,1,0; check the final one.
        for _ in 0..5 {
            ctl.on_trigger();
        }
        assert_eq!(ctl.counter(), 5);
        assert_eq!(ctl.bus().dac_code(0, 0), expected_code(1.0));
        assert_eq!(ctl.bus().dac_code(0, 1), expected_code(-1.0));
    }

    #[test]
    fn malformed_header_keeps_previous_configuration() {
        let mut ctl = Controller::new(SimulatedBus::new());
        load_test_config(&mut ctl);
        let before = ctl.active().cloned().unwrap();

        // Missing the delimiter after the repetition field.
        feed(&mut ctl, b"d");
        let responses = feed(&mut ctl, b"c2|b1|l2|r3\0");
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with("configuration rejected"), "{}", responses[0]);

        assert_eq!(ctl.active(), Some(&before));
        // The machine is back in Accept: a plain command works.
        let responses = feed(&mut ctl, b"s");
        assert!(responses[0].starts_with("step:"), "{}", responses[0]);
    }

    #[test]
    fn invalid_block_parameters_are_rejected() {
        let mut ctl = Controller::new(SimulatedBus::new());
        feed(&mut ctl, b"d");
        let responses = feed(&mut ctl, b"c2|b1|l2|r0|\0");
        assert!(responses[0].contains("zero length or repetition"), "{}", responses[0]);
        assert!(ctl.active().is_none());
    }

    #[test]
    fn oversized_body_declaration_is_rejected_at_the_header() {
        let mut ctl = Controller::new(SimulatedBus::new());
        feed(&mut ctl, b"d");
        // Parseable, but declares a multi-gigabyte body.
        let responses = feed(&mut ctl, b"c32|b1|l100000000|r1|\0");
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with("configuration rejected"), "{}", responses[0]);
        assert!(ctl.active().is_none());
        let responses = feed(&mut ctl, b"z");
        assert_eq!(responses, ["all channels zeroed"]);
    }

    #[test]
    fn runaway_header_is_cut_off() {
        let mut ctl = Controller::new(SimulatedBus::new());
        feed(&mut ctl, b"d");
        let responses = feed(&mut ctl, &[b'x'; MAX_HEADER_LEN + 1]);
        assert_eq!(responses.len(), 1);
        assert!(responses[0].contains("header exceeds"), "{}", responses[0]);
        let responses = feed(&mut ctl, b"z");
        assert_eq!(responses, ["all channels zeroed"]);
    }

    #[test]
    fn unterminated_header_times_out() {
        let mut ctl = Controller::with_load_timeout(SimulatedBus::new(), Duration::ZERO);
        feed(&mut ctl, b"d");
        feed(&mut ctl, b"c2|b1");

        let timeout = ctl.poll().unwrap();
        assert!(timeout.starts_with("configuration rejected"), "{timeout}");
        assert!(ctl.active().is_none());
        let responses = feed(&mut ctl, b"s");
        assert_eq!(responses, ["no configuration loaded"]);
    }

    #[test]
    fn stalled_body_times_out_and_keeps_previous_configuration() {
        let mut ctl = Controller::with_load_timeout(SimulatedBus::new(), Duration::ZERO);
        feed(&mut ctl, b"d");
        feed(&mut ctl, b"c2|b1|l2|r3|\0");
        // A few body bytes arrive, then the host stalls.
        feed(&mut ctl, &[0, 0, 128]);

        let timeout = ctl.poll().unwrap();
        assert!(timeout.starts_with("configuration rejected"), "{timeout}");
        assert!(ctl.active().is_none());

        // Back in Accept; commands work and triggers are still safe.
        ctl.on_trigger();
        let responses = feed(&mut ctl, b"z");
        assert_eq!(responses, ["all channels zeroed"]);
    }

    #[test]
    fn zero_all_is_idempotent() {
        let mut ctl = Controller::new(SimulatedBus::new());
        feed(&mut ctl, b"z");
        let first = ctl.bus().dac_code(2, 3);
        feed(&mut ctl, b"z");
        assert_eq!(ctl.bus().dac_code(2, 3), first);
        assert_eq!(first, expected_code(0.0));
    }

    #[test]
    fn manual_set_drives_one_channel() {
        let mut ctl = Controller::new(SimulatedBus::new());
        let responses = feed(&mut ctl, b"m1 3 0.25\n");
        assert_eq!(responses.len(), 1);
        assert!(responses[0].starts_with("(1,3) set to 0.25 A"), "{}", responses[0]);
        assert_eq!(ctl.bus().dac_code(1, 3), expected_code(0.25));
        assert_eq!(ctl.bus().dac_code(1, 2), 0);
    }

    #[test]
    fn manual_set_rejects_bad_tokens() {
        let mut ctl = Controller::new(SimulatedBus::new());
        let responses = feed(&mut ctl, b"m9 0 0.1\n");
        assert_eq!(responses, ["board 9 out of range"]);
        let responses = feed(&mut ctl, b"m0 0\n");
        assert_eq!(responses, ["expected: <board> <channel> <amps>"]);
    }

    #[test]
    fn calibrate_one_updates_the_bank() {
        let mut ctl = Controller::new(SimulatedBus::new());
        ctl.bus_mut().channel_mut(0, 2).input_offset_v = 0.04;
        let responses = feed(&mut ctl, b"o0 2\n");
        assert!(responses[0].starts_with("(0,2) calibrated"), "{}", responses[0]);
        assert!(ctl.bank().get(0, 2).valid);
    }

    #[test]
    fn calibrate_one_reports_failure() {
        let mut ctl = Controller::new(SimulatedBus::new());
        ctl.bus_mut().channel_mut(0, 2).responsive = false;
        let responses = feed(&mut ctl, b"o0 2\n");
        assert!(responses[0].contains("failed"), "{}", responses[0]);
        assert!(!ctl.bank().get(0, 2).valid);
    }

    #[test]
    fn calibrate_all_reports_the_bad_channel() {
        let mut ctl = Controller::new(SimulatedBus::new());
        ctl.bus_mut().channel_mut(2, 5).responsive = false;
        let responses = feed(&mut ctl, b"c");
        assert!(responses[0].contains("(2,5) failed"), "{}", responses[0]);
        assert!(responses[0].contains("31/32 channels ok"), "{}", responses[0]);
    }

    #[test]
    fn single_step_shares_the_counter_with_triggers() {
        let mut ctl = Controller::new(SimulatedBus::new());
        load_test_config(&mut ctl);

        ctl.on_trigger();
        let responses = feed(&mut ctl, b"s");
        assert!(responses[0].contains("row 1"), "{}", responses[0]);
        ctl.on_trigger();
        assert_eq!(ctl.counter(), 3);
        assert_eq!(ctl.bus().dac_code(0, 0), expected_code(1.0));
    }

    #[test]
    fn reset_and_arm_replays_the_first_row() {
        let mut ctl = Controller::new(SimulatedBus::new());
        load_test_config(&mut ctl);
        for _ in 0..4 {
            ctl.on_trigger();
        }

        let responses = feed(&mut ctl, b"r");
        assert_eq!(responses, ["reset: block 0, row 0 driven"]);
        assert_eq!(ctl.counter(), 1);
        assert_eq!(ctl.bus().dac_code(0, 0), expected_code(1.0));
    }

    #[test]
    fn reload_replaces_the_configuration_and_rewinds() {
        let mut ctl = Controller::new(SimulatedBus::new());
        load_test_config(&mut ctl);
        for _ in 0..3 {
            ctl.on_trigger();
        }

        feed(&mut ctl, b"d");
        feed(&mut ctl, b"c1|b1|l1|r2|\0");
        let responses = feed(&mut ctl, &body(&[0.2]));
        assert!(responses[0].starts_with("configuration loaded"), "{}", responses[0]);
        assert_eq!(ctl.counter(), 0);

        ctl.on_trigger();
        assert_eq!(ctl.bus().dac_code(0, 0), expected_code(0.2));
    }

    #[test]
    fn triggers_during_body_play_the_previous_configuration() {
        let mut ctl = Controller::new(SimulatedBus::new());
        load_test_config(&mut ctl);

        feed(&mut ctl, b"d");
        feed(&mut ctl, b"c2|b1|l2|r3|\0");
        // Half a body has arrived when a trigger fires.
        feed(&mut ctl, &body(&[9.0, 9.0]));
        ctl.on_trigger();
        assert_eq!(ctl.bus().dac_code(0, 0), expected_code(1.0));
    }

    #[test]
    fn read_boards_marks_uncalibrated_channels() {
        let mut ctl = Controller::new(SimulatedBus::new());
        let responses = feed(&mut ctl, b"b");
        assert!(responses[0].contains("B: 3"), "{}", responses[0]);
        assert!(responses[0].contains(" X"), "{}", responses[0]);
    }

    #[test]
    fn read_channels_covers_the_configured_count() {
        let mut ctl = Controller::new(SimulatedBus::new());
        load_test_config(&mut ctl);
        let responses = feed(&mut ctl, b"p");
        assert!(responses[0].contains("0 (0,0)"), "{}", responses[0]);
        assert!(responses[0].contains("1 (0,1)"), "{}", responses[0]);
        assert!(!responses[0].contains("2 (0,2)"), "{}", responses[0]);
    }

    #[test]
    fn test_output_drives_every_channel() {
        let mut ctl = Controller::new(SimulatedBus::new());
        let responses = feed(&mut ctl, b"t");
        assert_eq!(responses, ["all channels driven to 3 V"]);
        let expected = raw_voltage_code(TEST_OUTPUT_V).code;
        assert_eq!(ctl.bus().dac_code(0, 0), expected);
        assert_eq!(ctl.bus().dac_code(3, 7), expected);
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut ctl = Controller::new(SimulatedBus::new());
        let responses = feed(&mut ctl, b"q");
        assert_eq!(responses, ["unknown command 'q'"]);
    }

    #[test]
    fn whitespace_between_commands_is_ignored() {
        let mut ctl = Controller::new(SimulatedBus::new());
        let responses = feed(&mut ctl, b" \r\n\tz");
        assert_eq!(responses, ["all channels zeroed"]);
    }
}
