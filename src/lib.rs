//! # Shim-Current Waveform Sequencer
//!
//! This library contains the control core of a multi-board shim current
//! driver: the subsystem that plays a precomputed schedule of target currents
//! out of a bank of analog output channels, one step per external trigger,
//! to null residual magnetic field inhomogeneity in an MRI scanner.
//!
//! The pieces, leaf to root:
//!
//! - [`convert`] maps physical units to converter codes through per-channel
//!   calibration.
//! - [`calibration`] measures each channel's gain and zero offset against the
//!   analog feedback path.
//! - [`schedule`] parses configuration headers and compiles the cumulative
//!   block arrays that map a trigger counter to a table row.
//! - [`store`] holds the loaded table of target currents.
//! - [`playback`] performs one schedule step per trigger.
//! - [`protocol`] is the byte-at-a-time state machine tying it together:
//!   interactive commands, header parsing and the counted binary body load.
//! - [`hardware`] is the analog-bus seam, with a simulated implementation
//!   used by the tests and the CLI.
//!
//! The host side (field-map processing, shim-current solving, upload) lives
//! elsewhere; this crate only consumes the resulting byte stream.

pub mod calibration;
pub mod convert;
pub mod error;
pub mod hardware;
pub mod playback;
pub mod protocol;
pub mod schedule;
pub mod store;

pub use error::{CalibrationError, ConfigError, LoadError};
pub use hardware::{AnalogBus, SimulatedBus};
pub use protocol::Controller;
