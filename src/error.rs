//! Error types for configuration, streamed loading and calibration.
//!
//! Faults are scoped: a bad header or a stalled load aborts only the pending
//! configuration, and a calibration failure affects only its channel. None of
//! these stop the controller from accepting further commands.

use std::time::Duration;
use thiserror::Error;

/// A header was malformed or described an impossible schedule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field did not start with the expected single-character tag.
    #[error("missing '{0}' field tag in header")]
    MissingTag(char),
    /// A field was not closed by a '|' delimiter.
    #[error("missing '|' delimiter after '{0}' field")]
    MissingDelimiter(char),
    /// The text between tag and delimiter was not a decimal number.
    #[error("'{tag}' field is not a number: {text:?}")]
    BadNumber { tag: char, text: String },
    /// Channel count outside the populated hardware range.
    #[error("channel count {0} out of range")]
    ChannelCountOutOfRange(u32),
    /// Block count of zero, or more blocks than the schedule can hold.
    #[error("block count {0} out of range")]
    BlockCountOutOfRange(u32),
    /// A block with zero rows or zero repetitions would produce a zero-width
    /// schedule segment.
    #[error("block {0} has a zero length or repetition count")]
    EmptyBlock(usize),
    /// More distinct rows than the coefficient store can hold.
    #[error("total row count {0} exceeds the coefficient store capacity")]
    TotalRowsOutOfRange(u64),
    /// The header grew past its size bound without a terminator.
    #[error("header exceeds {0} bytes without a terminator")]
    HeaderTooLong(usize),
    /// The total trigger span does not fit the counter.
    #[error("schedule period overflows the trigger counter")]
    PeriodOverflow,
    /// Bytes left over after the last repetition field.
    #[error("unexpected trailing text {0:?} after header")]
    TrailingText(String),
}

/// A channel failed calibration. The channel is zeroed and marked invalid;
/// other channels are unaffected.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum CalibrationError {
    /// The two-point gain probe measured a slope outside the accepted band
    /// around the nominal amplifier gain.
    #[error("measured gain {measured} A/V outside nominal -1.62 +/- 0.5")]
    GainOutOfTolerance { measured: f32 },
    /// The zero-offset iteration hit its bound with residual current still
    /// above tolerance.
    #[error("zero offset did not converge, residual {residual} A")]
    NoConvergence { residual: f32 },
}

/// The streamed coefficient body stalled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The host stopped sending body bytes before the declared length
    /// arrived. The partial buffer is discarded and the previously active
    /// configuration stays in force.
    #[error("coefficient load timed out after {0:?}")]
    Timeout(Duration),
}
