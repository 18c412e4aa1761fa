//! Configuration header and the compiled playback schedule.
//!
//! The header is an ASCII record of single-character field tags separated by
//! `|`: `c<channels>|b<blocks>|l<len0>|..|l<lenN>|r<rep0>|..|r<repN>|`. The
//! compiler turns the block list into two cumulative arrays: the trigger
//! count at which each block ends and the coefficient-table row count through
//! each block. Both are strictly increasing for any accepted configuration.

use crate::error::ConfigError;
use crate::hardware::MAX_CHANNELS;

/// Upper bound on configured blocks.
pub const MAX_BLOCKS: usize = 9;
/// Upper bound on distinct rows across all blocks, sizing the coefficient
/// store. The declared body length is bounded by this before any buffer is
/// staged.
pub const MAX_TOTAL_ROWS: u32 = 4096;

/// One configured block: a run of distinct rows and how many times the run
/// is repeated before the schedule moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    /// Distinct rows in this block.
    pub rows: u32,
    /// Repetitions of the row run; each repetition spans `rows` triggers.
    pub reps: u32,
}

/// Parsed configuration header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigHeader {
    pub channels: u32,
    pub blocks: Vec<BlockSpec>,
}

/// Cursor over the header's tagged, delimited fields.
struct FieldReader<'a> {
    rest: &'a str,
}

impl<'a> FieldReader<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn field(&mut self, tag: char) -> Result<u32, ConfigError> {
        let body = self
            .rest
            .strip_prefix(tag)
            .ok_or(ConfigError::MissingTag(tag))?;
        let bar = body.find('|').ok_or(ConfigError::MissingDelimiter(tag))?;
        let text = &body[..bar];
        let value = text.parse::<u32>().map_err(|_| ConfigError::BadNumber {
            tag,
            text: text.to_owned(),
        })?;
        self.rest = &body[bar + 1..];
        Ok(value)
    }

    fn finish(self) -> Result<(), ConfigError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::TrailingText(self.rest.to_owned()))
        }
    }
}

impl ConfigHeader {
    /// Parse the wire form of a header record.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut fields = FieldReader::new(text);

        let channels = fields.field('c')?;
        if channels == 0 || channels as usize > MAX_CHANNELS {
            return Err(ConfigError::ChannelCountOutOfRange(channels));
        }

        let block_count = fields.field('b')?;
        if block_count == 0 || block_count as usize > MAX_BLOCKS {
            return Err(ConfigError::BlockCountOutOfRange(block_count));
        }

        let mut lengths = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            lengths.push(fields.field('l')?);
        }
        let mut blocks = Vec::with_capacity(block_count as usize);
        for rows in lengths {
            blocks.push(BlockSpec {
                rows,
                reps: fields.field('r')?,
            });
        }
        fields.finish()?;

        for (index, block) in blocks.iter().enumerate() {
            if block.rows == 0 || block.reps == 0 {
                return Err(ConfigError::EmptyBlock(index));
            }
        }

        let total_rows: u64 = blocks.iter().map(|b| u64::from(b.rows)).sum();
        if total_rows > u64::from(MAX_TOTAL_ROWS) {
            return Err(ConfigError::TotalRowsOutOfRange(total_rows));
        }

        Ok(Self { channels, blocks })
    }

    /// Wire form of this header, the inverse of [`ConfigHeader::parse`].
    pub fn encode(&self) -> String {
        let mut out = format!("c{}|b{}|", self.channels, self.blocks.len());
        for block in &self.blocks {
            out.push_str(&format!("l{}|", block.rows));
        }
        for block in &self.blocks {
            out.push_str(&format!("r{}|", block.reps));
        }
        out
    }

    /// Total distinct rows across all blocks.
    pub fn total_rows(&self) -> u32 {
        self.blocks.iter().map(|b| b.rows).sum()
    }

    /// Exact byte length of the coefficient body that follows this header.
    pub fn body_len(&self) -> usize {
        4 * self.channels as usize * self.total_rows() as usize
    }
}

/// Compiled schedule: block boundaries in trigger counts and table rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    /// Trigger count at which each block ends; the last entry is the period.
    transitions: Vec<u32>,
    /// Cumulative row count through each block.
    row_ends: Vec<u32>,
    /// Row count of each block, for the within-block modulo.
    lengths: Vec<u32>,
    period: u32,
}

impl Schedule {
    /// Compile the cumulative arrays from a header.
    ///
    /// Validation is repeated here so schedules built from hand-constructed
    /// headers hit the same checks as parsed ones.
    pub fn compile(header: &ConfigHeader) -> Result<Self, ConfigError> {
        if header.blocks.is_empty() || header.blocks.len() > MAX_BLOCKS {
            return Err(ConfigError::BlockCountOutOfRange(header.blocks.len() as u32));
        }

        let mut transitions = Vec::with_capacity(header.blocks.len());
        let mut row_ends = Vec::with_capacity(header.blocks.len());
        let mut lengths = Vec::with_capacity(header.blocks.len());
        let mut trigger_acc: u32 = 0;
        let mut row_acc: u32 = 0;

        for (index, block) in header.blocks.iter().enumerate() {
            if block.rows == 0 || block.reps == 0 {
                return Err(ConfigError::EmptyBlock(index));
            }
            let span = block
                .rows
                .checked_mul(block.reps)
                .ok_or(ConfigError::PeriodOverflow)?;
            trigger_acc = trigger_acc
                .checked_add(span)
                .ok_or(ConfigError::PeriodOverflow)?;
            row_acc = row_acc
                .checked_add(block.rows)
                .ok_or(ConfigError::PeriodOverflow)?;
            transitions.push(trigger_acc);
            row_ends.push(row_acc);
            lengths.push(block.rows);
        }

        if row_acc > MAX_TOTAL_ROWS {
            return Err(ConfigError::TotalRowsOutOfRange(u64::from(row_acc)));
        }

        Ok(Self {
            transitions,
            row_ends,
            lengths,
            period: trigger_acc,
        })
    }

    /// Trigger count after which the counter wraps to zero.
    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn transitions(&self) -> &[u32] {
        &self.transitions
    }

    pub fn row_ends(&self) -> &[u32] {
        &self.row_ends
    }

    /// Map a trigger counter to `(block index, coefficient-table row)`.
    ///
    /// Counters at or past the period wrap. The row cycles within the block,
    /// so repetitions replay the block's rows in order.
    pub fn resolve(&self, counter: u32) -> (usize, u32) {
        let counter = counter % self.period;
        let mut block = self.transitions.len() - 1;
        for (index, &end) in self.transitions.iter().enumerate() {
            if counter < end {
                block = index;
                break;
            }
        }
        let block_start = if block == 0 { 0 } else { self.transitions[block - 1] };
        let row_base = if block == 0 { 0 } else { self.row_ends[block - 1] };
        let row = (counter - block_start) % self.lengths[block];
        (block, row_base + row)
    }
}
