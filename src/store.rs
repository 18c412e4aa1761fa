//! Coefficient store: the loaded table of target currents.
//!
//! One flat table, row-major by row then channel. It is built wholesale from
//! a completed body stream and never mutated afterwards; playback only ever
//! sees a fully loaded table.

/// Target currents for the full schedule, in amperes.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientStore {
    channels: usize,
    values: Vec<f32>,
}

impl CoefficientStore {
    /// Decode a complete body: little-endian f32s, `channels` per row.
    ///
    /// The caller (the protocol Body state) guarantees the byte count matches
    /// the header before this runs.
    pub fn from_le_bytes(channels: usize, bytes: &[u8]) -> Self {
        debug_assert!(channels > 0);
        debug_assert_eq!(bytes.len() % (4 * channels), 0);
        let values = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self { channels, values }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn rows(&self) -> usize {
        self.values.len() / self.channels
    }

    /// Target current for one channel at one table row.
    pub fn get(&self, table_row: u32, channel: usize) -> f32 {
        debug_assert!((table_row as usize) < self.rows());
        debug_assert!(channel < self.channels);
        self.values[self.channels * table_row as usize + channel]
    }
}
