//! Application-data window parameters shared by encoder and decoder
//!
//! Normalises the caller-facing pair (input count, total bytes) into the
//! per-symbol sizes the codec works with. Every symbol carries `symbol_bytes`
//! bytes except the final one, which may be shorter.

use crate::error::{Error, Result};
use crate::params::pair_count;

/// Validated window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    /// Number of input symbols (K)
    pub input_count: usize,
    /// Total number of input bytes across all symbols
    pub total_bytes: u64,
    /// Bytes per symbol for all but the final symbol
    pub symbol_bytes: usize,
    /// Bytes in the final symbol (1..=symbol_bytes)
    pub final_bytes: usize,
}

impl WindowParams {
    /// Validate and derive the symbol sizes
    pub fn new(input_count: usize, total_bytes: u64) -> Result<Self> {
        if input_count == 0 {
            return Err(Error::InvalidInput("input count must be at least 1"));
        }
        if total_bytes < input_count as u64 {
            return Err(Error::InvalidInput(
                "total bytes must be at least the input count",
            ));
        }

        let count = input_count as u64;
        let symbol_bytes = ((total_bytes + count - 1) / count) as usize;
        let mut final_bytes = (total_bytes % symbol_bytes as u64) as usize;
        if final_bytes == 0 {
            final_bytes = symbol_bytes;
        }
        debug_assert!(final_bytes >= 1 && final_bytes <= symbol_bytes);

        Ok(Self {
            input_count,
            total_bytes,
            symbol_bytes,
            final_bytes,
        })
    }

    #[inline]
    pub fn is_final_column(&self, column: usize) -> bool {
        column == self.input_count - 1
    }

    /// Byte count of the given column's symbol
    #[inline]
    pub fn column_bytes(&self, column: usize) -> usize {
        if self.is_final_column(column) {
            self.final_bytes
        } else {
            self.symbol_bytes
        }
    }

    /// Number of random pair-draw iterations per recovery row
    #[inline]
    pub fn pair_count(&self) -> usize {
        pair_count(self.input_count)
    }
}
