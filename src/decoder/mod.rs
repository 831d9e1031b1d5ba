//! Decoder
//!
//! Recovery runs in stages. Originals and recovery symbols are collected
//! until a solution may be possible, then a square GF(2^8) recovery matrix
//! over the lost columns is generated and experimentally put in upper
//! triangular form. That step touches no symbol data, so a failed attempt is
//! cheap and resumes where it stopped once more symbols arrive.
//!
//! Once elimination succeeds, the received originals are eliminated from
//! every solution row (the expensive pass, mirroring the encoder's running
//! sums), the lower triangle is replayed over the symbol data in pivot
//! order, and back-substitution divides out the diagonal to reveal the lost
//! originals inside the submitted recovery buffers.

mod recovery_matrix;

use log::debug;
use rustc_hash::FxHashSet;

use crate::aligned::AlignedBuffer;
use crate::bitset::BitSet;
use crate::error::{Error, Result};
use crate::gf256;
use crate::gf256::{muladd_mem, XorSummer};
use crate::params::{column_value, row_opcode, row_value, COLUMN_LANE_COUNT, COLUMN_SUM_COUNT};
use crate::prng::PcgRandom;
use crate::window::WindowParams;

use recovery_matrix::RecoveryMatrix;

/// Columns tracked per subwindow
pub(crate) const SUBWINDOW_BITS: usize = COLUMN_LANE_COUNT * 8;

type GotSet = BitSet<{ SUBWINDOW_BITS / 64 }>;

/// Received-column tracking for one subwindow of the input space
#[derive(Default)]
pub(crate) struct Subwindow {
    got: GotSet,
    got_count: usize,
}

/// A submitted recovery symbol
pub(crate) struct RecoveryInfo {
    /// Symbol bytes; overwritten during recovery
    pub data: Vec<u8>,
    /// Recovery row index
    pub row: u32,
    /// Set when this row was chosen as a pivot
    pub used_for_solution: bool,
}

/// Where a column's bytes currently live
pub(crate) enum OriginalData<'a> {
    /// Received from the application
    Received(&'a [u8]),
    /// Recovered in place inside a submitted recovery buffer
    Recovered { recovery_index: usize },
}

/// Per-column decoder slot
#[derive(Default)]
pub(crate) struct OriginalSlot<'a> {
    pub data: Option<OriginalData<'a>>,
    /// Matrix column this lost column maps to, valid while lost
    pub matrix_column: usize,
}

impl<'a> OriginalSlot<'a> {
    #[inline]
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// The column's bytes if they were received from the application
    #[inline]
    pub fn received(&self) -> Option<&'a [u8]> {
        match self.data {
            Some(OriginalData::Received(data)) => Some(data),
            _ => None,
        }
    }
}

/// Decoder-side view of the application data
pub(crate) struct DecoderWindow<'a> {
    pub params: WindowParams,
    pub originals: Vec<OriginalSlot<'a>>,
    pub recovery: Vec<RecoveryInfo>,
    pub subwindows: Vec<Subwindow>,
    pub original_got_count: usize,
    seen_rows: FxHashSet<u32>,
}

impl<'a> DecoderWindow<'a> {
    fn new(params: WindowParams) -> Self {
        let input_count = params.input_count;
        let mut originals = Vec::new();
        originals.resize_with(input_count, OriginalSlot::default);

        let subwindow_count = (input_count + SUBWINDOW_BITS - 1) / SUBWINDOW_BITS;
        let mut subwindows = Vec::new();
        subwindows.resize_with(subwindow_count, Subwindow::default);

        Self {
            params,
            originals,
            // Room for a plausible loss rate before reallocating
            recovery: Vec::with_capacity(input_count / 5 + 1),
            subwindows,
            original_got_count: 0,
            seen_rows: FxHashSet::default(),
        }
    }

    /// Record a received original; false if the column was already present
    fn add_original(&mut self, column: usize, data: &'a [u8]) -> bool {
        if self.originals[column].has_data() {
            return false;
        }

        self.originals[column].data = Some(OriginalData::Received(data));
        self.mark_got_element(column);
        self.original_got_count += 1;
        true
    }

    /// Record a recovery symbol; false if the row was already present
    fn add_recovery(&mut self, row: u32, data: Vec<u8>) -> bool {
        if !self.seen_rows.insert(row) {
            return false;
        }

        self.recovery.push(RecoveryInfo {
            data,
            row,
            used_for_solution: false,
        });
        true
    }

    fn mark_got_element(&mut self, element: usize) {
        let subwindow = &mut self.subwindows[element / SUBWINDOW_BITS];
        debug_assert!(!subwindow.got.check(element % SUBWINDOW_BITS));
        subwindow.got.set(element % SUBWINDOW_BITS);
        subwindow.got_count += 1;
    }

    /// Next lost column at or after `element_start`, or the input count if
    /// none remain
    pub fn find_next_lost_element(&self, element_start: usize) -> usize {
        let input_count = self.params.input_count;
        if element_start >= input_count {
            return input_count;
        }

        let mut subwindow_index = element_start / SUBWINDOW_BITS;
        let mut bit_index = element_start % SUBWINDOW_BITS;

        while subwindow_index < self.subwindows.len() {
            // Full subwindows cannot contain a lost column
            if self.subwindows[subwindow_index].got_count < SUBWINDOW_BITS {
                let clear = self.subwindows[subwindow_index].got.find_first_clear(bit_index);
                if clear < SUBWINDOW_BITS {
                    let mut element = subwindow_index * SUBWINDOW_BITS + clear;
                    if element > input_count {
                        element = input_count;
                    }
                    return element;
                }
            }

            bit_index = 0;
            subwindow_index += 1;
        }

        input_count
    }
}

/// One recovered original handed back by [`Decoder::decode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredSymbol<'d> {
    /// Column index of the recovered original
    pub index: usize,
    /// Recovered bytes, aliasing a submitted recovery buffer
    pub data: &'d [u8],
}

/// Lazily materialised running sums over the received originals
///
/// Only the (lane, sum) pairs actually referenced by solution rows are built.
#[derive(Default)]
struct LazyLaneSums {
    buffers: Vec<Option<AlignedBuffer>>,
}

impl LazyLaneSums {
    fn ensure(&mut self, window: &DecoderWindow<'_>, lane: usize, sum_index: usize) -> Result<()> {
        if self.buffers.is_empty() {
            self.buffers
                .resize_with(COLUMN_LANE_COUNT * COLUMN_SUM_COUNT, || None);
        }
        let slot = lane * COLUMN_SUM_COUNT + sum_index;
        if self.buffers[slot].is_some() {
            return Ok(());
        }

        let symbol_bytes = window.params.symbol_bytes;
        let mut buffer = AlignedBuffer::zeroed(symbol_bytes)?;
        let input_end = window.params.input_count - 1;

        if sum_index == 0 {
            let mut summer = XorSummer::new(buffer.as_mut_slice());
            let mut column = lane;
            while column < input_end {
                if let Some(data) = window.originals[column].received() {
                    summer.add(data);
                }
                column += COLUMN_LANE_COUNT;
            }
            if input_end % COLUMN_LANE_COUNT == lane {
                if let Some(data) = window.originals[input_end].received() {
                    summer.add_short(data);
                }
            }
            summer.finalize();
        } else {
            let dest = buffer.as_mut_slice();
            let mut column = lane;
            while column < input_end {
                if let Some(data) = window.originals[column].received() {
                    let mut value = column_value(column);
                    if sum_index == 2 {
                        value = gf256::sqr(value);
                    }
                    muladd_mem(dest, value, data);
                }
                column += COLUMN_LANE_COUNT;
            }
            if input_end % COLUMN_LANE_COUNT == lane {
                if let Some(data) = window.originals[input_end].received() {
                    let mut value = column_value(input_end);
                    if sum_index == 2 {
                        value = gf256::sqr(value);
                    }
                    muladd_mem(&mut dest[..data.len()], value, data);
                }
            }
        }

        self.buffers[slot] = Some(buffer);
        Ok(())
    }

    #[inline]
    fn get(&self, lane: usize, sum_index: usize) -> &[u8] {
        self.buffers[lane * COLUMN_SUM_COUNT + sum_index]
            .as_ref()
            .expect("lane sum materialised before use")
            .as_slice()
    }
}

/// Block decoder collecting originals and recovery symbols until the lost
/// columns can be solved
///
/// Original buffers are borrowed read-only; recovery buffers are taken by
/// value and rewritten in place during recovery, and recovered originals
/// alias into them afterwards.
pub struct Decoder<'a> {
    window: DecoderWindow<'a>,
    recovery_matrix: RecoveryMatrix,
    lane_sums: LazyLaneSums,
    recovery_attempted: bool,
}

impl<'a> Decoder<'a> {
    /// Create a decoder for a block of `input_count` symbols totalling
    /// `total_bytes`
    pub fn new(input_count: usize, total_bytes: u64) -> Result<Self> {
        let params = WindowParams::new(input_count, total_bytes)?;
        Ok(Self {
            window: DecoderWindow::new(params),
            recovery_matrix: RecoveryMatrix::new(),
            lane_sums: LazyLaneSums::default(),
            recovery_attempted: false,
        })
    }

    /// Submit a received original symbol
    ///
    /// The slice must be `column_bytes(column)` long. Submitting a column
    /// twice is a no-op.
    pub fn add_original(&mut self, column: usize, data: &'a [u8]) -> Result<()> {
        if column >= self.window.params.input_count {
            return Err(Error::InvalidInput("column index out of range"));
        }
        if data.len() != self.window.params.column_bytes(column) {
            return Err(Error::InvalidInput("original symbol has the wrong length"));
        }

        if self.window.add_original(column, data) {
            self.recovery_attempted = false;
        }
        Ok(())
    }

    /// Submit a recovery symbol; the buffer will be mutated during recovery
    ///
    /// The buffer must be `symbol_bytes` long. Submitting a row twice is a
    /// no-op (the duplicate buffer is dropped).
    pub fn add_recovery(&mut self, row: u32, data: Vec<u8>) -> Result<()> {
        if data.len() != self.window.params.symbol_bytes {
            return Err(Error::InvalidInput("recovery symbol has the wrong length"));
        }

        if self.window.add_recovery(row, data) {
            self.recovery_attempted = false;
        }
        Ok(())
    }

    /// Attempt recovery of all lost columns
    ///
    /// Returns the recovered symbols on success (empty when nothing was
    /// lost). Returns [`Error::NeedMoreData`] when no solution is possible
    /// yet, or when nothing new arrived since the last attempt.
    pub fn decode(&mut self) -> Result<Vec<RecoveredSymbol<'_>>> {
        let input_count = self.window.params.input_count;

        // Nothing lost
        if self.window.original_got_count >= input_count {
            return Ok(Vec::new());
        }

        // Not enough total symbols for a solution
        if self.window.original_got_count + self.window.recovery.len() < input_count {
            return Err(Error::NeedMoreData);
        }

        // Nothing new since the last attempt
        if self.recovery_attempted {
            return Err(Error::NeedMoreData);
        }
        self.recovery_attempted = true;

        self.recovery_matrix.generate(&mut self.window)?;

        if !self.recovery_matrix.gaussian_elimination(&mut self.window) {
            debug!(
                "elimination stalled at pivot {}; waiting for more rows",
                self.recovery_matrix.resume_pivot()
            );
            return Err(Error::NeedMoreData);
        }

        self.eliminate_original_data()?;
        self.multiply_lower_triangle();
        let recovered = self.back_substitution();

        debug!("recovered {} columns", recovered.len());

        let recovery = &self.window.recovery;
        Ok(recovered
            .into_iter()
            .map(|(column, recovery_index, bytes)| RecoveredSymbol {
                index: column,
                data: &recovery[recovery_index].data[..bytes],
            })
            .collect())
    }

    /// Fetch the bytes of an original column, received or recovered
    pub fn get_original(&self, column: usize) -> Result<&[u8]> {
        if column >= self.window.params.input_count {
            return Err(Error::InvalidInput("column index out of range"));
        }

        match self.window.originals[column].data {
            None => Err(Error::NeedMoreData),
            Some(OriginalData::Received(data)) => Ok(data),
            Some(OriginalData::Recovered { recovery_index }) => {
                let bytes = self.window.params.column_bytes(column);
                Ok(&self.window.recovery[recovery_index].data[..bytes])
            }
        }
    }

    /// Number of recovery rows currently held (duplicates excluded)
    pub fn recovery_count(&self) -> usize {
        self.window.recovery.len()
    }

    /// Window parameters in effect for this decoder
    pub fn params(&self) -> WindowParams {
        self.window.params
    }

    /// Subtract every received original's contribution from each solution
    /// row, leaving only the lost columns' combination in the buffer
    fn eliminate_original_data(&mut self) -> Result<()> {
        let params = self.window.params;
        let symbol_bytes = params.symbol_bytes;
        let input_count = params.input_count;
        let mut product = AlignedBuffer::zeroed(symbol_bytes)?;

        for index in 0..self.window.recovery.len() {
            if !self.window.recovery[index].used_for_solution {
                continue;
            }
            let row = self.window.recovery[index].row;

            // Materialise the lane sums this row references before any
            // buffers are pinned
            for lane in 0..COLUMN_LANE_COUNT {
                let opcode = row_opcode(lane, row);
                for bit in 0..COLUMN_SUM_COUNT * 2 {
                    if opcode & (1 << bit) != 0 {
                        self.lane_sums
                            .ensure(&self.window, lane, bit % COLUMN_SUM_COUNT)?;
                    }
                }
            }

            product.fill_zero();
            let lane_sums = &self.lane_sums;
            let originals = &self.window.originals;
            let recovery = &mut self.window.recovery[index];

            let mut summer = XorSummer::new(&mut recovery.data);
            let mut summer_rx = XorSummer::new(product.as_mut_slice());

            // Dense part: the lane sums over received data
            for lane in 0..COLUMN_LANE_COUNT {
                let opcode = row_opcode(lane, row);

                let mut mask = 1u32;
                for sum_index in 0..COLUMN_SUM_COUNT {
                    if opcode & mask != 0 {
                        summer.add(lane_sums.get(lane, sum_index));
                    }
                    mask <<= 1;
                }
                for sum_index in 0..COLUMN_SUM_COUNT {
                    if opcode & mask != 0 {
                        summer_rx.add(lane_sums.get(lane, sum_index));
                    }
                    mask <<= 1;
                }
            }

            // Sparse part: the received halves of the pair draws
            let mut prng = PcgRandom::seeded(row as u64, input_count as u64);
            for _ in 0..params.pair_count() {
                let element1 = prng.next_u32() as usize % input_count;
                if let Some(data) = originals[element1].received() {
                    if element1 == input_count - 1 {
                        summer.add_short(data);
                    } else {
                        summer.add(data);
                    }
                }

                let element_rx = prng.next_u32() as usize % input_count;
                if let Some(data) = originals[element_rx].received() {
                    if element_rx == input_count - 1 {
                        summer_rx.add_short(data);
                    } else {
                        summer_rx.add(data);
                    }
                }
            }

            let dest = summer.finalize();
            let product_done = summer_rx.finalize();
            muladd_mem(dest, row_value(row), product_done);
        }

        Ok(())
    }

    /// Replay the stored elimination multipliers over the symbol data in
    /// pivot order
    fn multiply_lower_triangle(&mut self) {
        let columns = self.recovery_matrix.column_count();
        let matrix = &self.recovery_matrix;
        let recovery = &mut self.window.recovery;

        for col_i in 0..columns - 1 {
            let src_index = matrix.pivot(col_i);

            for col_j in col_i + 1..columns {
                let dst_index = matrix.pivot(col_j);
                let y = matrix.get(dst_index, col_i);
                if y == 0 {
                    continue;
                }

                let (src, dst) = recovery_pair_mut(recovery, src_index, dst_index);
                muladd_mem(&mut dst.data, y, &src.data);
            }
        }
    }

    /// Divide out the diagonal from right to left, revealing the originals
    ///
    /// Returns (column, recovery index, bytes) per recovered column, in
    /// ascending column order.
    fn back_substitution(&mut self) -> Vec<(usize, usize, usize)> {
        let params = self.window.params;
        let columns = self.recovery_matrix.column_count();
        let matrix = &self.recovery_matrix;
        let recovery = &mut self.window.recovery;
        let originals = &mut self.window.originals;

        let mut recovered = vec![(0, 0, 0); columns];

        for col_i in (0..columns).rev() {
            let row_index = matrix.pivot(col_i);
            let diagonal = matrix.get(row_index, col_i);
            debug_assert!(diagonal != 0);

            let original_column = matrix.lost_column(col_i);
            let original_bytes = params.column_bytes(original_column);

            gf256::div_mem(&mut recovery[row_index].data[..original_bytes], diagonal);

            originals[original_column].data = Some(OriginalData::Recovered {
                recovery_index: row_index,
            });
            recovered[col_i] = (original_column, row_index, original_bytes);

            // Eliminate this column from every pivot row above it
            for col_j in 0..col_i {
                let pivot_j = matrix.pivot(col_j);
                let x = matrix.get(pivot_j, col_i);
                if x == 0 {
                    continue;
                }

                let (src, dst) = recovery_pair_mut(recovery, row_index, pivot_j);
                muladd_mem(&mut dst.data[..original_bytes], x, &src.data[..original_bytes]);
            }
        }

        recovered
    }
}

/// Disjoint (shared, mutable) access to two recovery records
fn recovery_pair_mut(
    recovery: &mut [RecoveryInfo],
    src: usize,
    dst: usize,
) -> (&RecoveryInfo, &mut RecoveryInfo) {
    debug_assert!(src != dst);
    if src < dst {
        let (left, right) = recovery.split_at_mut(dst);
        (&left[src], &mut right[0])
    } else {
        let (left, right) = recovery.split_at_mut(src);
        (&right[0], &mut left[dst])
    }
}
