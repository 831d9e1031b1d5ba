//! Recovery matrix generation and incremental Gaussian elimination
//!
//! The matrix is square over the lost columns, sampled on demand from the
//! implicit code matrix whose columns are originals and whose rows are
//! recovery symbols. Elimination is attempted without pivoting first; the
//! matrix is dense, so most diagonals are non-zero and the pivot array only
//! comes into play once a zero is hit. A failed attempt records its pivot so
//! the next attempt picks up where it stopped instead of redoing the
//! triangle.
//!
//! Cells below the diagonal are overwritten with the multiplier that zeroed
//! them. The data-recovery pass replays exactly those multipliers over the
//! symbol buffers, which is what makes a separate record of the elimination
//! steps unnecessary.

use log::debug;

use crate::aligned::GrowingByteMatrix;
use crate::error::Result;
use crate::gf256;
use crate::params::{column_value, row_opcode, row_value, COLUMN_LANE_COUNT};
use crate::prng::PcgRandom;

use super::DecoderWindow;

/// A lost column tracked by the matrix
struct ColumnInfo {
    /// Original column number
    column: usize,
    /// Cached column multiplier
    cx: u8,
}

/// State for solving the lost columns, preserved across decode attempts
pub(crate) struct RecoveryMatrix {
    columns: Vec<ColumnInfo>,
    matrix: GrowingByteMatrix,
    /// Logical-to-physical row permutation; swapped instead of row data
    pivots: Vec<usize>,
    /// First pivot that failed in the last attempt
    ge_resume_pivot: usize,
    /// Matrix rows already populated
    filled_rows: usize,
}

impl RecoveryMatrix {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            matrix: GrowingByteMatrix::new(),
            pivots: Vec::new(),
            ge_resume_pivot: 0,
            filled_rows: 0,
        }
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn lost_column(&self, matrix_column: usize) -> usize {
        self.columns[matrix_column].column
    }

    #[inline]
    pub fn pivot(&self, index: usize) -> usize {
        self.pivots[index]
    }

    #[inline]
    pub fn get(&self, row: usize, column: usize) -> u8 {
        self.matrix.get(row, column)
    }

    #[inline]
    pub fn resume_pivot(&self) -> usize {
        self.ge_resume_pivot
    }

    /// Collect the lost columns in ascending order and record the inverse
    /// mapping on the window's slots
    fn populate_columns(&mut self, window: &mut DecoderWindow<'_>, columns: usize) {
        self.columns.clear();
        self.columns.reserve(columns);

        let mut next_search = 0;
        for matrix_column in 0..columns {
            let lost = window.find_next_lost_element(next_search);
            if lost >= window.params.input_count {
                debug_assert!(false, "fewer lost columns than expected");
                break;
            }
            next_search = lost + 1;

            self.columns.push(ColumnInfo {
                column: lost,
                cx: column_value(lost),
            });
            window.originals[lost].matrix_column = matrix_column;
        }
    }

    /// (Re)build the matrix to cover the current losses and recovery rows
    ///
    /// A change in the lost-column set discards all elimination progress; new
    /// recovery rows alone extend the matrix and have prior pivots applied to
    /// them.
    pub fn generate(&mut self, window: &mut DecoderWindow<'_>) -> Result<()> {
        let input_count = window.params.input_count;
        let columns = input_count - window.original_got_count;
        let rows = window.recovery.len();
        debug_assert!(rows >= columns);

        if columns != self.columns.len() {
            self.populate_columns(window, columns);

            // Lost set changed: all prior elimination work is invalid
            self.pivots.clear();
            self.ge_resume_pivot = 0;
            self.filled_rows = 0;

            self.matrix.initialize(rows, columns)?;
            debug!("recovery matrix rebuilt: {} x {}", rows, columns);
        } else {
            debug_assert!(self.filled_rows < rows);
            self.matrix.resize(rows, columns)?;
            debug!("recovery matrix grown to {} x {}", rows, columns);
        }

        let old_rows = self.filled_rows;

        for i in old_rows..rows {
            let row = window.recovery[i].row;
            let rx = row_value(row);
            let row_data = self.matrix.row_mut(i);

            // Dense contribution of every lane sum this row references
            for (j, info) in self.columns.iter().enumerate() {
                let cx = info.cx;
                let cx2 = gf256::sqr(cx);
                let lane = info.column % COLUMN_LANE_COUNT;
                let opcode = row_opcode(lane, row);

                let mut value = (opcode & 1) as u8;
                if opcode & 2 != 0 {
                    value ^= cx;
                }
                if opcode & 4 != 0 {
                    value ^= cx2;
                }
                if opcode & 8 != 0 {
                    value ^= rx;
                }
                if opcode & 16 != 0 {
                    value ^= gf256::mul(cx, rx);
                }
                if opcode & 32 != 0 {
                    value ^= gf256::mul(cx2, rx);
                }
                row_data[j] = value;
            }

            // Sparse contribution of the lost halves of the pair draws
            let mut prng = PcgRandom::seeded(row as u64, input_count as u64);
            for _ in 0..window.params.pair_count() {
                let element1 = prng.next_u32() as usize % input_count;
                if !window.originals[element1].has_data() {
                    row_data[window.originals[element1].matrix_column] ^= 1;
                }

                let element_rx = prng.next_u32() as usize % input_count;
                if !window.originals[element_rx].has_data() {
                    row_data[window.originals[element_rx].matrix_column] ^= rx;
                }
            }
        }

        self.pivots.resize(rows, 0);
        for i in old_rows..rows {
            self.pivots[i] = i;
        }

        if self.ge_resume_pivot > 0 {
            self.resume_ge(old_rows, rows);
        }

        self.filled_rows = rows;
        Ok(())
    }

    /// Apply all previously determined pivots to newly appended rows
    fn resume_ge(&mut self, old_rows: usize, rows: usize) {
        if old_rows >= rows {
            debug_assert!(old_rows == rows);
            return;
        }

        let columns = self.matrix.columns();

        for pivot_i in 0..self.ge_resume_pivot {
            let ge_index = self.pivots[pivot_i];
            let value_i = self.matrix.get(ge_index, pivot_i);
            debug_assert!(value_i != 0);

            for new_row in old_rows..rows {
                debug_assert!(self.pivots[new_row] == new_row);
                eliminate_row(&mut self.matrix, ge_index, new_row, pivot_i, columns, value_i);
            }
        }
    }

    /// Attempt to put the matrix in upper triangular form
    ///
    /// Returns false when a pivot could not be found; the failure point is
    /// remembered for resumption.
    pub fn gaussian_elimination(&mut self, window: &mut DecoderWindow<'_>) -> bool {
        if self.ge_resume_pivot > 0 {
            return self.pivoted_gaussian_elimination(window, self.ge_resume_pivot);
        }

        let columns = self.matrix.columns();
        let rows = self.matrix.rows();

        // Run without consulting the pivot array while the diagonal holds out
        for pivot_i in 0..columns {
            let value_i = self.matrix.get(pivot_i, pivot_i);
            if value_i == 0 {
                return self.pivoted_gaussian_elimination(window, pivot_i);
            }

            window.recovery[pivot_i].used_for_solution = true;

            for pivot_j in pivot_i + 1..rows {
                eliminate_row(&mut self.matrix, pivot_i, pivot_j, pivot_i, columns, value_i);
            }
        }

        true
    }

    /// Elimination with row swaps, entered once a zero diagonal is hit
    fn pivoted_gaussian_elimination(
        &mut self,
        window: &mut DecoderWindow<'_>,
        start_pivot: usize,
    ) -> bool {
        let columns = self.matrix.columns();
        let rows = self.matrix.rows();

        let mut pivot_i = start_pivot;
        // The row at the failed position is known zero in this column, so the
        // search resumes one row down
        let mut pivot_j = start_pivot + 1;

        loop {
            let mut found = false;

            while pivot_j < rows {
                let row_index_j = self.pivots[pivot_j];
                let value_i = self.matrix.get(row_index_j, pivot_i);
                if value_i == 0 {
                    pivot_j += 1;
                    continue;
                }

                if pivot_i != pivot_j {
                    self.pivots.swap(pivot_i, pivot_j);
                }
                window.recovery[row_index_j].used_for_solution = true;

                // The last pivot has no rows left worth eliminating
                if pivot_i >= columns - 1 {
                    return true;
                }

                for pivot_k in pivot_i + 1..rows {
                    let row_index_k = self.pivots[pivot_k];
                    eliminate_row(
                        &mut self.matrix,
                        row_index_j,
                        row_index_k,
                        pivot_i,
                        columns,
                        value_i,
                    );
                }

                found = true;
                break;
            }

            if !found {
                // Remember where we failed so more rows can resume here
                self.ge_resume_pivot = pivot_i;
                return false;
            }

            pivot_i += 1;
            if pivot_i >= columns {
                return true;
            }
            pivot_j = pivot_i;
        }
    }
}

/// Zero `rem_row`'s entry in the pivot column, recording the multiplier used
///
/// The multiplier lands in the cell it zeroed; the lower triangle doubles as
/// the record the data-recovery pass replays.
fn eliminate_row(
    matrix: &mut GrowingByteMatrix,
    ge_index: usize,
    rem_index: usize,
    pivot: usize,
    columns: usize,
    value_i: u8,
) {
    let (ge_row, rem_row) = matrix.row_pair_mut(ge_index, rem_index);

    let value_j = rem_row[pivot];
    if value_j == 0 {
        return;
    }

    let y = gf256::div(value_j, value_i);
    rem_row[pivot] = y;

    gf256::muladd_mem(&mut rem_row[pivot + 1..columns], y, &ge_row[pivot + 1..columns]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;
    use crate::encoder::Encoder;

    fn make_columns(count: usize, bytes: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|c| (0..bytes).map(|i| (c * 31 + i * 7 + 1) as u8).collect())
            .collect()
    }

    /// Drive a decoder through the private matrix state by losing columns
    /// and feeding encoder output
    fn build_decoder_state(
        input_count: usize,
        bytes: usize,
        lost: &[usize],
        rows: u32,
    ) -> (Vec<Vec<u8>>, Decoder<'static>) {
        let data = make_columns(input_count, bytes);
        let total = (input_count * bytes) as u64;
        let refs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
        let mut encoder = Encoder::new(&refs, total).unwrap();

        let mut decoder = Decoder::new(input_count, total).unwrap();
        let leaked: &'static [Vec<u8>] = Box::leak(data.clone().into_boxed_slice());
        for (column, column_data) in leaked.iter().enumerate() {
            if !lost.contains(&column) {
                decoder.add_original(column, column_data).unwrap();
            }
        }
        for row in 0..rows {
            let mut symbol = vec![0u8; bytes];
            encoder.encode(row, &mut symbol).unwrap();
            decoder.add_recovery(row, symbol).unwrap();
        }
        (data, decoder)
    }

    #[test]
    fn test_generate_orders_lost_columns_ascending() {
        let (_, mut decoder) = build_decoder_state(20, 4, &[11, 2, 17], 3);
        decoder
            .recovery_matrix
            .generate(&mut decoder.window)
            .unwrap();
        let m = &decoder.recovery_matrix;
        assert_eq!(m.column_count(), 3);
        assert_eq!(m.lost_column(0), 2);
        assert_eq!(m.lost_column(1), 11);
        assert_eq!(m.lost_column(2), 17);
        // Inverse mapping recorded on the slots
        assert_eq!(decoder.window.originals[2].matrix_column, 0);
        assert_eq!(decoder.window.originals[11].matrix_column, 1);
        assert_eq!(decoder.window.originals[17].matrix_column, 2);
    }

    #[test]
    fn test_generate_grows_without_reset() {
        let (_, mut decoder) = build_decoder_state(20, 4, &[5, 9], 2);
        decoder
            .recovery_matrix
            .generate(&mut decoder.window)
            .unwrap();
        assert_eq!(decoder.recovery_matrix.filled_rows, 2);
        let cell = decoder.recovery_matrix.get(0, 0);

        // More rows, same losses: existing rows keep their content
        let mut symbol = vec![0u8; 4];
        let data = make_columns(20, 4);
        let refs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
        let mut encoder = Encoder::new(&refs, 80).unwrap();
        encoder.encode(2, &mut symbol).unwrap();
        decoder.add_recovery(2, symbol).unwrap();

        decoder
            .recovery_matrix
            .generate(&mut decoder.window)
            .unwrap();
        assert_eq!(decoder.recovery_matrix.filled_rows, 3);
        assert_eq!(decoder.recovery_matrix.get(0, 0), cell);
    }

    #[test]
    fn test_gaussian_elimination_solves_dense_case() {
        let (_, mut decoder) = build_decoder_state(32, 8, &[1, 7, 20, 31], 6);
        decoder
            .recovery_matrix
            .generate(&mut decoder.window)
            .unwrap();
        assert!(decoder
            .recovery_matrix
            .gaussian_elimination(&mut decoder.window));

        // Every pivot row is marked for the data pass
        let used = decoder
            .window
            .recovery
            .iter()
            .filter(|r| r.used_for_solution)
            .count();
        assert_eq!(used, 4);

        // The permuted diagonal is non-zero
        for p in 0..4 {
            let row = decoder.recovery_matrix.pivot(p);
            assert_ne!(decoder.recovery_matrix.get(row, p), 0);
        }
    }
}
