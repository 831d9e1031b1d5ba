//! Aligned buffer allocation and the growing byte matrix
//!
//! Symbol buffers and matrix rows are aligned to 32-byte boundaries so the
//! word-wide XOR loops start on friendly addresses. The matrix is row-major
//! with an aligned stride and over-allocates a handful of rows and columns,
//! tuned for the expected recovery retry rate, so a retry with a slightly
//! larger system usually avoids a reallocation.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Buffer alignment in bytes
pub const ALIGNMENT: usize = 32;

/// Round `offset` up to the next aligned boundary
#[inline]
pub const fn next_aligned_offset(offset: usize) -> usize {
    (offset + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Heap allocation aligned to [`ALIGNMENT`], zero-initialized
#[derive(Debug)]
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes
    pub fn zeroed(len: usize) -> Result<Self> {
        debug_assert!(len > 0);
        let layout = Layout::from_size_align(len.max(1), ALIGNMENT).map_err(|_| Error::OutOfMemory)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Self { ptr, len }),
            None => Err(Error::OutOfMemory),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Reset every byte to zero
    pub fn fill_zero(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // Same layout as the allocation; len.max(1) mirrors zeroed()
        let layout = Layout::from_size_align(self.len.max(1), ALIGNMENT)
            .expect("layout was valid at allocation");
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

/// Row-major byte matrix with aligned row stride that can grow in place
///
/// Each row's first element lands on an aligned address. Growing keeps
/// existing content; re-initializing discards it and hands back fresh zeroed
/// storage. Cells past the logical column count stay zero.
pub struct GrowingByteMatrix {
    buf: Option<AlignedBuffer>,
    rows: usize,
    columns: usize,
    allocated_rows: usize,
    allocated_columns: usize,
}

impl GrowingByteMatrix {
    /// Spare rows allocated beyond the requested count
    pub const EXTRA_ROWS: usize = 4;

    /// Minimum spare columns allocated beyond the requested count
    pub const MIN_EXTRA_COLUMNS: usize = 4;

    pub const fn new() -> Self {
        Self {
            buf: None,
            rows: 0,
            columns: 0,
            allocated_rows: 0,
            allocated_columns: 0,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Allocate fresh zeroed storage for the given size, discarding content
    pub fn initialize(&mut self, rows: usize, columns: usize) -> Result<()> {
        debug_assert!(rows > 0 && columns > 0);
        self.rows = rows;
        self.columns = columns;
        self.allocated_rows = rows + Self::EXTRA_ROWS;
        self.allocated_columns = next_aligned_offset(columns + Self::MIN_EXTRA_COLUMNS);

        // Release the old buffer before allocating the replacement
        self.buf = None;
        self.buf = Some(AlignedBuffer::zeroed(self.allocated_rows * self.allocated_columns)?);
        Ok(())
    }

    /// Grow to the given size, keeping existing content
    pub fn resize(&mut self, rows: usize, columns: usize) -> Result<()> {
        debug_assert!(rows > 0 && columns > 0);
        if self.buf.is_some() && rows <= self.allocated_rows && columns <= self.allocated_columns {
            self.rows = rows;
            self.columns = columns;
            return Ok(());
        }

        let allocated_rows = rows + Self::EXTRA_ROWS;
        let allocated_columns = next_aligned_offset(columns + Self::MIN_EXTRA_COLUMNS);
        let mut buffer = AlignedBuffer::zeroed(allocated_rows * allocated_columns)?;

        if let Some(old) = self.buf.take() {
            let copy_count = self.columns.min(columns);
            let src = old.as_slice();
            let dst = buffer.as_mut_slice();
            for i in 0..self.rows {
                let src_row = &src[i * self.allocated_columns..][..copy_count];
                dst[i * allocated_columns..][..copy_count].copy_from_slice(src_row);
            }
        }

        self.allocated_rows = allocated_rows;
        self.allocated_columns = allocated_columns;
        self.rows = rows;
        self.columns = columns;
        self.buf = Some(buffer);
        Ok(())
    }

    #[inline]
    pub fn get(&self, row: usize, column: usize) -> u8 {
        debug_assert!(row < self.rows && column < self.columns);
        self.buf.as_ref().map_or(0, |b| b.as_slice()[row * self.allocated_columns + column])
    }

    /// Logical-width view of a row
    #[inline]
    pub fn row(&self, row: usize) -> &[u8] {
        debug_assert!(row < self.rows);
        let start = row * self.allocated_columns;
        &self.buf.as_ref().expect("matrix not initialized").as_slice()[start..start + self.columns]
    }

    /// Mutable logical-width view of a row
    #[inline]
    pub fn row_mut(&mut self, row: usize) -> &mut [u8] {
        debug_assert!(row < self.rows);
        let start = row * self.allocated_columns;
        let columns = self.columns;
        &mut self.buf.as_mut().expect("matrix not initialized").as_mut_slice()[start..start + columns]
    }

    /// Shared view of row `a` together with a mutable view of row `b`
    pub fn row_pair_mut(&mut self, a: usize, b: usize) -> (&[u8], &mut [u8]) {
        debug_assert!(a != b && a < self.rows && b < self.rows);
        let stride = self.allocated_columns;
        let columns = self.columns;
        let data = self.buf.as_mut().expect("matrix not initialized").as_mut_slice();
        if a < b {
            let (left, right) = data.split_at_mut(b * stride);
            (&left[a * stride..][..columns], &mut right[..columns])
        } else {
            let (left, right) = data.split_at_mut(a * stride);
            (&right[..columns], &mut left[b * stride..][..columns])
        }
    }
}

impl Default for GrowingByteMatrix {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_buffer_alignment() {
        for len in [1usize, 7, 32, 1000] {
            let buf = AlignedBuffer::zeroed(len).unwrap();
            assert_eq!(buf.as_slice().as_ptr() as usize % ALIGNMENT, 0);
            assert_eq!(buf.len(), len);
            assert!(buf.as_slice().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_next_aligned_offset() {
        assert_eq!(next_aligned_offset(0), 0);
        assert_eq!(next_aligned_offset(1), 32);
        assert_eq!(next_aligned_offset(32), 32);
        assert_eq!(next_aligned_offset(33), 64);
    }

    #[test]
    fn test_matrix_initialize_zeroed() {
        let mut m = GrowingByteMatrix::new();
        m.initialize(3, 5).unwrap();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.columns(), 5);
        for r in 0..3 {
            for c in 0..5 {
                assert_eq!(m.get(r, c), 0);
            }
        }
    }

    #[test]
    fn test_matrix_rows_aligned() {
        let mut m = GrowingByteMatrix::new();
        m.initialize(4, 10).unwrap();
        for r in 0..4 {
            assert_eq!(m.row(r).as_ptr() as usize % ALIGNMENT, 0);
        }
    }

    #[test]
    fn test_matrix_resize_within_capacity() {
        let mut m = GrowingByteMatrix::new();
        m.initialize(2, 4).unwrap();
        m.row_mut(0).copy_from_slice(&[1, 2, 3, 4]);
        m.row_mut(1).copy_from_slice(&[5, 6, 7, 8]);
        // Fits inside the spare rows, so content must survive untouched
        m.resize(4, 4).unwrap();
        assert_eq!(&m.row(0)[..4], &[1, 2, 3, 4]);
        assert_eq!(&m.row(1)[..4], &[5, 6, 7, 8]);
        assert_eq!(&m.row(3)[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_matrix_resize_reallocates_and_copies() {
        let mut m = GrowingByteMatrix::new();
        m.initialize(2, 4).unwrap();
        m.row_mut(0).copy_from_slice(&[9, 8, 7, 6]);
        m.row_mut(1).copy_from_slice(&[1, 1, 2, 2]);
        // Far beyond spare capacity
        m.resize(40, 4).unwrap();
        assert_eq!(&m.row(0)[..4], &[9, 8, 7, 6]);
        assert_eq!(&m.row(1)[..4], &[1, 1, 2, 2]);
        assert_eq!(&m.row(39)[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_matrix_row_pair() {
        let mut m = GrowingByteMatrix::new();
        m.initialize(3, 4).unwrap();
        m.row_mut(0).copy_from_slice(&[1, 2, 3, 4]);
        m.row_mut(2).copy_from_slice(&[9, 9, 9, 9]);
        let (src, dst) = m.row_pair_mut(0, 2);
        assert_eq!(src, &[1, 2, 3, 4]);
        dst[0] = 42;
        assert_eq!(m.get(2, 0), 42);

        let (src, dst) = m.row_pair_mut(2, 0);
        assert_eq!(src[0], 42);
        dst[1] = 7;
        assert_eq!(m.get(0, 1), 7);
    }
}
