//! Owned sample buffers: the assembled image and per-worker slabs.

pub mod io;

use crate::errors::{PipelineError, Result};

/// A fully assembled H x W grayscale image, samples in the 0-255 domain.
///
/// Exists only at the coordinator, between layers. Row-major, owns its
/// dimensions; all row access is bounds-checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl ImageMatrix {
    /// Allocate a zero-filled image.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap an existing row-major buffer.
    pub fn from_raw(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(PipelineError::Image(format!(
                "buffer length {} does not match {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Sample at (row, col).
    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        self.check(row, col)?;
        Ok(self.data[row * self.cols + col])
    }

    /// Overwrite the sample at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.check(row, col)?;
        self.data[row * self.cols + col] = value;
        Ok(())
    }

    /// Borrow one row.
    pub fn row(&self, row: usize) -> Result<&[f64]> {
        self.check(row, 0)?;
        let start = row * self.cols;
        Ok(&self.data[start..start + self.cols])
    }

    /// Copy `count` consecutive rows starting at `start` into a flat buffer.
    pub fn copy_rows(&self, start: usize, count: usize) -> Result<Vec<f64>> {
        if start + count > self.rows {
            return Err(PipelineError::Image(format!(
                "row range {}..{} out of bounds for {} rows",
                start,
                start + count,
                self.rows
            )));
        }
        let begin = start * self.cols;
        let end = (start + count) * self.cols;
        Ok(self.data[begin..end].to_vec())
    }

    /// Write `count` consecutive rows starting at `start` from a flat buffer.
    pub fn write_rows(&mut self, start: usize, count: usize, samples: &[f64]) -> Result<()> {
        if start + count > self.rows {
            return Err(PipelineError::Image(format!(
                "row range {}..{} out of bounds for {} rows",
                start,
                start + count,
                self.rows
            )));
        }
        if samples.len() != count * self.cols {
            return Err(PipelineError::Image(format!(
                "sample buffer length {} does not match {} rows of width {}",
                samples.len(),
                count,
                self.cols
            )));
        }
        let begin = start * self.cols;
        self.data[begin..begin + samples.len()].copy_from_slice(samples);
        Ok(())
    }

    /// The raw row-major buffer.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    fn check(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(PipelineError::Image(format!(
                "index ({}, {}) out of bounds for {}x{}",
                row, col, self.rows, self.cols
            )));
        }
        Ok(())
    }
}

/// One worker's halo'd buffer for one layer.
///
/// `rows x cols` samples, of which `working_rows` starting at `offset` are
/// the rows this worker must produce output for; the rest is read-only halo.
/// Discarded and rebuilt each layer.
#[derive(Debug, Clone)]
pub struct Slab {
    rows: usize,
    cols: usize,
    offset: usize,
    working_rows: usize,
    data: Vec<f64>,
}

impl Slab {
    pub fn new(
        rows: usize,
        cols: usize,
        offset: usize,
        working_rows: usize,
        data: Vec<f64>,
    ) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(PipelineError::Image(format!(
                "slab buffer length {} does not match {}x{}",
                data.len(),
                rows,
                cols
            )));
        }
        if offset + working_rows > rows {
            return Err(PipelineError::Image(format!(
                "working range {}..{} exceeds slab of {} rows",
                offset,
                offset + working_rows,
                rows
            )));
        }
        Ok(Self {
            rows,
            cols,
            offset,
            working_rows,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// First working row, relative to the slab.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn working_rows(&self) -> usize {
        self.working_rows
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Clamp-to-edge sample read; (row, col) may lie outside the slab.
    pub fn sample_clamped(&self, row: isize, col: isize) -> f64 {
        let r = row.clamp(0, self.rows as isize - 1) as usize;
        let c = col.clamp(0, self.cols as isize - 1) as usize;
        self.data[r * self.cols + c]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_length_check() {
        assert!(ImageMatrix::from_raw(2, 3, vec![0.0; 5]).is_err());
        assert!(ImageMatrix::from_raw(2, 3, vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_get_set_bounds() {
        let mut img = ImageMatrix::zeros(2, 2);
        img.set(1, 1, 9.0).unwrap();
        assert_eq!(img.get(1, 1).unwrap(), 9.0);
        assert!(img.get(2, 0).is_err());
        assert!(img.set(0, 2, 0.0).is_err());
    }

    #[test]
    fn test_copy_write_rows_roundtrip() {
        let mut img = ImageMatrix::from_raw(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mid = img.copy_rows(1, 1).unwrap();
        assert_eq!(mid, vec![3.0, 4.0]);
        img.write_rows(0, 1, &mid).unwrap();
        assert_eq!(img.row(0).unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn test_copy_rows_out_of_range() {
        let img = ImageMatrix::zeros(3, 2);
        assert!(img.copy_rows(2, 2).is_err());
    }

    #[test]
    fn test_write_rows_length_mismatch() {
        let mut img = ImageMatrix::zeros(3, 2);
        assert!(img.write_rows(0, 1, &[1.0]).is_err());
    }

    #[test]
    fn test_slab_clamped_reads() {
        // 2x2 slab: reads outside the buffer land on the nearest edge sample.
        let slab = Slab::new(2, 2, 0, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(slab.sample_clamped(-5, -5), 1.0);
        assert_eq!(slab.sample_clamped(-1, 1), 2.0);
        assert_eq!(slab.sample_clamped(7, 0), 3.0);
        assert_eq!(slab.sample_clamped(7, 7), 4.0);
        assert_eq!(slab.sample_clamped(0, 1), 2.0);
    }

    #[test]
    fn test_slab_working_range_check() {
        assert!(Slab::new(2, 2, 1, 2, vec![0.0; 4]).is_err());
        assert!(Slab::new(2, 2, 1, 1, vec![0.0; 4]).is_ok());
    }
}
