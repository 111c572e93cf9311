//! Image accumulator for a scan in progress.
//!
//! Cells are addressed `[row, col]`, row being the Y level and column the X
//! level. Display toolkits that index images `[x, y]` want the transpose;
//! [`Orientation`] makes that choice explicit at the snapshot call site.

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::pixel::PixelUpdate;

/// Memory layout requested from [`ScanImage::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// `[row, col]`, the accumulator's native layout.
    #[default]
    RowMajor,
    /// `[col, row]`, for sinks indexing images by `(x, y)`.
    Transposed,
}

/// Square grid of pixel intensities, zero where no data has arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanImage {
    data: Array2<f64>,
    filled: usize,
}

impl ScanImage {
    /// Creates a zeroed image.
    #[must_use]
    pub fn new(resolution: usize) -> Self {
        Self {
            data: Array2::zeros((resolution, resolution)),
            filled: 0,
        }
    }

    /// Pixels per side.
    #[must_use]
    pub fn resolution(&self) -> usize {
        self.data.nrows()
    }

    /// Number of `set_pixel` calls since the last reset.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Clears the image for a new run, reallocating only on a size change.
    pub fn reset(&mut self, resolution: usize) {
        if self.resolution() == resolution {
            self.data.fill(0.0);
        } else {
            self.data = Array2::zeros((resolution, resolution));
        }
        self.filled = 0;
    }

    /// Writes one cell.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] if the address lies outside the
    /// image. Correct raster arithmetic never produces one.
    pub fn set_pixel(&mut self, row: usize, col: usize, intensity: f64) -> Result<()> {
        let resolution = self.resolution();
        let cell = self
            .data
            .get_mut((row, col))
            .ok_or(Error::IndexOutOfRange {
                row,
                col,
                resolution,
            })?;
        *cell = intensity;
        self.filled += 1;
        Ok(())
    }

    /// Applies a streamed pixel update.
    ///
    /// # Errors
    /// See [`ScanImage::set_pixel`].
    pub fn apply(&mut self, update: &PixelUpdate) -> Result<()> {
        self.set_pixel(update.row, update.col, update.intensity)
    }

    /// Reads one cell.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }

    /// Read-only view in the native `[row, col]` layout.
    #[must_use]
    pub fn view(&self) -> ndarray::ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Copies the grid out in the requested orientation.
    #[must_use]
    pub fn snapshot(&self, orientation: Orientation) -> Array2<f64> {
        match orientation {
            Orientation::RowMajor => self.data.clone(),
            Orientation::Transposed => self.data.t().to_owned(),
        }
    }

    /// `(min, max, mean)` over all cells, or `None` for an empty image.
    #[must_use]
    pub fn stats(&self) -> Option<(f64, f64, f64)> {
        let mean = self.data.mean()?;
        let min = self.data.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max, mean))
    }
}

impl Default for ScanImage {
    fn default() -> Self {
        Self::new(0)
    }
}
