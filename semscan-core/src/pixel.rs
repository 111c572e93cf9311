//! Streamed pixel updates.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One completed pixel, emitted in raster order.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelUpdate {
    /// Image row (Y level index).
    pub row: usize,
    /// Image column (X level index).
    pub col: usize,
    /// Mean of the pixel's detector samples.
    pub intensity: f64,
}

impl PixelUpdate {
    /// Creates a pixel update.
    #[inline]
    #[must_use]
    pub fn new(row: usize, col: usize, intensity: f64) -> Self {
        Self {
            row,
            col,
            intensity,
        }
    }

    /// Builds the update for row-major pixel `index` of a square raster.
    #[inline]
    #[must_use]
    pub fn from_index(index: usize, resolution: usize, intensity: f64) -> Self {
        Self::new(index / resolution, index % resolution, intensity)
    }

    /// Row-major pixel index of this update.
    #[inline]
    #[must_use]
    pub fn index(&self, resolution: usize) -> usize {
        self.row * resolution + self.col
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        let update = PixelUpdate::from_index(7, 3, 1.5);
        assert_eq!((update.row, update.col), (2, 1));
        assert_eq!(update.index(3), 7);
    }
}
