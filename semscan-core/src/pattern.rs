//! Raster pattern generation.
//!
//! A scan visits `resolution x resolution` pixels in row-major order. Each
//! pixel dwell is `samples_per_pixel` consecutive coordinate entries:
//!
//! - X holds one row pattern (every level repeated `samples_per_pixel`
//!   times) tiled `resolution` times.
//! - Y holds every level repeated `samples_per_pixel * resolution` times, so
//!   it stays constant for a whole row.
//!
//! Levels are `resolution` evenly spaced values from `min` to `max`
//! inclusive; a single level sits at `min`.

use std::ops::Index;

use crate::error::Result;
use crate::params::ScanParameters;

/// One axis of a generated raster, indexed by sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateSequence {
    values: Vec<f64>,
}

impl CoordinateSequence {
    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the entries as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Returns the entry at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// Returns an iterator over the entries.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }
}

impl Index<usize> for CoordinateSequence {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.values[index]
    }
}

impl From<Vec<f64>> for CoordinateSequence {
    fn from(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// Generates raster coordinate sequences. Pure computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPatternGenerator;

impl ScanPatternGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generates the `(X, Y)` sequences for a full raster.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameters`] for an invalid configuration.
    pub fn generate(
        &self,
        params: &ScanParameters,
    ) -> Result<(CoordinateSequence, CoordinateSequence)> {
        Ok((self.horizontal_sweep(params)?, self.vertical_sweep(params)?))
    }

    /// Generates the X sequence: one row pattern tiled once per row.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameters`] for an invalid configuration.
    pub fn horizontal_sweep(&self, params: &ScanParameters) -> Result<CoordinateSequence> {
        params.validate()?;
        let levels = levels(params);
        let mut values = Vec::with_capacity(params.total_samples());
        for _ in 0..params.resolution {
            for &level in &levels {
                values.extend(std::iter::repeat_n(level, params.samples_per_pixel));
            }
        }
        Ok(values.into())
    }

    /// Generates the Y sequence: a staircase held constant for each row.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameters`] for an invalid configuration.
    pub fn vertical_sweep(&self, params: &ScanParameters) -> Result<CoordinateSequence> {
        params.validate()?;
        let row_len = params.samples_per_pixel * params.resolution;
        let mut values = Vec::with_capacity(params.total_samples());
        for level in levels(params) {
            values.extend(std::iter::repeat_n(level, row_len));
        }
        Ok(values.into())
    }
}

/// Evenly spaced levels over the value range, both ends included.
fn levels(params: &ScanParameters) -> Vec<f64> {
    let (min, max) = params.value_range;
    let n = params.resolution;
    if n == 1 {
        return vec![min];
    }
    #[allow(clippy::cast_precision_loss)]
    let step = (max - min) / (n - 1) as f64;
    (0..n)
        .map(|i| {
            if i == n - 1 {
                max
            } else {
                #[allow(clippy::cast_precision_loss)]
                let offset = step * i as f64;
                min + offset
            }
        })
        .collect()
}

/// A generated raster bundled with the parameters it came from.
#[derive(Debug, Clone)]
pub struct ScanPattern {
    params: ScanParameters,
    x: CoordinateSequence,
    y: CoordinateSequence,
}

impl ScanPattern {
    /// Generates the raster for `params`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidParameters`] for an invalid configuration.
    pub fn new(params: ScanParameters) -> Result<Self> {
        let (x, y) = ScanPatternGenerator::new().generate(&params)?;
        Ok(Self { params, x, y })
    }

    /// Parameters the raster was generated from.
    #[must_use]
    pub fn params(&self) -> &ScanParameters {
        &self.params
    }

    /// The X sequence.
    #[must_use]
    pub fn x(&self) -> &CoordinateSequence {
        &self.x
    }

    /// The Y sequence.
    #[must_use]
    pub fn y(&self) -> &CoordinateSequence {
        &self.y
    }

    /// Number of samples per axis.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the pattern holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// The `(x, y)` pair commanded for sample `index`.
    #[must_use]
    pub fn sample(&self, index: usize) -> Option<(f64, f64)> {
        Some((self.x.get(index)?, self.y.get(index)?))
    }
}
