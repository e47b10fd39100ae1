//! Per-dimension standardization of fused feature vectors.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Fitted mean/scale pair for each feature dimension.
///
/// Zero-variance dimensions get a scale of 1, so transforming a constant
/// column yields zeros instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on a `samples × features` matrix (population variance).
    pub fn fit(features: ArrayView2<f32>) -> Result<Self> {
        let (n, d) = features.dim();
        if n == 0 || d == 0 {
            return Err(Error::Training("cannot fit scaler on an empty feature matrix".to_string()));
        }

        let mut mean = vec![0f64; d];
        let mut scale = vec![0f64; d];
        for (j, column) in features.axis_iter(Axis(1)).enumerate() {
            let m = column.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            let var = column.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / n as f64;
            mean[j] = m;
            let std = var.sqrt();
            scale[j] = if std > 0.0 && std.is_finite() { std } else { 1.0 };
        }
        Ok(Self { mean, scale })
    }

    /// Fitted dimensionality.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Per-dimension means.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Per-dimension scales.
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Standardize one vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] when `row` does not have the
    /// fitted length.
    pub fn transform_row(&self, row: &[f32]) -> Result<Vec<f32>> {
        if row.len() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                found: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&v, (m, s))| ((v as f64 - m) / s) as f32)
            .collect())
    }

    /// Standardize every row of a matrix.
    pub fn transform(&self, features: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (n, d) = features.dim();
        if d != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                found: d,
            });
        }
        let mut out = Array2::<f32>::zeros((n, d));
        for (mut dst, src) in out.axis_iter_mut(Axis(0)).zip(features.axis_iter(Axis(0))) {
            for (j, (o, &v)) in dst.iter_mut().zip(src.iter()).enumerate() {
                *o = ((v as f64 - self.mean[j]) / self.scale[j]) as f32;
            }
        }
        Ok(out)
    }

    /// Fit and transform in one step.
    pub fn fit_transform(features: ArrayView2<f32>) -> Result<(Self, Array2<f32>)> {
        let scaler = Self::fit(features)?;
        let transformed = scaler.transform(features)?;
        Ok((scaler, transformed))
    }
}
