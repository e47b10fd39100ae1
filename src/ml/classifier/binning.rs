//! Quantile binning of continuous features.
//!
//! Tree learners search splits over at most 256 bins per feature instead of
//! every distinct value. A value falls into bin `b` when it is greater than
//! `thresholds[b - 1]` and not greater than `thresholds[b]`, so "bin ≤ b"
//! is the same test as "value ≤ thresholds[b]" and fitted trees can be
//! evaluated on raw features.

use ndarray::ArrayView2;
use rayon::prelude::*;

/// Upper bound on bins per feature (bins are stored as `u8`).
pub const MAX_BINS: usize = 256;

/// Per-feature split thresholds.
#[derive(Debug, Clone)]
pub struct FeatureBinner {
    thresholds: Vec<Vec<f32>>,
}

/// Column-major bin indices of a training matrix.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    bins: Vec<u8>,
    n_rows: usize,
    n_features: usize,
}

impl FeatureBinner {
    /// Compute thresholds for every column of `x`.
    pub fn fit(x: ArrayView2<f32>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, MAX_BINS);
        let thresholds = (0..x.ncols())
            .into_par_iter()
            .map(|f| column_thresholds(x.column(f).to_vec(), max_bins))
            .collect();
        Self { thresholds }
    }

    /// Number of features seen at fit time.
    pub fn n_features(&self) -> usize {
        self.thresholds.len()
    }

    /// Number of bins of feature `f`.
    pub fn n_bins(&self, f: usize) -> usize {
        self.thresholds[f].len() + 1
    }

    /// Upper edge of bin `b` of feature `f`.
    pub fn threshold(&self, f: usize, b: usize) -> f32 {
        self.thresholds[f][b]
    }

    /// Bin index of `value` for feature `f`.
    pub fn bin_of(&self, f: usize, value: f32) -> u8 {
        // First threshold >= value; NaN sorts past every edge.
        let t = &self.thresholds[f];
        t.partition_point(|&edge| edge < value || value.is_nan()) as u8
    }

    /// Bin every value of `x`.
    pub fn transform(&self, x: ArrayView2<f32>) -> BinnedMatrix {
        let (n_rows, n_features) = x.dim();
        let mut bins = vec![0u8; n_rows * n_features];
        if n_rows > 0 {
            bins.par_chunks_mut(n_rows).enumerate().for_each(|(f, out)| {
                for (dst, &v) in out.iter_mut().zip(x.column(f).iter()) {
                    *dst = self.bin_of(f, v);
                }
            });
        }
        BinnedMatrix {
            bins,
            n_rows,
            n_features,
        }
    }
}

impl BinnedMatrix {
    /// Rows in the matrix.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Features in the matrix.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// All bins of feature `f`, indexed by row.
    pub fn column(&self, f: usize) -> &[u8] {
        &self.bins[f * self.n_rows..(f + 1) * self.n_rows]
    }

    /// Bin of (`row`, `f`).
    pub fn get(&self, row: usize, f: usize) -> u8 {
        self.bins[f * self.n_rows + row]
    }
}

fn column_thresholds(mut values: Vec<f32>, max_bins: usize) -> Vec<f32> {
    values.retain(|v| v.is_finite());
    values.sort_by(|a, b| a.total_cmp(b));

    let mut distinct = values.clone();
    distinct.dedup();
    if distinct.len() <= 1 {
        return Vec::new();
    }

    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0).collect();
    }

    let n = values.len();
    let mut edges: Vec<f32> = (1..max_bins).map(|k| values[k * n / max_bins]).collect();
    edges.dedup();
    // The largest value as an edge would leave the last bin empty.
    if edges.last() == distinct.last() {
        edges.pop();
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_few_distinct_values_use_midpoints() {
        let x = Array2::from_shape_vec((4, 1), vec![1.0f32, 3.0, 3.0, 5.0]).unwrap();
        let binner = FeatureBinner::fit(x.view(), 256);
        assert_eq!(binner.n_bins(0), 3);
        assert_eq!(binner.threshold(0, 0), 2.0);
        assert_eq!(binner.threshold(0, 1), 4.0);
        assert_eq!(binner.bin_of(0, 1.0), 0);
        assert_eq!(binner.bin_of(0, 3.0), 1);
        assert_eq!(binner.bin_of(0, 9.0), 2);
    }

    #[test]
    fn test_constant_column_has_one_bin() {
        let x = Array2::from_elem((5, 1), 0.25f32);
        let binner = FeatureBinner::fit(x.view(), 256);
        assert_eq!(binner.n_bins(0), 1);
        assert_eq!(binner.bin_of(0, 0.25), 0);
    }

    #[test]
    fn test_bin_order_matches_threshold_test() {
        let values: Vec<f32> = (0..1000).map(|i| ((i * 37) % 1000) as f32 / 7.0).collect();
        let x = Array2::from_shape_vec((1000, 1), values.clone()).unwrap();
        let binner = FeatureBinner::fit(x.view(), 16);
        assert!(binner.n_bins(0) <= 16);
        let binned = binner.transform(x.view());
        for (row, &v) in values.iter().enumerate() {
            let bin = binned.get(row, 0) as usize;
            for b in 0..binner.n_bins(0) - 1 {
                assert_eq!(bin <= b, v <= binner.threshold(0, b));
            }
        }
    }

    #[test]
    fn test_transform_is_column_major() {
        let x = ndarray::array![[0.0f32, 10.0], [1.0, 20.0], [2.0, 30.0]];
        let binner = FeatureBinner::fit(x.view(), 256);
        let binned = binner.transform(x.view());
        assert_eq!(binned.column(0), &[0, 1, 2]);
        assert_eq!(binned.column(1), &[0, 1, 2]);
        assert_eq!(binned.n_rows(), 3);
        assert_eq!(binned.n_features(), 2);
    }
}
