//! Random forest of weighted-gini classification trees.

use super::binning::{BinnedMatrix, FeatureBinner};
use super::tree::{grow_tree, DecisionTree, FeatureSampling, SplitObjective, TreeLimits};
use super::{validate_training_data, Classifier};
use crate::error::{Error, Result};
use ndarray::ArrayView2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum depth (`None` grows until leaves are pure)
    pub max_depth: Option<usize>,
    /// Minimum rows to split a node
    pub min_samples_split: usize,
    /// Draw a bootstrap sample per tree
    pub bootstrap: bool,
    /// Histogram bins per feature
    pub max_bins: usize,
    /// RNG seed
    pub seed: u64,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 500,
            max_depth: None,
            min_samples_split: 2,
            bootstrap: true,
            max_bins: 256,
            seed: 42,
        }
    }
}

/// Fitted forest; leaves hold class distributions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestModel {
    n_classes: usize,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

struct GiniObjective<'a> {
    labels: &'a [usize],
    weights: &'a [f32],
    n_classes: usize,
}

impl SplitObjective for GiniObjective<'_> {
    fn stat_width(&self) -> usize {
        self.n_classes
    }

    fn accumulate(&self, row: usize, acc: &mut [f64]) {
        acc[self.labels[row]] += self.weights[row] as f64;
    }

    // Weighted impurity decrease reduces to the change in sum(c^2) / w.
    fn score(&self, stats: &[f64]) -> f64 {
        let w: f64 = stats.iter().sum();
        if w <= 0.0 {
            return 0.0;
        }
        stats.iter().map(|c| c * c).sum::<f64>() / w
    }

    fn valid_child(&self, stats: &[f64]) -> bool {
        stats.iter().sum::<f64>() > 0.0
    }

    fn leaf_value(&self, stats: &[f64]) -> Vec<f32> {
        let w: f64 = stats.iter().sum();
        if w <= 0.0 {
            return vec![1.0 / self.n_classes as f32; self.n_classes];
        }
        stats.iter().map(|c| (c / w) as f32).collect()
    }
}

impl RandomForestModel {
    /// Fit on `x` with labels `y` in `0..n_classes` and per-sample weights.
    pub fn fit(
        x: ArrayView2<f32>,
        y: &[usize],
        weights: &[f32],
        n_classes: usize,
        params: &RandomForestParams,
    ) -> Result<Self> {
        validate_training_data(x, y, weights, n_classes)?;
        if params.n_estimators == 0 {
            return Err(Error::Training("forest needs at least one tree".to_string()));
        }

        let (n, d) = x.dim();
        let binner = FeatureBinner::fit(x, params.max_bins);
        let binned = binner.transform(x);
        let objective = GiniObjective {
            labels: y,
            weights,
            n_classes,
        };
        let k = ((d as f64).sqrt().floor() as usize).max(1);
        let sampling = FeatureSampling::PerSplit { n_features: d, k };
        let limits = TreeLimits {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
        };

        let trees: Vec<DecisionTree> = (0..params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(t as u64));
                let rows: Vec<u32> = if params.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n) as u32).collect()
                } else {
                    (0..n as u32).collect()
                };
                grow_tree(&binned, &binner, rows, &objective, &sampling, limits, &mut rng)
            })
            .collect();

        let model = Self {
            n_classes,
            n_features: d,
            trees,
        };
        log::info!(
            "Fitted random forest: {} trees, {} features per split, {} nodes total, train accuracy {:.4}",
            model.trees.len(),
            k,
            model.trees.iter().map(|t| t.len()).sum::<usize>(),
            model.binned_accuracy(&binned, y)
        );
        Ok(model)
    }

    /// Number of trees.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn binned_accuracy(&self, binned: &BinnedMatrix, y: &[usize]) -> f64 {
        let correct = y
            .iter()
            .enumerate()
            .filter(|(row, &label)| {
                let mut acc = vec![0f32; self.n_classes];
                for tree in &self.trees {
                    for (a, v) in acc.iter_mut().zip(tree.leaf_value_binned(binned, *row)) {
                        *a += v;
                    }
                }
                super::argmax(&acc) == label
            })
            .count();
        correct as f64 / y.len().max(1) as f64
    }

    pub(crate) fn check_structure(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(Error::Training("forest has no trees".to_string()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.check_structure(self.n_features, self.n_classes)
                .map_err(|e| Error::Training(format!("tree {}: {}", i, e)))?;
        }
        Ok(())
    }
}

impl Classifier for RandomForestModel {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_proba(&self, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != self.n_features {
            return Err(Error::DimensionMismatch {
                expected: self.n_features,
                found: x.len(),
            });
        }
        let mut proba = vec![0f32; self.n_classes];
        for tree in &self.trees {
            for (p, v) in proba.iter_mut().zip(tree.leaf_value(x)) {
                *p += v;
            }
        }
        let n = self.trees.len().max(1) as f32;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn stripes() -> (Array2<f32>, Vec<usize>) {
        let mut data = Vec::new();
        let mut y = Vec::new();
        for i in 0..90 {
            let class = i % 3;
            data.extend_from_slice(&[class as f32 * 5.0 + (i % 4) as f32 * 0.1, ((i * 13) % 7) as f32, 1.0]);
            y.push(class);
        }
        (Array2::from_shape_vec((90, 3), data).unwrap(), y)
    }

    fn params() -> RandomForestParams {
        RandomForestParams {
            n_estimators: 25,
            ..Default::default()
        }
    }

    #[test]
    fn test_forest_learns_stripes() {
        let (x, y) = stripes();
        let w = vec![1.0; y.len()];
        let forest = RandomForestModel::fit(x.view(), &y, &w, 3, &params()).unwrap();
        assert_eq!(forest.n_trees(), 25);
        forest.check_structure().unwrap();

        let binner = FeatureBinner::fit(x.view(), 256);
        assert!(forest.binned_accuracy(&binner.transform(x.view()), &y) > 0.95);

        let proba = forest.predict_proba(&[10.1, 3.0, 1.0]).unwrap();
        assert!((proba.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert_eq!(super::super::argmax(&proba), 2);
    }

    #[test]
    fn test_class_weights_shift_probabilities() {
        // Identical features, labels split 50/50: weights decide the leaf distribution.
        let x = Array2::from_elem((10, 2), 1.0f32);
        let y: Vec<usize> = (0..10).map(|i| i % 2).collect();
        let w: Vec<f32> = y.iter().map(|&c| if c == 0 { 3.0 } else { 1.0 }).collect();
        let forest = RandomForestModel::fit(
            x.view(),
            &y,
            &w,
            2,
            &RandomForestParams {
                n_estimators: 5,
                bootstrap: false,
                ..Default::default()
            },
        )
        .unwrap();
        let proba = forest.predict_proba(&[1.0, 1.0]).unwrap();
        assert!((proba[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_zero_trees_is_rejected() {
        let (x, y) = stripes();
        let w = vec![1.0; y.len()];
        let p = RandomForestParams {
            n_estimators: 0,
            ..Default::default()
        };
        assert!(RandomForestModel::fit(x.view(), &y, &w, 3, &p).is_err());
    }
}
