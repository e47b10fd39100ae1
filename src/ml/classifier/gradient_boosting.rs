//! Multiclass gradient-boosted trees with a softmax objective.

use super::binning::{BinnedMatrix, FeatureBinner};
use super::tree::{grow_tree, DecisionTree, FeatureSampling, SplitObjective, TreeLimits};
use super::{softmax_in_place, validate_training_data, Classifier};
use crate::error::{Error, Result};
use ndarray::ArrayView2;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientBoostingParams {
    /// Boosting rounds (one tree per class per round)
    pub n_estimators: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Shrinkage applied to every leaf
    pub learning_rate: f32,
    /// Row fraction sampled per round
    pub subsample: f32,
    /// Feature fraction sampled per tree
    pub colsample_bytree: f32,
    /// Minimum hessian sum in a child
    pub min_child_weight: f64,
    /// L2 regularization on leaf values
    pub reg_lambda: f64,
    /// Histogram bins per feature
    pub max_bins: usize,
    /// RNG seed
    pub seed: u64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 500,
            max_depth: 8,
            learning_rate: 0.05,
            subsample: 0.8,
            colsample_bytree: 0.8,
            min_child_weight: 3.0,
            reg_lambda: 1.0,
            max_bins: 64,
            seed: 42,
        }
    }
}

/// Fitted boosted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingModel {
    n_classes: usize,
    n_features: usize,
    /// `rounds[r][k]` is the round-`r` tree for class `k`.
    rounds: Vec<Vec<DecisionTree>>,
}

struct SoftmaxObjective<'a> {
    grad: &'a [f64],
    hess: &'a [f64],
    reg_lambda: f64,
    min_child_weight: f64,
    learning_rate: f64,
}

impl SplitObjective for SoftmaxObjective<'_> {
    fn stat_width(&self) -> usize {
        2
    }

    fn accumulate(&self, row: usize, acc: &mut [f64]) {
        acc[0] += self.grad[row];
        acc[1] += self.hess[row];
    }

    fn score(&self, stats: &[f64]) -> f64 {
        0.5 * stats[0] * stats[0] / (stats[1] + self.reg_lambda)
    }

    fn valid_child(&self, stats: &[f64]) -> bool {
        stats[1] >= self.min_child_weight
    }

    fn leaf_value(&self, stats: &[f64]) -> Vec<f32> {
        vec![(-stats[0] / (stats[1] + self.reg_lambda) * self.learning_rate) as f32]
    }
}

impl GradientBoostingModel {
    /// Fit on `x` with labels `y` in `0..n_classes` and per-sample weights.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Training`] for inconsistent inputs or when the loss
    /// diverges.
    pub fn fit(
        x: ArrayView2<f32>,
        y: &[usize],
        weights: &[f32],
        n_classes: usize,
        params: &GradientBoostingParams,
    ) -> Result<Self> {
        validate_training_data(x, y, weights, n_classes)?;
        if !(params.subsample > 0.0 && params.subsample <= 1.0)
            || !(params.colsample_bytree > 0.0 && params.colsample_bytree <= 1.0)
        {
            return Err(Error::Training("subsample ratios must be in (0, 1]".to_string()));
        }

        let (n, d) = x.dim();
        let binner = FeatureBinner::fit(x, params.max_bins);
        let binned = binner.transform(x);
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);

        let mut margins = vec![0f64; n * n_classes];
        let mut rounds = Vec::with_capacity(params.n_estimators);
        let n_cols = ((d as f32 * params.colsample_bytree).round() as usize).clamp(1, d);
        let limits = TreeLimits {
            max_depth: Some(params.max_depth),
            min_samples_split: 2,
        };

        for round in 0..params.n_estimators {
            let probs = softmax_rows(&margins, n_classes);
            let rows: Vec<u32> = (0..n as u32)
                .filter(|_| params.subsample >= 1.0 || rng.gen::<f32>() < params.subsample)
                .collect();
            let rows = if rows.is_empty() { (0..n as u32).collect() } else { rows };
            let tree_seeds: Vec<u64> = (0..n_classes).map(|_| rng.gen()).collect();

            let trees: Vec<DecisionTree> = (0..n_classes)
                .into_par_iter()
                .map(|k| {
                    let (grad, hess) = class_gradients(&probs, y, weights, n_classes, k);
                    let objective = SoftmaxObjective {
                        grad: &grad,
                        hess: &hess,
                        reg_lambda: params.reg_lambda,
                        min_child_weight: params.min_child_weight,
                        learning_rate: params.learning_rate as f64,
                    };
                    let mut tree_rng = ChaCha8Rng::seed_from_u64(tree_seeds[k]);
                    let mut features = sample(&mut tree_rng, d, n_cols).into_vec();
                    features.sort_unstable();
                    grow_tree(
                        &binned,
                        &binner,
                        rows.clone(),
                        &objective,
                        &FeatureSampling::PerTree(features),
                        limits,
                        &mut tree_rng,
                    )
                })
                .collect();

            update_margins(&mut margins, &trees, &binned, n_classes);
            if margins.iter().any(|m| !m.is_finite()) {
                return Err(Error::Training(format!("gradient boosting diverged at round {}", round + 1)));
            }
            rounds.push(trees);

            if (round + 1) % 50 == 0 || round + 1 == params.n_estimators {
                let loss = weighted_log_loss(&softmax_rows(&margins, n_classes), y, weights, n_classes);
                log::info!("Boosting round {}/{}: train mlogloss {:.5}", round + 1, params.n_estimators, loss);
            }
        }

        Ok(Self {
            n_classes,
            n_features: d,
            rounds,
        })
    }

    /// Boosting rounds fitted.
    pub fn n_rounds(&self) -> usize {
        self.rounds.len()
    }

    pub(crate) fn check_structure(&self) -> Result<()> {
        for (r, trees) in self.rounds.iter().enumerate() {
            if trees.len() != self.n_classes {
                return Err(Error::Training(format!(
                    "boosting round {} has {} trees, expected {}",
                    r,
                    trees.len(),
                    self.n_classes
                )));
            }
            for (k, tree) in trees.iter().enumerate() {
                // One margin per leaf.
                tree.check_structure(self.n_features, 1)
                    .map_err(|e| Error::Training(format!("round {} class {} tree: {}", r, k, e)))?;
            }
        }
        Ok(())
    }
}

impl Classifier for GradientBoostingModel {
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
        let mut margins = vec![0f32; self.n_classes];
        for trees in &self.rounds {
            for (k, tree) in trees.iter().enumerate() {
                margins[k] += tree.leaf_value(x)[0];
            }
        }
        softmax_in_place(&mut margins);
        Ok(margins)
    }
}

fn softmax_rows(margins: &[f64], n_classes: usize) -> Vec<f64> {
    let mut probs = margins.to_vec();
    for row in probs.chunks_mut(n_classes) {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    probs
}

fn class_gradients(probs: &[f64], y: &[usize], weights: &[f32], n_classes: usize, k: usize) -> (Vec<f64>, Vec<f64>) {
    let n = y.len();
    let mut grad = Vec::with_capacity(n);
    let mut hess = Vec::with_capacity(n);
    for i in 0..n {
        let p = probs[i * n_classes + k];
        let target = if y[i] == k { 1.0 } else { 0.0 };
        let w = weights[i] as f64;
        grad.push((p - target) * w);
        hess.push((2.0 * p * (1.0 - p)).max(1e-6) * w);
    }
    (grad, hess)
}

fn update_margins(margins: &mut [f64], trees: &[DecisionTree], binned: &BinnedMatrix, n_classes: usize) {
    margins.par_chunks_mut(n_classes).enumerate().for_each(|(row, m)| {
        for (k, tree) in trees.iter().enumerate() {
            m[k] += tree.leaf_value_binned(binned, row)[0] as f64;
        }
    });
}

fn weighted_log_loss(probs: &[f64], y: &[usize], weights: &[f32], n_classes: usize) -> f64 {
    let mut loss = 0.0;
    let mut total = 0.0;
    for (i, (&label, &w)) in y.iter().zip(weights).enumerate() {
        let p = probs[i * n_classes + label].max(1e-15);
        loss -= w as f64 * p.ln();
        total += w as f64;
    }
    loss / total.max(f64::MIN_POSITIVE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn blobs() -> (Array2<f32>, Vec<usize>) {
        // Three clusters along feature 1; feature 0 is noise.
        let mut data = Vec::new();
        let mut y = Vec::new();
        for class in 0..3 {
            for i in 0..20 {
                data.push(((i * 7) % 11) as f32);
                data.push(class as f32 * 10.0 + (i % 5) as f32 * 0.3);
                y.push(class);
            }
        }
        (Array2::from_shape_vec((60, 2), data).unwrap(), y)
    }

    fn small_params() -> GradientBoostingParams {
        GradientBoostingParams {
            n_estimators: 20,
            max_depth: 3,
            learning_rate: 0.3,
            min_child_weight: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_fits_separable_clusters() {
        let (x, y) = blobs();
        let w = vec![1.0; y.len()];
        let model = GradientBoostingModel::fit(x.view(), &y, &w, 3, &small_params()).unwrap();
        assert_eq!(model.n_rounds(), 20);
        model.check_structure().unwrap();

        for (row, &label) in x.rows().into_iter().zip(&y) {
            let proba = model.predict_proba(&row.to_vec()).unwrap();
            assert!((proba.iter().sum::<f32>() - 1.0).abs() < 1e-4);
            let (pred, _) = model.predict(&row.to_vec()).unwrap();
            assert_eq!(pred, label);
        }
    }

    #[test]
    fn test_same_seed_same_model() {
        let (x, y) = blobs();
        let w = vec![1.0; y.len()];
        let a = GradientBoostingModel::fit(x.view(), &y, &w, 3, &small_params()).unwrap();
        let b = GradientBoostingModel::fit(x.view(), &y, &w, 3, &small_params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_wrong_feature_count() {
        let (x, y) = blobs();
        let w = vec![1.0; y.len()];
        let model = GradientBoostingModel::fit(x.view(), &y, &w, 3, &small_params()).unwrap();
        assert!(matches!(
            model.predict_proba(&[1.0, 2.0, 3.0]),
            Err(Error::DimensionMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_invalid_subsample_is_training_error() {
        let (x, y) = blobs();
        let w = vec![1.0; y.len()];
        let params = GradientBoostingParams {
            subsample: 0.0,
            ..small_params()
        };
        assert!(GradientBoostingModel::fit(x.view(), &y, &w, 3, &params).is_err());
    }
}
