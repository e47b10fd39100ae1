//! Decision classifier over standardized fused features.
//!
//! Two tree ensembles are available: gradient-boosted trees (the default)
//! and a random forest, which also serves as the fallback when boosting
//! cannot be fitted. Both expose class probabilities through [`Classifier`]
//! and serialize into a single tagged [`TrainedClassifier`].

pub mod binning;
pub mod gradient_boosting;
pub mod random_forest;
pub mod tree;

pub use gradient_boosting::{GradientBoostingModel, GradientBoostingParams};
pub use random_forest::{RandomForestModel, RandomForestParams};

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A fitted multiclass probability model.
pub trait Classifier: Send + Sync {
    /// Number of classes.
    fn n_classes(&self) -> usize;

    /// Input dimensionality.
    fn n_features(&self) -> usize;

    /// Class probabilities for one standardized vector; sums to 1.
    fn predict_proba(&self, x: &[f32]) -> Result<Vec<f32>>;

    /// Most probable class and its probability. Ties go to the lowest index.
    fn predict(&self, x: &[f32]) -> Result<(usize, f32)> {
        let proba = self.predict_proba(x)?;
        let best = argmax(&proba);
        Ok((best, proba[best]))
    }

    /// Probabilities for every row of `x`.
    fn predict_proba_batch(&self, x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let rows: Vec<Vec<f32>> = (0..x.nrows())
            .into_par_iter()
            .map(|i| self.predict_proba(&x.row(i).to_vec()))
            .collect::<Result<_>>()?;
        let mut out = Array2::<f32>::zeros((x.nrows(), self.n_classes()));
        for (i, row) in rows.into_iter().enumerate() {
            for (k, p) in row.into_iter().enumerate() {
                out[[i, k]] = p;
            }
        }
        Ok(out)
    }
}

/// Which ensemble to fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierStrategy {
    /// Gradient-boosted trees
    GradientBoosting(GradientBoostingParams),
    /// Random forest
    RandomForest(RandomForestParams),
}

impl Default for ClassifierStrategy {
    fn default() -> Self {
        ClassifierStrategy::GradientBoosting(GradientBoostingParams::default())
    }
}

impl ClassifierStrategy {
    /// Short name for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            ClassifierStrategy::GradientBoosting(_) => "gradient_boosting",
            ClassifierStrategy::RandomForest(_) => "random_forest",
        }
    }

    /// Fit the chosen ensemble.
    pub fn fit(&self, x: ArrayView2<f32>, y: &[usize], weights: &[f32], n_classes: usize) -> Result<TrainedClassifier> {
        match self {
            ClassifierStrategy::GradientBoosting(p) => Ok(TrainedClassifier::GradientBoosting(
                GradientBoostingModel::fit(x, y, weights, n_classes, p)?,
            )),
            ClassifierStrategy::RandomForest(p) => Ok(TrainedClassifier::RandomForest(RandomForestModel::fit(
                x, y, weights, n_classes, p,
            )?)),
        }
    }
}

/// Fit `strategy`, retrying with a forest when it fails and `fallback` is set.
pub fn fit_with_fallback(
    strategy: &ClassifierStrategy,
    fallback: Option<&RandomForestParams>,
    x: ArrayView2<f32>,
    y: &[usize],
    weights: &[f32],
    n_classes: usize,
) -> Result<TrainedClassifier> {
    log::info!("Fitting {} classifier on {} samples", strategy.name(), x.nrows());
    match strategy.fit(x, y, weights, n_classes) {
        Ok(model) => Ok(model),
        Err(e) => match (strategy, fallback) {
            (ClassifierStrategy::GradientBoosting(_), Some(rf)) => {
                log::warn!("Gradient boosting failed ({}), falling back to random forest", e);
                Ok(TrainedClassifier::RandomForest(RandomForestModel::fit(
                    x, y, weights, n_classes, rf,
                )?))
            },
            _ => Err(e),
        },
    }
}

/// Any fitted classifier, as stored in the classifier artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainedClassifier {
    /// Gradient-boosted trees
    GradientBoosting(GradientBoostingModel),
    /// Random forest
    RandomForest(RandomForestModel),
}

impl TrainedClassifier {
    /// Short name of the ensemble kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TrainedClassifier::GradientBoosting(_) => "gradient_boosting",
            TrainedClassifier::RandomForest(_) => "random_forest",
        }
    }

    /// Structural checks run after deserialization.
    pub fn validate(&self) -> Result<()> {
        match self {
            TrainedClassifier::GradientBoosting(m) => m.check_structure(),
            TrainedClassifier::RandomForest(m) => m.check_structure(),
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            TrainedClassifier::GradientBoosting(m) => m,
            TrainedClassifier::RandomForest(m) => m,
        }
    }
}

impl Classifier for TrainedClassifier {
    fn n_classes(&self) -> usize {
        self.inner().n_classes()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn predict_proba(&self, x: &[f32]) -> Result<Vec<f32>> {
        self.inner().predict_proba(x)
    }
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

pub(crate) fn softmax_in_place(values: &mut [f32]) {
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

pub(crate) fn validate_training_data(x: ArrayView2<f32>, y: &[usize], weights: &[f32], n_classes: usize) -> Result<()> {
    let (n, d) = x.dim();
    if n == 0 || d == 0 {
        return Err(Error::Training("empty training matrix".to_string()));
    }
    if y.len() != n || weights.len() != n {
        return Err(Error::Training(format!(
            "{} rows but {} labels and {} weights",
            n,
            y.len(),
            weights.len()
        )));
    }
    if n_classes < 2 {
        return Err(Error::Training("need at least two classes".to_string()));
    }
    if let Some(bad) = y.iter().find(|&&label| label >= n_classes) {
        return Err(Error::Training(format!("label {} out of range for {} classes", bad, n_classes)));
    }
    if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
        return Err(Error::Training("sample weights must be finite and positive".to_string()));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(Error::Training("feature matrix contains non-finite values".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn two_blobs() -> (Array2<f32>, Vec<usize>) {
        let mut data = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let class = i % 2;
            data.push(class as f32 * 4.0 + (i % 3) as f32 * 0.2);
            data.push((i % 5) as f32);
            y.push(class);
        }
        (Array2::from_shape_vec((40, 2), data).unwrap(), y)
    }

    #[test]
    fn test_argmax_ties_go_to_first() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax(&[1.0]), 0);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut v = vec![1000.0, 1000.0, 999.0];
        softmax_in_place(&mut v);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(v[0], v[1]);
    }

    #[test]
    fn test_validate_rejects_bad_inputs() {
        let (x, y) = two_blobs();
        let w = vec![1.0; 40];
        assert!(validate_training_data(x.view(), &y, &w, 2).is_ok());
        assert!(validate_training_data(x.view(), &y[..39], &w, 2).is_err());
        assert!(validate_training_data(x.view(), &y, &w, 1).is_err());
        let mut bad_w = w.clone();
        bad_w[0] = 0.0;
        assert!(validate_training_data(x.view(), &y, &bad_w, 2).is_err());
    }

    #[test]
    fn test_validate_rejects_corrupt_artifacts() {
        let empty_margin: TrainedClassifier = serde_json::from_str(
            r#"{"kind":"gradient_boosting","n_classes":2,"n_features":2,
                "rounds":[[{"nodes":[{"leaf":{"value":[]}}]},{"nodes":[{"leaf":{"value":[0.1]}}]}]]}"#,
        )
        .unwrap();
        assert!(empty_margin.validate().unwrap_err().to_string().contains("leaf 0"));

        let dangling: TrainedClassifier = serde_json::from_str(
            r#"{"kind":"random_forest","n_classes":2,"n_features":2,
                "trees":[{"nodes":[{"split":{"feature":0,"threshold":0.5,"bin":0,"left":7,"right":8}}]}]}"#,
        )
        .unwrap();
        assert!(dangling.validate().unwrap_err().to_string().contains("child 7"));

        let truncated_distribution: TrainedClassifier = serde_json::from_str(
            r#"{"kind":"random_forest","n_classes":3,"n_features":2,
                "trees":[{"nodes":[{"leaf":{"value":[0.5,0.5]}}]}]}"#,
        )
        .unwrap();
        assert!(truncated_distribution.validate().is_err());

        let fitted = fit_with_fallback(
            &ClassifierStrategy::RandomForest(RandomForestParams {
                n_estimators: 3,
                ..Default::default()
            }),
            None,
            two_blobs().0.view(),
            &two_blobs().1,
            &[1.0; 40],
            2,
        )
        .unwrap();
        let round_trip: TrainedClassifier = serde_json::from_str(&serde_json::to_string(&fitted).unwrap()).unwrap();
        round_trip.validate().unwrap();
    }

    #[test]
    fn test_fallback_to_forest_when_boosting_fails() {
        let (x, y) = two_blobs();
        let w = vec![1.0; 40];
        let broken = ClassifierStrategy::GradientBoosting(GradientBoostingParams {
            subsample: 2.0,
            ..Default::default()
        });
        let rf = RandomForestParams {
            n_estimators: 10,
            ..Default::default()
        };

        let model = fit_with_fallback(&broken, Some(&rf), x.view(), &y, &w, 2).unwrap();
        assert_eq!(model.kind_name(), "random_forest");
        assert!(fit_with_fallback(&broken, None, x.view(), &y, &w, 2).is_err());
    }

    #[test]
    fn test_trained_classifier_serde_round_trip() {
        let (x, y) = two_blobs();
        let w = vec![1.0; 40];
        let strategy = ClassifierStrategy::GradientBoosting(GradientBoostingParams {
            n_estimators: 5,
            max_depth: 2,
            min_child_weight: 1.0,
            ..Default::default()
        });
        let model = strategy.fit(x.view(), &y, &w, 2).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains("\"kind\":\"gradient_boosting\""));

        let back: TrainedClassifier = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        let probe = [4.1f32, 2.0];
        assert_eq!(model.predict_proba(&probe).unwrap(), back.predict_proba(&probe).unwrap());

        let batch = back.predict_proba_batch(x.view()).unwrap();
        assert_eq!(batch.dim(), (40, 2));
    }

    #[test]
    fn test_strategy_config_round_trip() {
        let json = r#"{"kind":"random_forest","n_estimators":50}"#;
        let strategy: ClassifierStrategy = serde_json::from_str(json).unwrap();
        match strategy {
            ClassifierStrategy::RandomForest(p) => {
                assert_eq!(p.n_estimators, 50);
                assert_eq!(p.seed, 42);
            },
            other => panic!("Expected random forest, got {:?}", other),
        }
    }
}
