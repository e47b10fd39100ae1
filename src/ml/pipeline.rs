//! Scaler + classifier pair applied to fused feature vectors.

use crate::category::{Category, NUM_CATEGORIES};
use crate::error::{Error, Result};
use crate::ml::classifier::{Classifier, TrainedClassifier};
use crate::ml::scaler::StandardScaler;

/// Output of [`ClassificationPipeline::predict`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOutput {
    /// Winning category
    pub category: Category,
    /// Index of the category in [`Category::ALL`]
    pub class_index: usize,
    /// Top probability as a percentage, two decimals, in [0, 100]
    pub confidence: f32,
}

/// Standardize, then classify.
#[derive(Debug, Clone)]
pub struct ClassificationPipeline {
    scaler: StandardScaler,
    classifier: TrainedClassifier,
}

impl ClassificationPipeline {
    /// Pair a fitted scaler with a fitted classifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the two were fitted on different dimensionalities
    /// or the classifier does not cover the twelve categories.
    pub fn new(scaler: StandardScaler, classifier: TrainedClassifier) -> Result<Self> {
        if scaler.dim() != classifier.n_features() {
            return Err(Error::DimensionMismatch {
                expected: scaler.dim(),
                found: classifier.n_features(),
            });
        }
        if classifier.n_classes() != NUM_CATEGORIES {
            return Err(Error::Training(format!(
                "classifier has {} classes, expected {}",
                classifier.n_classes(),
                NUM_CATEGORIES
            )));
        }
        Ok(Self { scaler, classifier })
    }

    /// Dimensionality the pipeline was fitted on.
    pub fn dim(&self) -> usize {
        self.scaler.dim()
    }

    /// Fitted scaler.
    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Fitted classifier.
    pub fn classifier(&self) -> &TrainedClassifier {
        &self.classifier
    }

    /// Class probabilities for a raw fused vector.
    pub fn predict_proba(&self, fused: &[f32]) -> Result<Vec<f32>> {
        let scaled = self.scaler.transform_row(fused)?;
        self.classifier.predict_proba(&scaled)
    }

    /// Classify a raw fused vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] before any computation when
    /// `fused.len()` differs from the fitted dimensionality.
    pub fn predict(&self, fused: &[f32]) -> Result<PipelineOutput> {
        if fused.len() != self.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.dim(),
                found: fused.len(),
            });
        }
        let scaled = self.scaler.transform_row(fused)?;
        let (class_index, probability) = self.classifier.predict(&scaled)?;
        let category = Category::from_index(class_index)
            .ok_or_else(|| Error::Training(format!("classifier returned class index {}", class_index)))?;
        Ok(PipelineOutput {
            category,
            class_index,
            confidence: confidence_percent(probability),
        })
    }
}

/// `round(p * 100, 2)`, clamped to [0, 100].
pub fn confidence_percent(probability: f32) -> f32 {
    let pct = (probability as f64 * 100.0 * 100.0).round() / 100.0;
    pct.clamp(0.0, 100.0) as f32
}
