//! Configuration for inference and retraining.

use crate::engine::artifacts::{ArtifactSet, CLASSIFIER_FILE, DEFAULT_CANDIDATE_SUFFIX, NETWORK_FILE, SCALER_FILE};
use crate::error::{Error, Result};
use crate::ml::classifier::{ClassifierStrategy, RandomForestParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Inference engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the production artifacts.
    pub model_dir: PathBuf,

    /// Embedding network file name (`.safetensors` or `.onnx`).
    pub network_file: String,

    /// Scaler artifact file name.
    pub scaler_file: String,

    /// Classifier artifact file name.
    pub classifier_file: String,

    /// Serialize neural-branch calls behind a mutex.
    pub serialize_neural_branch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            network_file: NETWORK_FILE.to_string(),
            scaler_file: SCALER_FILE.to_string(),
            classifier_file: CLASSIFIER_FILE.to_string(),
            serialize_neural_branch: false,
        }
    }

    /// Set the model directory.
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    /// Use a different network file name (e.g. an exported `.onnx` graph).
    pub fn with_network_file(mut self, name: impl Into<String>) -> Self {
        self.network_file = name.into();
        self
    }

    /// Serialize neural-branch calls.
    pub fn with_serialized_neural_branch(mut self, enable: bool) -> Self {
        self.serialize_neural_branch = enable;
        self
    }

    /// Resolved artifact paths.
    pub fn artifact_set(&self) -> ArtifactSet {
        ArtifactSet::new(
            self.model_dir.join(&self.network_file),
            self.model_dir.join(&self.scaler_file),
            self.model_dir.join(&self.classifier_file),
        )
    }
}

/// Random image augmentation applied while fine-tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Apply augmentation at all.
    pub enabled: bool,
    /// Maximum rotation in degrees (either direction).
    pub rotation_degrees: f32,
    /// Maximum shift as a fraction of the side (either direction).
    pub shift_fraction: f32,
    /// Maximum shear angle in degrees.
    pub shear_degrees: f32,
    /// Zoom range: scale drawn from `[1 - zoom, 1 + zoom]`.
    pub zoom_range: f32,
    /// Random horizontal flips.
    pub horizontal_flip: bool,
    /// Brightness factor range.
    pub brightness_range: (f32, f32),
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rotation_degrees: 30.0,
            shift_fraction: 0.2,
            shear_degrees: 0.15,
            zoom_range: 0.2,
            horizontal_flip: true,
            brightness_range: (0.8, 1.2),
        }
    }
}

impl AugmentationConfig {
    /// No augmentation.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Retraining configuration.
///
/// Loaded from JSON by the `retrain` binary; every field is optional there.
///
/// # Example
///
/// ```ignore
/// use mediwaste::config::TrainingConfig;
///
/// let config = TrainingConfig::new("dataset", "models")
///     .with_epochs(10)
///     .with_fine_tune_layers(2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Dataset root, one subdirectory per category.
    pub dataset_dir: PathBuf,

    /// Where candidate artifacts and the report are written.
    pub output_dir: PathBuf,

    /// Suffix appended to candidate artifact stems.
    pub artifact_suffix: String,

    /// Held-out fraction for the stratified split.
    pub test_fraction: f64,

    /// Mini-batch size for fine-tuning and feature extraction.
    pub batch_size: usize,

    /// Maximum fine-tuning epochs.
    pub epochs: usize,

    /// Backbone layers left trainable, counted from the top.
    pub fine_tune_layers: usize,

    /// Initial Adam learning rate.
    pub learning_rate: f64,

    /// Optional pretrained weights to start the backbone from.
    pub base_weights: Option<PathBuf>,

    /// Augmentation settings.
    pub augmentation: AugmentationConfig,

    /// Epochs without validation-accuracy improvement before stopping.
    pub early_stopping_patience: usize,

    /// Factor applied to the learning rate on a validation-loss plateau.
    pub plateau_factor: f64,

    /// Epochs without validation-loss improvement before reducing the rate.
    pub plateau_patience: usize,

    /// Learning-rate floor.
    pub min_learning_rate: f64,

    /// Preferred classifier.
    pub classifier: ClassifierStrategy,

    /// Fit a random forest if the preferred classifier fails.
    pub fallback_to_forest: bool,

    /// Forest parameters for the fallback.
    pub fallback_forest: RandomForestParams,

    /// Seed for splitting, augmentation and initialization.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new("dataset", "models")
    }
}

impl TrainingConfig {
    /// Defaults for the given dataset and output directories.
    pub fn new(dataset_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            output_dir: output_dir.into(),
            artifact_suffix: DEFAULT_CANDIDATE_SUFFIX.to_string(),
            test_fraction: 0.2,
            batch_size: 32,
            epochs: 30,
            fine_tune_layers: 3,
            learning_rate: 1e-5,
            base_weights: None,
            augmentation: AugmentationConfig::default(),
            early_stopping_patience: 5,
            plateau_factor: 0.5,
            plateau_patience: 3,
            min_learning_rate: 1e-7,
            classifier: ClassifierStrategy::default(),
            fallback_to_forest: true,
            fallback_forest: RandomForestParams::default(),
            seed: 42,
        }
    }

    /// Read a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(Error::Training(format!("test_fraction must be in (0, 1), got {}", self.test_fraction)));
        }
        if self.batch_size == 0 {
            return Err(Error::Training("batch_size must be positive".to_string()));
        }
        if self.artifact_suffix.is_empty() {
            return Err(Error::Training(
                "artifact_suffix must be non-empty so candidates never overwrite production artifacts".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0) || self.min_learning_rate < 0.0 {
            return Err(Error::Training("learning rates must be positive".to_string()));
        }
        Ok(())
    }

    /// Set maximum epochs.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of trainable top layers.
    pub fn with_fine_tune_layers(mut self, layers: usize) -> Self {
        self.fine_tune_layers = layers;
        self
    }

    /// Set the classifier strategy.
    pub fn with_classifier(mut self, strategy: ClassifierStrategy) -> Self {
        self.classifier = strategy;
        self
    }

    /// Set the augmentation settings.
    pub fn with_augmentation(mut self, augmentation: AugmentationConfig) -> Self {
        self.augmentation = augmentation;
        self
    }

    /// Start from pretrained backbone weights.
    pub fn with_base_weights(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_weights = Some(path.into());
        self
    }

    /// Set the candidate suffix.
    pub fn with_artifact_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.artifact_suffix = suffix.into();
        self
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Candidate artifact paths under `output_dir`.
    pub fn candidate_artifacts(&self) -> ArtifactSet {
        ArtifactSet::candidate(&self.output_dir, &self.artifact_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults_point_at_production_names() {
        let config = EngineConfig::new().with_model_dir("/srv/models");
        let set = config.artifact_set();
        assert_eq!(set.network(), Path::new("/srv/models/embedding_network.safetensors"));
        assert_eq!(set.scaler(), Path::new("/srv/models/feature_scaler.json"));
        assert_eq!(set.classifier(), Path::new("/srv/models/decision_classifier.json"));
    }

    #[test]
    fn test_training_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.epochs, 30);
        assert_eq!(config.artifact_suffix, "_v2");
        assert_eq!(config.augmentation.rotation_degrees, 30.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        std::fs::write(
            &path,
            r#"{"dataset_dir": "data/train", "epochs": 3, "classifier": {"kind": "random_forest", "n_estimators": 100}}"#,
        )
        .unwrap();

        let config = TrainingConfig::from_json_file(&path).unwrap();
        assert_eq!(config.dataset_dir, PathBuf::from("data/train"));
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.classifier.name(), "random_forest");
    }

    #[test]
    fn test_empty_suffix_is_rejected() {
        let config = TrainingConfig::default().with_artifact_suffix("");
        assert!(config.validate().is_err());
    }
}
