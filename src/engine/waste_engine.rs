//! Loaded inference engine: feature extractor plus classification pipeline.

use crate::category::{Category, DisposalInfo, NUM_CATEGORIES};
use crate::config::EngineConfig;
use crate::contract::FeatureContract;
use crate::engine::artifacts::{file_digest, read_json, ArtifactSet, ClassifierArtifact, ScalerArtifact};
use crate::error::{Error, Result};
use crate::ml::classifier::Classifier;
use crate::ml::embedding::load_embedding_network;
use crate::ml::feature_extractor::FeatureExtractor;
use crate::ml::pipeline::ClassificationPipeline;
use crate::preprocess::{normalize_bytes, CanonicalImage};
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::path::Path;

/// Result of classifying one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Winning category
    pub category: Category,
    /// Display label of the category
    pub label: String,
    /// Index of the category in the fixed ordering
    pub class_index: usize,
    /// Top probability as a percentage, two decimals
    pub confidence: f32,
    /// Whether the category is one of the hazardous ones
    pub hazardous: bool,
    /// Length of the fused vector the classifier saw
    pub fused_vector_dimension: usize,
}

impl Prediction {
    /// Disposal instructions for the predicted category.
    pub fn disposal(&self) -> DisposalInfo {
        self.category.disposal()
    }
}

/// Immutable inference engine.
///
/// # Example
///
/// ```ignore
/// use mediwaste::{EngineConfig, WasteEngine};
///
/// let engine = WasteEngine::load(&EngineConfig::new().with_model_dir("models"))?;
/// let prediction = engine.predict(&std::fs::read("syringe.jpg")?)?;
/// println!("{} ({:.2}%)", prediction.label, prediction.confidence);
/// ```
pub struct WasteEngine {
    extractor: FeatureExtractor,
    pipeline: ClassificationPipeline,
    network_sha256: Option<String>,
}

impl std::fmt::Debug for WasteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasteEngine")
            .field("contract", self.extractor.contract())
            .field("fused_dim", &self.pipeline.dim())
            .field("classifier", &self.pipeline.classifier().kind_name())
            .field("network_sha256", &self.network_sha256)
            .finish()
    }
}

impl WasteEngine {
    /// Load the artifact set named by `config`.
    pub fn load(config: &EngineConfig) -> Result<Self> {
        Self::load_artifacts(&config.artifact_set(), config.serialize_neural_branch)
    }

    /// Load and cross-check an artifact set.
    ///
    /// # Errors
    ///
    /// Checks run in this order and the first failure is returned:
    /// - [`Error::MissingArtifacts`] naming every absent file
    /// - the network fails to load, or its embedding width is wrong
    /// - [`Error::ContractMismatch`] if either JSON artifact was fitted under
    ///   another feature contract
    /// - dimensionality, class list or network digest disagreement
    pub fn load_artifacts(set: &ArtifactSet, serialize_neural_branch: bool) -> Result<Self> {
        let missing = set.missing();
        if !missing.is_empty() {
            return Err(Error::MissingArtifacts(missing));
        }
        let contract = FeatureContract::current();

        log::info!("Loading embedding network from {}", set.network().display());
        let network = load_embedding_network(set.network(), &contract)?;
        let extractor = FeatureExtractor::new(network, contract.clone()).with_serialized_network(serialize_neural_branch);
        probe_network(&extractor, set.network())?;

        let scaler: ScalerArtifact = read_json(set.scaler())?;
        let classifier: ClassifierArtifact = read_json(set.classifier())?;
        check_contract(set.scaler(), &scaler.header.contract, &contract)?;
        check_contract(set.classifier(), &classifier.header.contract, &contract)?;

        let fused_dim = contract.fused_dim();
        for (path, dim) in [
            (set.scaler(), scaler.scaler.dim()),
            (set.scaler(), scaler.header.feature_dim),
            (set.classifier(), classifier.classifier.n_features()),
            (set.classifier(), classifier.header.feature_dim),
        ] {
            if dim != fused_dim {
                return Err(Error::artifact(
                    path,
                    format!("fitted on {} features, contract requires {}", dim, fused_dim),
                ));
            }
        }

        let expected: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
        if classifier.classes != expected || classifier.classifier.n_classes() != NUM_CATEGORIES {
            return Err(Error::artifact(
                set.classifier(),
                format!("class list {:?} does not match the category set", classifier.classes),
            ));
        }
        classifier
            .classifier
            .validate()
            .map_err(|e| Error::artifact(set.classifier(), e.to_string()))?;

        let digest = file_digest(set.network())?;
        for (path, recorded) in [
            (set.scaler(), &scaler.header.network_sha256),
            (set.classifier(), &classifier.header.network_sha256),
        ] {
            if *recorded != digest {
                return Err(Error::artifact(
                    path,
                    format!(
                        "fitted on features from network {} but {} has digest {}",
                        recorded,
                        set.network().display(),
                        digest
                    ),
                ));
            }
        }

        let pipeline = ClassificationPipeline::new(scaler.scaler, classifier.classifier)?;
        log::info!(
            "Engine ready: {} classifier over {} features (run {})",
            pipeline.classifier().kind_name(),
            pipeline.dim(),
            classifier.header.training_run
        );
        Ok(Self {
            extractor,
            pipeline,
            network_sha256: Some(digest),
        })
    }

    /// Assemble an engine from in-memory parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the pipeline was not fitted on
    /// the extractor's fused dimensionality.
    pub fn from_parts(extractor: FeatureExtractor, pipeline: ClassificationPipeline) -> Result<Self> {
        if extractor.fused_dim() != pipeline.dim() {
            return Err(Error::DimensionMismatch {
                expected: extractor.fused_dim(),
                found: pipeline.dim(),
            });
        }
        Ok(Self {
            extractor,
            pipeline,
            network_sha256: None,
        })
    }

    /// Feature contract in force.
    pub fn contract(&self) -> &FeatureContract {
        self.extractor.contract()
    }

    /// Fused dimensionality.
    pub fn fused_dim(&self) -> usize {
        self.pipeline.dim()
    }

    /// Digest of the loaded network file, if loaded from disk.
    pub fn network_sha256(&self) -> Option<&str> {
        self.network_sha256.as_deref()
    }

    /// Feature extractor.
    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    /// Classify encoded image bytes.
    pub fn predict(&self, bytes: &[u8]) -> Result<Prediction> {
        let image = normalize_bytes(bytes, self.contract())?;
        self.predict_image(&image)
    }

    /// Classify an already normalized image.
    pub fn predict_image(&self, image: &CanonicalImage) -> Result<Prediction> {
        let fused = self.extractor.extract(image)?;
        self.predict_fused(&fused)
    }

    /// Classify a fused feature vector.
    pub fn predict_fused(&self, fused: &[f32]) -> Result<Prediction> {
        let out = self.pipeline.predict(fused)?;
        log::debug!("Predicted {} ({:.2}%)", out.category, out.confidence);
        Ok(Prediction {
            category: out.category,
            label: out.category.label().to_string(),
            class_index: out.class_index,
            confidence: out.confidence,
            hazardous: out.category.is_hazardous(),
            fused_vector_dimension: fused.len(),
        })
    }
}

fn probe_network(extractor: &FeatureExtractor, path: &Path) -> Result<()> {
    let contract = extractor.contract();
    let side = contract.image_size;
    let blank = CanonicalImage::from_rgb(RgbImage::from_pixel(side, side, Rgb([0, 0, 0])), contract)?;
    match extractor.embedding(&blank) {
        Ok(_) => Ok(()),
        Err(Error::DimensionMismatch { expected, found }) => Err(Error::artifact(
            path,
            format!("network embeds to {} values, contract requires {}", found, expected),
        )),
        Err(e) => Err(Error::artifact(path, format!("network failed on a probe image: {}", e))),
    }
}

fn check_contract(path: &Path, recorded: &FeatureContract, current: &FeatureContract) -> Result<()> {
    match recorded.diff(current) {
        None => Ok(()),
        Some(reason) => Err(Error::ContractMismatch {
            artifact: path.display().to_string(),
            reason,
        }),
    }
}
