//! Retraining pipeline.
//!
//! Loads a folder-per-category dataset, fine-tunes the embedding backbone,
//! re-extracts fused features through the same loader and extractor used at
//! inference, fits the scaler and classifier, evaluates on the held-out split
//! and writes candidate artifacts next to (never over) production ones.
//!
//! # Example
//!
//! ```ignore
//! use mediwaste::training::TrainingPipeline;
//! use mediwaste::TrainingConfig;
//!
//! let config = TrainingConfig::new("dataset", "models").with_epochs(10);
//! let report = TrainingPipeline::new(config).run()?;
//! println!("accuracy: {:.3}", report.classification_report.accuracy);
//! ```

pub mod augment;
pub mod callbacks;
pub mod dataset;
pub mod export;
pub mod fine_tune;
pub mod metrics;
pub mod split;

pub use augment::Augmenter;
pub use callbacks::{EarlyStopping, ReduceLrOnPlateau, StoppingDecision};
pub use dataset::{Dataset, LabeledImage};
pub use export::CandidateExporter;
pub use fine_tune::{fine_tune, ClassificationHead, EpochStats, FineTuneOutcome};
pub use metrics::{ClassificationReport, ConfusionMatrix};
pub use split::{balanced_class_weights, sample_weights, stratified_split, Split};

use crate::category::{Category, NUM_CATEGORIES};
use crate::config::TrainingConfig;
use crate::contract::FeatureContract;
use crate::engine::artifacts::{
    file_digest, write_json, ArtifactHeader, ArtifactSet, ClassifierArtifact, ScalerArtifact,
};
use crate::error::{Error, Result};
use crate::ml::classifier::{argmax, fit_with_fallback, Classifier};
use crate::ml::{load_embedding_network, ClassificationPipeline, FeatureExtractor, StandardScaler};
use crate::preprocess::CanonicalImage;
use chrono::{DateTime, Utc};
use ndarray::{s, Array2};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// What the loader found in the dataset directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    /// Loaded images
    pub total_images: usize,
    /// Images per category label (categories without images omitted)
    pub class_counts: BTreeMap<String, usize>,
    /// Folders that did not name a category
    pub skipped_folders: Vec<String>,
    /// Files that failed to decode
    pub unreadable_files: usize,
}

/// Paths written by a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedArtifacts {
    /// Fine-tuned network
    pub network: PathBuf,
    /// Scaler artifact
    pub scaler: PathBuf,
    /// Classifier artifact
    pub classifier: PathBuf,
    /// This report
    pub report: PathBuf,
}

/// Summary of a completed training run, also written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    /// Run id recorded in the artifact headers
    pub training_run: Uuid,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Dataset statistics
    pub dataset: DatasetSummary,
    /// Training split size
    pub train_size: usize,
    /// Held-out split size
    pub test_size: usize,
    /// Balanced weight per present category label
    pub class_weights: BTreeMap<String, f32>,
    /// Fine-tuning history
    pub fine_tune: FineTuneOutcome,
    /// Fused feature dimension
    pub feature_dim: usize,
    /// Kind of the fitted classifier
    pub classifier: String,
    /// Held-out evaluation
    pub classification_report: ClassificationReport,
    /// Held-out confusion counts
    pub confusion_matrix: ConfusionMatrix,
    /// SHA-256 of the fine-tuned network file
    pub network_sha256: String,
    /// Output locations
    pub artifacts: ExportedArtifacts,
}

/// Runs the full retraining sequence for one configuration.
#[derive(Debug, Clone)]
pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    /// Create a pipeline.
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Where the JSON report is written.
    pub fn report_path(&self) -> PathBuf {
        self.config
            .output_dir
            .join(format!("training_report{}.json", self.config.artifact_suffix))
    }

    /// Run every stage and write candidate artifacts.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, an unusable dataset, candidate paths
    /// that collide with production, and any fitting or I/O failure. Nothing
    /// is exported unless every stage succeeded.
    pub fn run(&self) -> Result<TrainingReport> {
        let config = &self.config;
        config.validate()?;
        let contract = FeatureContract::current();
        let training_run = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!("Starting training run {}", training_run);

        let exporter = CandidateExporter::new(
            config.candidate_artifacts(),
            ArtifactSet::production(&config.output_dir),
        )?;
        std::fs::create_dir_all(&config.output_dir)?;

        // 1. dataset
        let dataset = Dataset::load(&config.dataset_dir, &contract)?;
        let labels = dataset.labels();

        // 2. split
        let split = stratified_split(&labels, config.test_fraction, config.seed);
        if split.test.is_empty() {
            log::warn!("No class has enough images for a held-out split; evaluation will be empty");
        }
        let train_labels: Vec<usize> = split.train.iter().map(|&i| labels[i]).collect();
        let test_labels: Vec<usize> = split.test.iter().map(|&i| labels[i]).collect();
        log::info!("Split: {} train, {} test", train_labels.len(), test_labels.len());

        // 3. class weights
        let class_weights = balanced_class_weights(&train_labels, NUM_CATEGORIES);
        let weight_table: BTreeMap<String, f32> = Category::ALL
            .iter()
            .filter(|c| class_weights[c.index()] > 0.0)
            .map(|c| (c.label().to_string(), class_weights[c.index()]))
            .collect();
        for (label, weight) in &weight_table {
            log::info!("Class weight {}: {:.4}", label, weight);
        }

        // 4. fine-tuning
        let samples = dataset.samples();
        let train_examples: Vec<(&CanonicalImage, usize)> =
            split.train.iter().map(|&i| (&samples[i].image, labels[i])).collect();
        let test_examples: Vec<(&CanonicalImage, usize)> =
            split.test.iter().map(|&i| (&samples[i].image, labels[i])).collect();
        let fine_tune = fine_tune(
            config,
            &contract,
            &train_examples,
            &test_examples,
            &class_weights,
            exporter.network_path(),
        )?;

        // 5. re-extraction through the inference loader
        let network = load_embedding_network(exporter.network_path(), &contract)?;
        let extractor = FeatureExtractor::new(network, contract.clone());
        let images: Vec<&CanonicalImage> = samples.iter().map(|s| &s.image).collect();
        let x_train = extract_rows(&extractor, &images, &split.train, config.batch_size)?;
        let x_test = extract_rows(&extractor, &images, &split.test, config.batch_size)?;
        log::info!("Train features: {:?}, test features: {:?}", x_train.dim(), x_test.dim());

        // 6. scaler + classifier
        let (scaler, x_train_scaled) = StandardScaler::fit_transform(x_train.view())?;
        let weights = sample_weights(&train_labels, &class_weights);
        let fallback = config.fallback_to_forest.then_some(&config.fallback_forest);
        let classifier = fit_with_fallback(
            &config.classifier,
            fallback,
            x_train_scaled.view(),
            &train_labels,
            &weights,
            NUM_CATEGORIES,
        )?;
        let pipeline = ClassificationPipeline::new(scaler, classifier)?;

        let predicted = predict_rows(&pipeline, &x_test)?;
        let classification_report = ClassificationReport::new(&test_labels, &predicted);
        let confusion_matrix = ConfusionMatrix::new(&test_labels, &predicted);
        log::info!("Classification report:\n{}", classification_report);
        log::info!("Confusion matrix:\n{}", confusion_matrix);

        // 7. export
        let network_sha256 = file_digest(exporter.network_path())?;
        let header = ArtifactHeader::new(contract.clone(), contract.fused_dim(), network_sha256.clone(), training_run);
        let scaler_artifact = ScalerArtifact {
            header: header.clone(),
            scaler: pipeline.scaler().clone(),
        };
        let classifier_artifact = ClassifierArtifact {
            header,
            classes: Category::ALL.iter().map(|c| c.label().to_string()).collect(),
            classifier: pipeline.classifier().clone(),
        };
        exporter.write(&scaler_artifact, &classifier_artifact)?;

        let candidate = exporter.candidate();
        let report = TrainingReport {
            training_run,
            started_at,
            finished_at: Utc::now(),
            dataset: summarize(&dataset),
            train_size: split.train.len(),
            test_size: split.test.len(),
            class_weights: weight_table,
            fine_tune,
            feature_dim: contract.fused_dim(),
            classifier: pipeline.classifier().kind_name().to_string(),
            classification_report,
            confusion_matrix,
            network_sha256,
            artifacts: ExportedArtifacts {
                network: candidate.network().to_path_buf(),
                scaler: candidate.scaler().to_path_buf(),
                classifier: candidate.classifier().to_path_buf(),
                report: self.report_path(),
            },
        };
        write_json(&report.artifacts.report, &report)?;
        log::info!(
            "Training run {} finished; candidates are not active until promoted",
            training_run
        );
        Ok(report)
    }
}

/// Fused features of the selected images, in `rows` order.
fn extract_rows(
    extractor: &FeatureExtractor,
    images: &[&CanonicalImage],
    rows: &[usize],
    batch_size: usize,
) -> Result<Array2<f32>> {
    let mut features = Array2::<f32>::zeros((rows.len(), extractor.fused_dim()));
    let batch_size = batch_size.max(1);
    for (chunk_idx, chunk) in rows.chunks(batch_size).enumerate() {
        let owned: Vec<CanonicalImage> = chunk.iter().map(|&i| images[i].clone()).collect();
        let block = extractor.extract_batch(&owned, batch_size)?;
        let start = chunk_idx * batch_size;
        features.slice_mut(s![start..start + chunk.len(), ..]).assign(&block);
        log::debug!("Extracted {}/{} feature rows", start + chunk.len(), rows.len());
    }
    Ok(features)
}

fn predict_rows(pipeline: &ClassificationPipeline, features: &Array2<f32>) -> Result<Vec<usize>> {
    if features.nrows() == 0 {
        return Ok(Vec::new());
    }
    let scaled = pipeline.scaler().transform(features.view())?;
    let proba = pipeline.classifier().predict_proba_batch(scaled.view())?;
    if proba.ncols() != NUM_CATEGORIES {
        return Err(Error::Training(format!(
            "classifier produced {} probabilities per row",
            proba.ncols()
        )));
    }
    Ok(proba.rows().into_iter().map(|row| argmax(&row.to_vec())).collect())
}

fn summarize(dataset: &Dataset) -> DatasetSummary {
    let counts = dataset.class_counts();
    DatasetSummary {
        total_images: dataset.len(),
        class_counts: Category::ALL
            .iter()
            .filter(|c| counts[c.index()] > 0)
            .map(|c| (c.label().to_string(), counts[c.index()]))
            .collect(),
        skipped_folders: dataset.skipped_folders().to_vec(),
        unreadable_files: dataset.unreadable_files(),
    }
}
