// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::type_complexity)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # Mediwaste
//!
//! Hybrid waste-image classifier: a convolutional embedding and a
//! gradient-orientation histogram are fused into one feature vector, which a
//! standardized tree ensemble maps to one of twelve waste categories.
//!
//! ## Core Features
//!
//! - **Canonical preprocessing**: one normalization path shared by training
//!   and inference (RGB, 224×224 bicubic)
//! - **Two feature branches**: candle backbone or truncated ONNX graph
//!   (1280 values) plus HOG (6084 values), fused to 7364
//! - **Versioned feature contract**: recorded in every artifact and checked
//!   at load time together with dimensions, class list and network digest
//! - **Tree ensembles**: histogram gradient boosting with a random-forest
//!   fallback, class-weighted
//! - **Lifecycle management**: lazy single-flight loading with explicit
//!   `Uninitialized / Ready / Failed` states
//! - **Retraining**: dataset loading, stratified split, fine-tuning with
//!   augmentation, feature re-extraction, evaluation and candidate export
//!
//! ## Quick Start
//!
//! ```ignore
//! use mediwaste::{EngineConfig, ModelManager};
//!
//! let manager = ModelManager::new(EngineConfig::new().with_model_dir("models"));
//! manager.load()?;
//!
//! let prediction = manager.predict(&std::fs::read("item.jpg")?)?;
//! let disposal = prediction.disposal();
//! println!("{} -> {} ({})", prediction.label, disposal.bin, disposal.hazard_status);
//! ```
//!
//! ## Retraining
//!
//! ```ignore
//! use mediwaste::training::TrainingPipeline;
//! use mediwaste::TrainingConfig;
//!
//! let report = TrainingPipeline::new(TrainingConfig::new("dataset", "models")).run()?;
//! println!("{}", report.classification_report);
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Categories and the feature contract
pub mod category;
pub mod contract;

// Configuration
pub mod config;

// Image normalization
pub mod preprocess;

// Feature branches, fusion, scaler and classifier
pub mod ml;

// Inference engine and artifact lifecycle
pub mod engine;

// Retraining pipeline
pub mod training;

// Re-exports
pub use category::{disposal_for_label, Category, DisposalInfo, NUM_CATEGORIES};
pub use config::{EngineConfig, TrainingConfig};
pub use contract::FeatureContract;
pub use engine::{EngineStatus, ModelManager, Prediction, WasteEngine};
pub use error::{Error, ErrorKind, Result};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
