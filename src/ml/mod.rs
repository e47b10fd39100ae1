//! Machine learning components of the hybrid classifier.
//!
//! This module provides:
//! - The neural embedding branch (candle backbone or truncated ONNX graph)
//! - The gradient-orientation histogram branch
//! - Feature fusion, standardization and the tree-ensemble classifier
//!
//! # Architecture
//!
//! - candle for the trainable backbone, tract-onnx for exported graphs
//! - CPU-only inference; both runtimes are read-only after loading
//! - Tree ensembles are implemented in-crate over histogram-binned features
//!
//! # Example
//!
//! ```ignore
//! use mediwaste::ml::{load_embedding_network, FeatureExtractor};
//!
//! let network = load_embedding_network(Path::new("models/embedding_network.safetensors"), &contract)?;
//! let extractor = FeatureExtractor::new(network, contract);
//! let fused = extractor.extract(&canonical)?;
//! ```

pub mod backbone;
pub mod classifier;
pub mod embedding;
pub mod feature_extractor;
pub mod hog;
pub mod model_loader;
pub mod pipeline;
pub mod scaler;

pub use backbone::ConvBackbone;
pub use classifier::{Classifier, ClassifierStrategy, TrainedClassifier};
pub use embedding::{load_embedding_network, EmbeddingNetwork, OnnxEmbeddingNetwork};
pub use feature_extractor::{fuse, FeatureExtractor};
pub use hog::HogDescriptor;
pub use model_loader::OnnxModel;
pub use pipeline::{ClassificationPipeline, PipelineOutput};
pub use scaler::StandardScaler;
