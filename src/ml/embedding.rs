//! Neural embedding branch.
//!
//! An [`EmbeddingNetwork`] maps a canonical image to the pooled output of a
//! convolutional network. Two artifact formats are supported:
//!
//! - `.safetensors`: the trainable [`ConvBackbone`](crate::ml::ConvBackbone),
//!   produced by the training pipeline
//! - `.onnx`: an externally exported graph, truncated at the pooling layer

use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use crate::ml::backbone::ConvBackbone;
use crate::ml::model_loader::OnnxModel;
use crate::preprocess::CanonicalImage;
use std::path::Path;

/// A network truncated at its global-pooling layer.
///
/// Implementations must be deterministic: the same image and weights always
/// produce the same embedding.
pub trait EmbeddingNetwork: Send + Sync {
    /// Length of every embedding produced.
    fn embedding_dim(&self) -> usize;

    /// Embed one image.
    fn embed(&self, image: &CanonicalImage) -> Result<Vec<f32>>;

    /// Embed several images; the default runs them one at a time.
    fn embed_batch(&self, images: &[CanonicalImage]) -> Result<Vec<Vec<f32>>> {
        images.iter().map(|img| self.embed(img)).collect()
    }
}

/// ONNX graph cut at the contract's pooling layer.
///
/// The graph takes NHWC input with values in the 0–255 range; any rescaling
/// is expected to be part of the exported graph.
#[derive(Debug)]
pub struct OnnxEmbeddingNetwork {
    model: OnnxModel,
    image_size: usize,
    embedding_dim: usize,
}

impl OnnxEmbeddingNetwork {
    /// Load and truncate the graph at `path`.
    pub fn load(path: &Path, contract: &FeatureContract) -> Result<Self> {
        let side = contract.image_size as usize;
        let model = OnnxModel::load_truncated(path, &[1, side, side, 3], &contract.pooling_layer)?;
        log::debug!(
            "ONNX embedding network inputs {:?}, outputs {:?}",
            model.input_names(),
            model.output_names()
        );
        Ok(Self {
            model,
            image_size: side,
            embedding_dim: contract.embedding_dim,
        })
    }
}

impl EmbeddingNetwork for OnnxEmbeddingNetwork {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn embed(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        let side = self.image_size;
        self.model.run_f32(&[1, side, side, 3], &image.to_nhwc())
    }
}

/// Load an embedding network artifact, choosing the runtime by extension.
pub fn load_embedding_network(path: &Path, contract: &FeatureContract) -> Result<Box<dyn EmbeddingNetwork>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "safetensors" => Ok(Box::new(ConvBackbone::load(path, contract)?)),
        "onnx" => Ok(Box::new(OnnxEmbeddingNetwork::load(path, contract)?)),
        other => Err(Error::artifact(
            path,
            format!("unsupported network format '{}' (expected .safetensors or .onnx)", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension_is_rejected() {
        let contract = FeatureContract::current();
        let err = load_embedding_network(Path::new("model.keras"), &contract).err().unwrap();
        assert!(err.to_string().contains("keras"));
        assert_eq!(err.kind(), crate::error::ErrorKind::ArtifactLoad);
    }

    #[test]
    fn test_missing_onnx_is_artifact_error() {
        let contract = FeatureContract::current();
        let err = load_embedding_network(Path::new("missing.onnx"), &contract).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ArtifactLoad);
    }
}
