//! Feature fusion for the decision classifier.
//!
//! This module runs both branches on the same canonical image and
//! concatenates their outputs: embedding first, descriptor second. The order
//! is part of the trained-model contract; a swapped vector has the right
//! length and silently wrong semantics.

use crate::contract::{FeatureContract, FusionOrder};
use crate::error::{Error, Result};
use crate::ml::embedding::EmbeddingNetwork;
use crate::ml::hog::HogDescriptor;
use crate::preprocess::CanonicalImage;
use ndarray::Array2;
use rayon::prelude::*;
use std::sync::Mutex;

/// Concatenate the two branch outputs in contract order.
pub fn fuse(embedding: &[f32], descriptor: &[f32]) -> Vec<f32> {
    let mut fused = Vec::with_capacity(embedding.len() + descriptor.len());
    fused.extend_from_slice(embedding);
    fused.extend_from_slice(descriptor);
    fused
}

/// Extracts fused feature vectors from canonical images.
///
/// # Example
///
/// ```ignore
/// use mediwaste::ml::FeatureExtractor;
///
/// let extractor = FeatureExtractor::new(network, FeatureContract::current());
/// let fused = extractor.extract(&canonical)?;
/// assert_eq!(fused.len(), 7364);
/// ```
pub struct FeatureExtractor {
    network: Box<dyn EmbeddingNetwork>,
    hog: HogDescriptor,
    contract: FeatureContract,
    neural_gate: Option<Mutex<()>>,
}

impl FeatureExtractor {
    /// Create an extractor over `network` with the contract's descriptor geometry.
    pub fn new(network: Box<dyn EmbeddingNetwork>, contract: FeatureContract) -> Self {
        Self {
            network,
            hog: HogDescriptor::new(contract.hog),
            contract,
            neural_gate: None,
        }
    }

    /// Serialize calls into the neural branch behind a mutex.
    ///
    /// Only needed for runtimes that are unsafe under concurrent reads; the
    /// descriptor branch always runs unsynchronized.
    pub fn with_serialized_network(mut self, enable: bool) -> Self {
        self.neural_gate = enable.then(|| Mutex::new(()));
        self
    }

    /// Contract the extractor was built with.
    pub fn contract(&self) -> &FeatureContract {
        &self.contract
    }

    /// D = D_n + D_g.
    pub fn fused_dim(&self) -> usize {
        self.contract.fused_dim()
    }

    /// Neural branch output for one image, length-checked.
    pub fn embedding(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        let embedding = match &self.neural_gate {
            Some(gate) => {
                let _guard = gate.lock().map_err(|_| Error::Ml("neural branch lock poisoned".to_string()))?;
                self.network.embed(image)?
            },
            None => self.network.embed(image)?,
        };
        check_len(self.contract.embedding_dim, embedding.len())?;
        Ok(embedding)
    }

    /// Descriptor branch output for one image, length-checked.
    pub fn descriptor(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        let descriptor = self.hog.compute(&image.to_grayscale());
        check_len(self.contract.descriptor_dim(), descriptor.len())?;
        Ok(descriptor)
    }

    /// Fused feature vector for one image.
    pub fn extract(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        let embedding = self.embedding(image)?;
        let descriptor = self.descriptor(image)?;
        let fused = match self.contract.fusion_order {
            FusionOrder::EmbeddingThenDescriptor => fuse(&embedding, &descriptor),
        };
        check_len(self.fused_dim(), fused.len())?;
        Ok(fused)
    }

    /// Fused features for many images, one row per image.
    ///
    /// The neural branch runs in chunks of `batch_size`; descriptors are
    /// computed in parallel.
    pub fn extract_batch(&self, images: &[CanonicalImage], batch_size: usize) -> Result<Array2<f32>> {
        let dim = self.fused_dim();
        let mut features = Array2::<f32>::zeros((images.len(), dim));
        let d_n = self.contract.embedding_dim;

        let descriptors: Vec<Vec<f32>> = images
            .par_iter()
            .map(|img| self.descriptor(img))
            .collect::<Result<_>>()?;

        let batch_size = batch_size.max(1);
        let total = images.len();
        for (chunk_idx, chunk) in images.chunks(batch_size).enumerate() {
            let embeddings = match &self.neural_gate {
                Some(gate) => {
                    let _guard = gate.lock().map_err(|_| Error::Ml("neural branch lock poisoned".to_string()))?;
                    self.network.embed_batch(chunk)?
                },
                None => self.network.embed_batch(chunk)?,
            };
            if embeddings.len() != chunk.len() {
                return Err(Error::Ml(format!(
                    "network returned {} embeddings for {} images",
                    embeddings.len(),
                    chunk.len()
                )));
            }
            for (offset, embedding) in embeddings.iter().enumerate() {
                check_len(d_n, embedding.len())?;
                let row_idx = chunk_idx * batch_size + offset;
                let mut row = features.row_mut(row_idx);
                for (dst, src) in row.iter_mut().zip(embedding.iter().chain(descriptors[row_idx].iter())) {
                    *dst = *src;
                }
            }
            log::debug!("Extracted features for {}/{} images", (chunk_idx * batch_size + chunk.len()), total);
        }

        Ok(features)
    }
}

fn check_len(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(Error::DimensionMismatch { expected, found });
    }
    Ok(())
}
