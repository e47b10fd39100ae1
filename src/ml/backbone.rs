//! Trainable convolutional backbone (candle).
//!
//! A stack of strided 3×3 convolutions with ReLU, a 1×1 projection to the
//! embedding width, and global average pooling (`avg_pool`). The weights live
//! under the `backbone.` prefix of a safetensors file; the fine-tuning head is
//! stored next to them under `head.` and is ignored at inference.

use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use crate::ml::embedding::EmbeddingNetwork;
use crate::preprocess::CanonicalImage;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, VarBuilder, VarMap};
use std::path::Path;

/// Tensor-name prefix of backbone weights.
pub const BACKBONE_PREFIX: &str = "backbone";

/// One convolution in the backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    /// Layer name, also the safetensors scope
    pub name: &'static str,
    /// Output channels (0 = embedding width)
    pub out_channels: usize,
    /// Square kernel side
    pub kernel: usize,
    /// Stride
    pub stride: usize,
}

/// Backbone layers, input to output.
pub const LAYERS: [LayerSpec; 7] = [
    LayerSpec { name: "stem", out_channels: 32, kernel: 3, stride: 2 },
    LayerSpec { name: "block1", out_channels: 48, kernel: 3, stride: 2 },
    LayerSpec { name: "block2", out_channels: 64, kernel: 3, stride: 2 },
    LayerSpec { name: "block3", out_channels: 128, kernel: 3, stride: 2 },
    LayerSpec { name: "block4", out_channels: 160, kernel: 3, stride: 1 },
    LayerSpec { name: "block5", out_channels: 256, kernel: 3, stride: 2 },
    LayerSpec { name: "top_conv", out_channels: 0, kernel: 1, stride: 1 },
];

#[derive(Debug)]
struct ConvLayer {
    conv: Conv2d,
}

/// Convolutional embedding network truncated at `avg_pool`.
#[derive(Debug)]
pub struct ConvBackbone {
    layers: Vec<ConvLayer>,
    embedding_dim: usize,
    image_size: usize,
    device: Device,
}

impl ConvBackbone {
    /// Build the backbone from a var builder already scoped to [`BACKBONE_PREFIX`].
    pub fn new(vb: VarBuilder, contract: &FeatureContract) -> candle_core::Result<Self> {
        let device = vb.device().clone();
        let mut layers = Vec::with_capacity(LAYERS.len());
        let mut in_channels = 3;
        for spec in LAYERS {
            let out_channels = if spec.out_channels == 0 {
                contract.embedding_dim
            } else {
                spec.out_channels
            };
            let cfg = Conv2dConfig {
                padding: spec.kernel / 2,
                stride: spec.stride,
                ..Default::default()
            };
            let conv = conv2d(in_channels, out_channels, spec.kernel, cfg, vb.pp(spec.name))?;
            layers.push(ConvLayer { conv });
            in_channels = out_channels;
        }
        Ok(Self {
            layers,
            embedding_dim: contract.embedding_dim,
            image_size: contract.image_size as usize,
            device,
        })
    }

    /// Freshly initialized backbone registered in `varmap`.
    pub fn init(varmap: &VarMap, contract: &FeatureContract, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Ok(Self::new(vb.pp(BACKBONE_PREFIX), contract)?)
    }

    /// Load backbone weights from a safetensors artifact.
    pub fn load(path: &Path, contract: &FeatureContract) -> Result<Self> {
        if !path.exists() {
            return Err(Error::artifact(path, "model file not found"));
        }
        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(path, &device)
            .map_err(|e| Error::artifact(path, format!("invalid safetensors file: {}", e)))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        Self::new(vb.pp(BACKBONE_PREFIX), contract)
            .map_err(|e| Error::artifact(path, format!("weights do not match the backbone layout: {}", e)))
    }

    /// Layer names, input to output.
    pub fn layer_names() -> Vec<&'static str> {
        LAYERS.iter().map(|l| l.name).collect()
    }

    /// Variable-name prefixes of the top `n` layers.
    pub fn top_layer_prefixes(n: usize) -> Vec<String> {
        let n = n.min(LAYERS.len());
        LAYERS[LAYERS.len() - n..]
            .iter()
            .map(|l| format!("{}.{}.", BACKBONE_PREFIX, l.name))
            .collect()
    }

    /// Device the weights live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run the network up to `avg_pool` on an `N × 3 × H × W` batch (0–255 values).
    ///
    /// Gradients are cut below the first `frozen_layers` layers; inference
    /// passes 0.
    pub fn forward_pooled(&self, xs: &Tensor, frozen_layers: usize) -> candle_core::Result<Tensor> {
        let mut xs = xs.affine(1.0 / 127.5, -1.0)?;
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 && i == frozen_layers {
                xs = xs.detach();
            }
            xs = layer.conv.forward(&xs)?.relu()?;
        }
        if frozen_layers >= self.layers.len() {
            xs = xs.detach();
        }
        // avg_pool
        xs.mean(3)?.mean(2)
    }

    /// Stack canonical images into an `N × 3 × H × W` tensor.
    pub fn batch_tensor(&self, images: &[&CanonicalImage]) -> candle_core::Result<Tensor> {
        let side = self.image_size;
        let mut data = Vec::with_capacity(images.len() * 3 * side * side);
        for img in images {
            data.extend(img.to_nchw());
        }
        Tensor::from_vec(data, (images.len(), 3, side, side), &self.device)
    }

    fn embed_refs(&self, images: &[&CanonicalImage]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.batch_tensor(images)?;
        let pooled = self.forward_pooled(&batch, 0)?;
        Ok(pooled.to_vec2::<f32>()?)
    }
}

impl EmbeddingNetwork for ConvBackbone {
    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn embed(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        self.embed_refs(&[image])?
            .pop()
            .ok_or_else(|| Error::Ml("backbone returned an empty batch".to_string()))
    }

    fn embed_batch(&self, images: &[CanonicalImage]) -> Result<Vec<Vec<f32>>> {
        let refs: Vec<&CanonicalImage> = images.iter().collect();
        self.embed_refs(&refs)
    }
}
