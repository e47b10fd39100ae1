//! The feature contract shared by training and inference.
//!
//! Every parameter that shapes the fused feature vector lives here. The
//! training pipeline writes the contract into the scaler and classifier
//! artifacts and the engine refuses to load artifacts whose contract differs
//! from [`FeatureContract::current`].

use serde::{Deserialize, Serialize};

/// Bump whenever any field of [`FeatureContract::current`] changes.
pub const CONTRACT_VERSION: u32 = 1;

/// Channel order of canonical images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    /// Channel 0 is red
    Rgb,
}

/// Interpolation used when resizing to the canonical size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    /// Bicubic (Catmull-Rom, a = -0.5)
    Bicubic,
}

impl ResizeFilter {
    pub(crate) fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            ResizeFilter::Bicubic => image::imageops::FilterType::CatmullRom,
        }
    }
}

/// RGB to luma conversion used by the descriptor branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrayscaleWeights {
    /// Fixed-point BT.601: `(4899 R + 9617 G + 1868 B + 8192) >> 14`
    Bt601FixedPoint,
}

/// Block normalization scheme for the gradient histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockNorm {
    /// L2 norm, clip at 0.2, renormalize
    L2Hys,
}

/// Order of the two branch outputs inside the fused vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionOrder {
    /// `[embedding, descriptor]`
    EmbeddingThenDescriptor,
}

/// Gradient-orientation histogram geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HogParams {
    /// Unsigned orientation bins over [0, 180)
    pub orientations: usize,
    /// Square cell side in pixels
    pub pixels_per_cell: usize,
    /// Square block side in cells
    pub cells_per_block: usize,
    /// Block normalization
    pub block_norm: BlockNorm,
    /// Apply square-root compression before gradients
    pub transform_sqrt: bool,
}

impl HogParams {
    /// Descriptor length for a square image of `image_size` pixels.
    pub fn descriptor_len(&self, image_size: usize) -> usize {
        let cells = image_size / self.pixels_per_cell;
        if cells < self.cells_per_block {
            return 0;
        }
        let blocks = cells - self.cells_per_block + 1;
        blocks * blocks * self.cells_per_block * self.cells_per_block * self.orientations
    }
}

impl Default for HogParams {
    fn default() -> Self {
        Self {
            orientations: 9,
            pixels_per_cell: 16,
            cells_per_block: 2,
            block_norm: BlockNorm::L2Hys,
            transform_sqrt: true,
        }
    }
}

/// Versioned description of how a fused feature vector is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureContract {
    /// Contract version
    pub version: u32,
    /// Canonical square image side
    pub image_size: u32,
    /// Channel order of canonical images
    pub channel_order: ChannelOrder,
    /// Resize interpolation
    pub resize_filter: ResizeFilter,
    /// Luma weights for the descriptor branch
    pub grayscale: GrayscaleWeights,
    /// Descriptor geometry
    pub hog: HogParams,
    /// Length of the pooled embedding
    pub embedding_dim: usize,
    /// Name of the layer the network is truncated at
    pub pooling_layer: String,
    /// Concatenation order
    pub fusion_order: FusionOrder,
}

impl FeatureContract {
    /// The contract compiled into this build.
    pub fn current() -> Self {
        Self {
            version: CONTRACT_VERSION,
            image_size: 224,
            channel_order: ChannelOrder::Rgb,
            resize_filter: ResizeFilter::Bicubic,
            grayscale: GrayscaleWeights::Bt601FixedPoint,
            hog: HogParams::default(),
            embedding_dim: 1280,
            pooling_layer: "avg_pool".to_string(),
            fusion_order: FusionOrder::EmbeddingThenDescriptor,
        }
    }

    /// D_g, the descriptor length.
    pub fn descriptor_dim(&self) -> usize {
        self.hog.descriptor_len(self.image_size as usize)
    }

    /// D = D_n + D_g.
    pub fn fused_dim(&self) -> usize {
        self.embedding_dim + self.descriptor_dim()
    }

    /// Describe the first field that differs from `other`, if any.
    pub fn diff(&self, other: &FeatureContract) -> Option<String> {
        if self == other {
            return None;
        }
        let reason = if self.version != other.version {
            format!("version {} vs {}", self.version, other.version)
        } else if self.image_size != other.image_size {
            format!("image size {} vs {}", self.image_size, other.image_size)
        } else if self.hog != other.hog {
            format!("descriptor geometry {:?} vs {:?}", self.hog, other.hog)
        } else if self.embedding_dim != other.embedding_dim {
            format!("embedding dim {} vs {}", self.embedding_dim, other.embedding_dim)
        } else if self.pooling_layer != other.pooling_layer {
            format!("pooling layer {} vs {}", self.pooling_layer, other.pooling_layer)
        } else {
            "preprocessing parameters differ".to_string()
        };
        Some(reason)
    }
}

impl Default for FeatureContract {
    fn default() -> Self {
        Self::current()
    }
}
