//! Shared fixtures: a color-statistics embedding network and a small engine
//! trained on solid-color images.

#![allow(dead_code)]

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use mediwaste::ml::classifier::{ClassifierStrategy, RandomForestParams};
use mediwaste::ml::{ClassificationPipeline, EmbeddingNetwork, FeatureExtractor, StandardScaler};
use mediwaste::preprocess::CanonicalImage;
use mediwaste::{Category, FeatureContract, Result, WasteEngine, NUM_CATEGORIES};
use std::io::Cursor;

/// Minimum confidence (percent) the fixture engine reaches on its own palette.
pub const FIXTURE_CONFIDENCE_THRESHOLD: f32 = 40.0;

/// One representative color per category, in `Category::ALL` order.
pub const PALETTE: [[u8; 3]; NUM_CATEGORIES] = [
    [128, 128, 128], // metal grey
    [60, 140, 40],
    [230, 40, 40],
    [240, 240, 200],
    [20, 20, 20],
    [180, 60, 90],
    [250, 250, 250],
    [120, 200, 240],
    [40, 60, 200],
    [100, 220, 170],
    [240, 180, 40],
    [200, 100, 240],
];

/// Per-channel means spread over the embedding width.
pub struct ColorStatsNetwork {
    dim: usize,
}

impl ColorStatsNetwork {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl EmbeddingNetwork for ColorStatsNetwork {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        let rgb = image.as_rgb();
        let n = (rgb.width() * rgb.height()) as f32;
        let mut means = [0f32; 3];
        for p in rgb.pixels() {
            for c in 0..3 {
                means[c] += p.0[c] as f32;
            }
        }
        for m in &mut means {
            *m /= n * 255.0;
        }
        Ok((0..self.dim)
            .map(|i| means[i % 3] * (1.0 + (i / 3) as f32 * 1e-3))
            .collect())
    }
}

pub fn solid(color: [u8; 3]) -> CanonicalImage {
    let contract = FeatureContract::current();
    CanonicalImage::from_rgb(RgbImage::from_pixel(224, 224, Rgb(color)), &contract).unwrap()
}

/// `color` shifted by `delta` on every channel, saturating.
pub fn jitter(color: [u8; 3], delta: i16) -> [u8; 3] {
    color.map(|c| (c as i16 + delta).clamp(0, 255) as u8)
}

pub fn png_bytes(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

pub fn fixture_extractor() -> FeatureExtractor {
    let contract = FeatureContract::current();
    FeatureExtractor::new(Box::new(ColorStatsNetwork::new(contract.embedding_dim)), contract)
}

/// Scaler + forest fitted on jittered palette images.
pub fn fixture_pipeline(extractor: &FeatureExtractor) -> ClassificationPipeline {
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for category in Category::ALL {
        for delta in [-6, -3, 0, 3, 6] {
            images.push(solid(jitter(PALETTE[category.index()], delta)));
            labels.push(category.index());
        }
    }
    let features = extractor.extract_batch(&images, 16).unwrap();
    let (scaler, scaled) = StandardScaler::fit_transform(features.view()).unwrap();

    let strategy = ClassifierStrategy::RandomForest(RandomForestParams {
        n_estimators: 40,
        max_bins: 64,
        ..RandomForestParams::default()
    });
    let weights = vec![1.0; labels.len()];
    let classifier = strategy.fit(scaled.view(), &labels, &weights, NUM_CATEGORIES).unwrap();
    ClassificationPipeline::new(scaler, classifier).unwrap()
}

pub fn fixture_engine() -> WasteEngine {
    let extractor = fixture_extractor();
    let pipeline = fixture_pipeline(&extractor);
    WasteEngine::from_parts(extractor, pipeline).unwrap()
}
