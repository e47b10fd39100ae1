//! Image normalization shared by inference and training.
//!
//! Every image that reaches either feature branch goes through
//! [`normalize_image`]: RGB conversion (alpha dropped, gray replicated) and an
//! exact resize to the contract's canonical size.

use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use image::{DynamicImage, GrayImage, RgbImage};
use std::path::Path;

/// A decoded, RGB, canonically-sized image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    pixels: RgbImage,
}

impl CanonicalImage {
    /// Wrap an RGB buffer that already has the canonical size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the buffer is not square with
    /// the contract's side length.
    pub fn from_rgb(pixels: RgbImage, contract: &FeatureContract) -> Result<Self> {
        let side = contract.image_size;
        if pixels.width() != side || pixels.height() != side {
            return Err(Error::DimensionMismatch {
                expected: (side * side) as usize,
                found: (pixels.width() * pixels.height()) as usize,
            });
        }
        Ok(Self { pixels })
    }

    /// Image side in pixels.
    pub fn size(&self) -> u32 {
        self.pixels.width()
    }

    /// Underlying RGB buffer.
    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Consume into the underlying RGB buffer.
    pub fn into_rgb(self) -> RgbImage {
        self.pixels
    }

    /// Luma image for the descriptor branch (fixed-point BT.601).
    pub fn to_grayscale(&self) -> GrayImage {
        let (w, h) = self.pixels.dimensions();
        let mut gray = GrayImage::new(w, h);
        for (dst, src) in gray.pixels_mut().zip(self.pixels.pixels()) {
            let [r, g, b] = src.0;
            let y = (4899 * r as u32 + 9617 * g as u32 + 1868 * b as u32 + 8192) >> 14;
            dst.0[0] = y.min(255) as u8;
        }
        gray
    }

    /// Planar `3 × H × W` values in the 0–255 range.
    pub fn to_nchw(&self) -> Vec<f32> {
        let (w, h) = self.pixels.dimensions();
        let plane = (w * h) as usize;
        let mut out = vec![0f32; 3 * plane];
        for (i, p) in self.pixels.pixels().enumerate() {
            out[i] = p.0[0] as f32;
            out[plane + i] = p.0[1] as f32;
            out[2 * plane + i] = p.0[2] as f32;
        }
        out
    }

    /// Interleaved `H × W × 3` values in the 0–255 range.
    pub fn to_nhwc(&self) -> Vec<f32> {
        self.pixels.as_raw().iter().map(|&v| v as f32).collect()
    }
}

/// Decode arbitrary image bytes into a canonical image.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the bytes are not a supported raster format.
pub fn normalize_bytes(bytes: &[u8], contract: &FeatureContract) -> Result<CanonicalImage> {
    if bytes.is_empty() {
        return Err(Error::Decode("empty image payload".to_string()));
    }
    let img = image::load_from_memory(bytes)?;
    normalize_image(&img, contract)
}

/// Convert an already decoded image into a canonical image.
pub fn normalize_image(img: &DynamicImage, contract: &FeatureContract) -> Result<CanonicalImage> {
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::Decode("image has zero area".to_string()));
    }
    let side = contract.image_size;
    let rgb = img.to_rgb8();
    let pixels = if rgb.width() == side && rgb.height() == side {
        rgb
    } else {
        image::imageops::resize(&rgb, side, side, contract.resize_filter.to_image_filter())
    };
    CanonicalImage::from_rgb(pixels, contract)
}

/// Read and normalize an image file.
pub fn load_canonical(path: &Path, contract: &FeatureContract) -> Result<CanonicalImage> {
    let bytes = std::fs::read(path)?;
    normalize_bytes(&bytes, contract)
        .map_err(|e| Error::Decode(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageOutputFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_resizes_to_canonical_size() {
        let contract = FeatureContract::current();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([10, 20, 30])));
        let canon = normalize_bytes(&png_bytes(&img), &contract).unwrap();
        assert_eq!(canon.size(), 224);
        let px = canon.as_rgb().get_pixel(100, 100).0;
        for (got, want) in px.iter().zip([10u8, 20, 30]) {
            assert!(got.abs_diff(want) <= 1, "{:?}", px);
        }
    }

    #[test]
    fn test_alpha_is_dropped_and_channel_order_kept() {
        let contract = FeatureContract::current();
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(224, 224, image::Rgba([200, 0, 50, 3])));
        let canon = normalize_image(&img, &contract).unwrap();
        assert_eq!(canon.as_rgb().get_pixel(0, 0).0, [200, 0, 50]);
        let nchw = canon.to_nchw();
        assert_eq!(nchw[0], 200.0);
        assert_eq!(nchw[224 * 224], 0.0);
        assert_eq!(nchw[2 * 224 * 224], 50.0);
        assert_eq!(&canon.to_nhwc()[..3], &[200.0, 0.0, 50.0]);
    }

    #[test]
    fn test_undecodable_bytes_fail_distinctly() {
        let contract = FeatureContract::current();
        let err = normalize_bytes(b"definitely not an image", &contract).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
        let err = normalize_bytes(&[], &contract).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[test]
    fn test_grayscale_matches_fixed_point_weights() {
        let contract = FeatureContract::current();
        let img = RgbImage::from_pixel(224, 224, Rgb([255, 128, 0]));
        let canon = CanonicalImage::from_rgb(img, &contract).unwrap();
        // (4899*255 + 9617*128 + 8192) >> 14 = 151
        assert_eq!(canon.to_grayscale().get_pixel(5, 5).0[0], 151);

        let white = CanonicalImage::from_rgb(RgbImage::from_pixel(224, 224, Rgb([255, 255, 255])), &contract)
            .unwrap();
        assert_eq!(white.to_grayscale().get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn test_from_rgb_rejects_wrong_size() {
        let contract = FeatureContract::current();
        let err = CanonicalImage::from_rgb(RgbImage::new(10, 10), &contract).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }
}
