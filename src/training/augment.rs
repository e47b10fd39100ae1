//! Random geometric and photometric augmentation for fine-tuning.
//!
//! Transforms compose rotation, shift, shear and zoom around the image
//! center in (row, col) coordinates, sample bilinearly with edge pixels
//! extended outward, then optionally flip horizontally and scale brightness.

use crate::config::AugmentationConfig;
use crate::contract::FeatureContract;
use crate::error::Result;
use crate::preprocess::CanonicalImage;
use image::{Rgb, RgbImage};
use rand::Rng;

/// 2×3 affine matrix mapping output (row, col) to input (row, col).
type Affine = [[f64; 3]; 2];

/// Draws and applies random transforms.
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    /// Create an augmenter.
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Whether augmentation is active.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// A randomly transformed copy of `image`.
    pub fn augment<R: Rng>(&self, image: &CanonicalImage, contract: &FeatureContract, rng: &mut R) -> Result<CanonicalImage> {
        if !self.config.enabled {
            return Ok(image.clone());
        }
        let src = image.as_rgb();
        let (w, h) = src.dimensions();
        let matrix = self.random_matrix(h as f64, w as f64, rng);
        let mut out = warp(src, &matrix);

        if self.config.horizontal_flip && rng.gen_bool(0.5) {
            image::imageops::flip_horizontal_in_place(&mut out);
        }

        let (lo, hi) = self.config.brightness_range;
        if hi > lo {
            let factor = rng.gen_range(lo..hi);
            for p in out.pixels_mut() {
                for c in p.0.iter_mut() {
                    *c = (*c as f32 * factor).round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        CanonicalImage::from_rgb(out, contract)
    }

    fn random_matrix<R: Rng>(&self, h: f64, w: f64, rng: &mut R) -> Affine {
        let c = &self.config;
        let symmetric = |rng: &mut R, r: f64| if r > 0.0 { rng.gen_range(-r..r) } else { 0.0 };

        let theta = symmetric(rng, c.rotation_degrees as f64).to_radians();
        let tx = symmetric(rng, c.shift_fraction as f64) * h;
        let ty = symmetric(rng, c.shift_fraction as f64) * w;
        let shear = symmetric(rng, c.shear_degrees as f64).to_radians();
        let (zx, zy) = if c.zoom_range > 0.0 {
            let z = c.zoom_range as f64;
            (rng.gen_range(1.0 - z..1.0 + z), rng.gen_range(1.0 - z..1.0 + z))
        } else {
            (1.0, 1.0)
        };

        let rotation = [[theta.cos(), -theta.sin(), 0.0], [theta.sin(), theta.cos(), 0.0], [0.0, 0.0, 1.0]];
        let shift = [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]];
        let shear_m = [[1.0, -shear.sin(), 0.0], [0.0, shear.cos(), 0.0], [0.0, 0.0, 1.0]];
        let zoom = [[zx, 0.0, 0.0], [0.0, zy, 0.0], [0.0, 0.0, 1.0]];
        let transform = matmul(&matmul(&matmul(&rotation, &shift), &shear_m), &zoom);

        let (ox, oy) = (h / 2.0 - 0.5, w / 2.0 - 0.5);
        let offset = [[1.0, 0.0, ox], [0.0, 1.0, oy], [0.0, 0.0, 1.0]];
        let reset = [[1.0, 0.0, -ox], [0.0, 1.0, -oy], [0.0, 0.0, 1.0]];
        let m = matmul(&matmul(&offset, &transform), &reset);
        [m[0], m[1]]
    }
}

fn matmul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Resample `src` through `m`, clamping source coordinates to the border.
///
/// Pixels that map outside the source take the nearest edge pixel. The
/// `imageproc` warps fill those with a constant instead, which would paint
/// black wedges into rotated and shifted training images.
fn warp(src: &RgbImage, m: &Affine) -> RgbImage {
    let (w, h) = src.dimensions();
    let max_r = (h - 1) as f64;
    let max_c = (w - 1) as f64;
    RgbImage::from_fn(w, h, |x, y| {
        let (r, c) = (y as f64, x as f64);
        let sr = (m[0][0] * r + m[0][1] * c + m[0][2]).clamp(0.0, max_r);
        let sc = (m[1][0] * r + m[1][1] * c + m[1][2]).clamp(0.0, max_c);

        let r0 = sr.floor();
        let c0 = sc.floor();
        let fr = sr - r0;
        let fc = sc - c0;
        let (r0, c0) = (r0 as u32, c0 as u32);
        let r1 = (r0 + 1).min(h - 1);
        let c1 = (c0 + 1).min(w - 1);

        let p00 = src.get_pixel(c0, r0).0;
        let p01 = src.get_pixel(c1, r0).0;
        let p10 = src.get_pixel(c0, r1).0;
        let p11 = src.get_pixel(c1, r1).0;
        let mut px = [0u8; 3];
        for ch in 0..3 {
            let top = p00[ch] as f64 * (1.0 - fc) + p01[ch] as f64 * fc;
            let bottom = p10[ch] as f64 * (1.0 - fc) + p11[ch] as f64 * fc;
            px[ch] = (top * (1.0 - fr) + bottom * fr).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient_image() -> CanonicalImage {
        let contract = FeatureContract::current();
        CanonicalImage::from_rgb(
            RgbImage::from_fn(224, 224, |x, y| Rgb([x as u8, y as u8, ((x + y) / 2) as u8])),
            &contract,
        )
        .unwrap()
    }

    #[test]
    fn test_identity_transform_preserves_image() {
        let config = AugmentationConfig {
            enabled: true,
            rotation_degrees: 0.0,
            shift_fraction: 0.0,
            shear_degrees: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
            brightness_range: (1.0, 1.0),
        };
        let img = gradient_image();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = Augmenter::new(config).augment(&img, &FeatureContract::current(), &mut rng).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_disabled_returns_copy() {
        let img = gradient_image();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let out = Augmenter::new(AugmentationConfig::disabled())
            .augment(&img, &FeatureContract::current(), &mut rng)
            .unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn test_default_augmentation_is_seeded_and_keeps_size() {
        let img = gradient_image();
        let aug = Augmenter::new(AugmentationConfig::default());
        let contract = FeatureContract::current();
        let a = aug.augment(&img, &contract, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        let b = aug.augment(&img, &contract, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size(), 224);
        assert_ne!(a, img);
    }

    #[test]
    fn test_out_of_frame_pixels_take_nearest_edge() {
        // Every source pixel is at least 60, so a constant fill would show up.
        let src = RgbImage::from_fn(224, 224, |x, y| Rgb([60 + (x % 100) as u8, 60 + (y % 100) as u8, 200]));
        let theta = 30f64.to_radians();
        let (cx, cy) = (111.5, 111.5);
        // 30° rotation zoomed out by 1.5 about the center: all four corners leave the frame.
        let (a, b) = (1.5 * theta.cos(), 1.5 * theta.sin());
        let m: Affine = [[a, -b, cx - a * cx + b * cy], [b, a, cy - b * cx - a * cy]];
        let out = warp(&src, &m);

        assert!(out.pixels().all(|p| p.0[0] >= 60 && p.0[1] >= 60 && p.0[2] == 200));
        // The top-left output corner maps left of the frame, so it samples
        // the source's first column (red channel 60).
        assert!(m[1][2] < 0.0);
        assert_eq!(out.get_pixel(0, 0).0[0], 60);
    }

    #[test]
    fn test_pure_shift_moves_content() {
        // Shift by +10 rows: output row r samples input row r + 10.
        let m: Affine = [[1.0, 0.0, 10.0], [0.0, 1.0, 0.0]];
        let src = gradient_image();
        let out = warp(src.as_rgb(), &m);
        assert_eq!(out.get_pixel(5, 20).0[1], 30);
        // Past the bottom edge the last row is repeated.
        assert_eq!(out.get_pixel(5, 220).0[1], 223);
    }
}
