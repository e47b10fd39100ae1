//! Gradient-orientation histogram descriptor.
//!
//! Computes the classic HOG descriptor over a grayscale image:
//! square-root compression, central-difference gradients, unsigned
//! orientation histograms per cell, and L2-Hys normalized overlapping blocks.

use crate::contract::{BlockNorm, HogParams};
use image::GrayImage;

const L2_HYS_CLIP: f64 = 0.2;
const NORM_EPS: f64 = 1e-5;

/// HOG descriptor with fixed geometry.
///
/// # Example
///
/// ```ignore
/// use mediwaste::ml::HogDescriptor;
///
/// let hog = HogDescriptor::new(HogParams::default());
/// let values = hog.compute(&canonical.to_grayscale());
/// assert_eq!(values.len(), 6084);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HogDescriptor {
    params: HogParams,
}

impl HogDescriptor {
    /// Create a descriptor for the given geometry.
    pub fn new(params: HogParams) -> Self {
        Self { params }
    }

    /// Geometry in use.
    pub fn params(&self) -> &HogParams {
        &self.params
    }

    /// Output length for a `width × height` image.
    pub fn output_len(&self, width: usize, height: usize) -> usize {
        let p = &self.params;
        let cells_x = width / p.pixels_per_cell;
        let cells_y = height / p.pixels_per_cell;
        if cells_x < p.cells_per_block || cells_y < p.cells_per_block {
            return 0;
        }
        let blocks_x = cells_x - p.cells_per_block + 1;
        let blocks_y = cells_y - p.cells_per_block + 1;
        blocks_x * blocks_y * p.cells_per_block * p.cells_per_block * p.orientations
    }

    /// Compute the raveled descriptor.
    ///
    /// Output order is (block_row, block_col, cell_row, cell_col, orientation).
    pub fn compute(&self, gray: &GrayImage) -> Vec<f32> {
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let out_len = self.output_len(width, height);
        if out_len == 0 {
            return Vec::new();
        }

        let histogram = self.cell_histograms(gray);
        self.normalize_blocks(&histogram, width, height, out_len)
    }

    /// Orientation histograms, laid out as `[cell_row][cell_col][bin]`.
    fn cell_histograms(&self, gray: &GrayImage) -> Vec<f64> {
        let p = &self.params;
        let width = gray.width() as usize;
        let height = gray.height() as usize;

        let image: Vec<f64> = gray
            .as_raw()
            .iter()
            .map(|&v| {
                let v = v as f64;
                if p.transform_sqrt {
                    v.sqrt()
                } else {
                    v
                }
            })
            .collect();

        let cells_x = width / p.pixels_per_cell;
        let cells_y = height / p.pixels_per_cell;
        let bin_width = 180.0 / p.orientations as f64;
        let cell_area = (p.pixels_per_cell * p.pixels_per_cell) as f64;
        let mut histogram = vec![0f64; cells_y * cells_x * p.orientations];

        // Pixels past the last full cell never contribute.
        for y in 0..cells_y * p.pixels_per_cell {
            for x in 0..cells_x * p.pixels_per_cell {
                let g_row = if y == 0 || y == height - 1 {
                    0.0
                } else {
                    image[(y + 1) * width + x] - image[(y - 1) * width + x]
                };
                let g_col = if x == 0 || x == width - 1 {
                    0.0
                } else {
                    image[y * width + x + 1] - image[y * width + x - 1]
                };

                let magnitude = g_row.hypot(g_col);
                if magnitude == 0.0 {
                    continue;
                }
                let orientation = g_row.atan2(g_col).to_degrees().rem_euclid(180.0);
                let bin = ((orientation / bin_width) as usize).min(p.orientations - 1);

                let cell = (y / p.pixels_per_cell) * cells_x + x / p.pixels_per_cell;
                histogram[cell * p.orientations + bin] += magnitude;
            }
        }

        for v in &mut histogram {
            *v /= cell_area;
        }
        histogram
    }

    fn normalize_blocks(&self, histogram: &[f64], width: usize, height: usize, out_len: usize) -> Vec<f32> {
        let p = &self.params;
        let cells_x = width / p.pixels_per_cell;
        let cells_y = height / p.pixels_per_cell;
        let blocks_x = cells_x - p.cells_per_block + 1;
        let blocks_y = cells_y - p.cells_per_block + 1;
        let block_len = p.cells_per_block * p.cells_per_block * p.orientations;

        let mut out = Vec::with_capacity(out_len);
        let mut block = vec![0f64; block_len];

        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                let mut k = 0;
                for cy in 0..p.cells_per_block {
                    for cx in 0..p.cells_per_block {
                        let cell = (by + cy) * cells_x + bx + cx;
                        let start = cell * p.orientations;
                        block[k..k + p.orientations].copy_from_slice(&histogram[start..start + p.orientations]);
                        k += p.orientations;
                    }
                }
                match p.block_norm {
                    BlockNorm::L2Hys => l2_hys(&mut block),
                }
                out.extend(block.iter().map(|&v| v as f32));
            }
        }
        out
    }
}

fn l2_hys(block: &mut [f64]) {
    let eps_sq = NORM_EPS * NORM_EPS;
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + eps_sq).sqrt();
    for v in block.iter_mut() {
        *v = (*v / norm).min(L2_HYS_CLIP);
    }
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + eps_sq).sqrt();
    for v in block.iter_mut() {
        *v /= norm;
    }
}
