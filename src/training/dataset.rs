//! Labeled image dataset loaded from a folder-per-category layout.

use crate::category::{Category, NUM_CATEGORIES};
use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use crate::preprocess::{load_canonical, CanonicalImage};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum/minimum class-count ratio above which imbalance is reported.
pub const IMBALANCE_WARNING_RATIO: f64 = 3.0;

/// One decoded training image.
#[derive(Debug, Clone)]
pub struct LabeledImage {
    /// Source file
    pub path: PathBuf,
    /// Category of the containing folder
    pub category: Category,
    /// Normalized image
    pub image: CanonicalImage,
}

/// All images found under a dataset root.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<LabeledImage>,
    skipped_folders: Vec<String>,
    unreadable_files: usize,
}

impl Dataset {
    /// Load every decodable image under `root/<category folder>/`.
    ///
    /// Folder names match category labels case-insensitively after trimming.
    /// Unrecognized or unreadable folders are skipped with a warning and
    /// recorded; files that fail to decode are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dataset`] if `root` is not a directory or no image
    /// could be loaded.
    pub fn load(root: &Path, contract: &FeatureContract) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::Dataset(format!("dataset directory not found: {}", root.display())));
        }

        let mut folders: Vec<PathBuf> = fs::read_dir(root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        folders.sort();

        let mut dataset = Dataset::default();
        for folder in folders {
            let name = folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let category = match Category::from_folder_name(&name) {
                Some(c) => c,
                None => {
                    log::warn!("Skipping unrecognized folder: '{}'", name);
                    dataset.skipped_folders.push(name);
                    continue;
                },
            };

            let mut files: Vec<PathBuf> = match fs::read_dir(&folder) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && !is_hidden(p))
                    .collect(),
                Err(e) => {
                    log::warn!("Skipping unreadable folder '{}': {}", name, e);
                    dataset.skipped_folders.push(name);
                    continue;
                },
            };
            files.sort();

            let loaded: Vec<std::result::Result<LabeledImage, PathBuf>> = files
                .into_par_iter()
                .map(|path| match load_canonical(&path, contract) {
                    Ok(image) => Ok(LabeledImage {
                        path,
                        category,
                        image,
                    }),
                    Err(e) => {
                        log::debug!("Skipping unreadable file {}: {}", path.display(), e);
                        Err(path)
                    },
                })
                .collect();

            let mut count = 0;
            for item in loaded {
                match item {
                    Ok(sample) => {
                        dataset.samples.push(sample);
                        count += 1;
                    },
                    Err(_) => dataset.unreadable_files += 1,
                }
            }
            log::info!("{}: {} images", category, count);
        }

        if dataset.samples.is_empty() {
            return Err(Error::Dataset(format!("no images could be loaded from {}", root.display())));
        }
        if dataset.unreadable_files > 0 {
            log::warn!("Skipped {} unreadable files", dataset.unreadable_files);
        }

        let counts = dataset.class_counts();
        let present: Vec<usize> = counts.iter().copied().filter(|&c| c > 0).collect();
        log::info!(
            "Total images: {}, classes found: {}",
            dataset.samples.len(),
            present.len()
        );
        if let (Some(&max), Some(&min)) = (present.iter().max(), present.iter().min()) {
            if max as f64 / min.max(1) as f64 > IMBALANCE_WARNING_RATIO {
                log::warn!(
                    "Significant class imbalance ({} vs {} images); class weights will be applied",
                    max,
                    min
                );
            }
        }

        Ok(dataset)
    }

    /// Build from already decoded samples.
    pub fn from_samples(samples: Vec<LabeledImage>) -> Self {
        Self {
            samples,
            ..Self::default()
        }
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no image was loaded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All samples in load order.
    pub fn samples(&self) -> &[LabeledImage] {
        &self.samples
    }

    /// Class index of every sample.
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.category.index()).collect()
    }

    /// Images per category, indexed by class.
    pub fn class_counts(&self) -> [usize; NUM_CATEGORIES] {
        let mut counts = [0; NUM_CATEGORIES];
        for s in &self.samples {
            counts[s.category.index()] += 1;
        }
        counts
    }

    /// Folders that did not name a category.
    pub fn skipped_folders(&self) -> &[String] {
        &self.skipped_folders
    }

    /// Files that could not be decoded.
    pub fn unreadable_files(&self) -> usize {
        self.unreadable_files
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with('.'))
}
