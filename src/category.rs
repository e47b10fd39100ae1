//! Waste categories and their disposal routing.
//!
//! The twelve categories form a closed set; their declaration order is the
//! class-index order used by every fitted classifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the twelve waste categories the engine can predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// `(ME) Metal`
    #[serde(rename = "(ME) Metal")]
    Metal,
    /// `(OW) Organic`
    #[serde(rename = "(OW) Organic")]
    Organic,
    /// `(PE) Plastic`
    #[serde(rename = "(PE) Plastic")]
    Plastic,
    /// `(PP) Paper`
    #[serde(rename = "(PP) Paper")]
    Paper,
    /// `(SN) Needle`
    #[serde(rename = "(SN) Needle")]
    Needle,
    /// `Body Tissue`
    #[serde(rename = "Body Tissue")]
    BodyTissue,
    /// `Gauze`
    Gauze,
    /// `Glass`
    Glass,
    /// `Gloves`
    Gloves,
    /// `Mask`
    Mask,
    /// `Syringe`
    Syringe,
    /// `Tweezers`
    Tweezers,
}

/// Number of categories.
pub const NUM_CATEGORIES: usize = 12;

/// Where an item goes and how it is flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisposalInfo {
    /// Bin the item belongs in
    pub bin: &'static str,
    /// Hazard status shown to operators
    pub hazard_status: &'static str,
}

/// Routing for labels that are not one of the twelve categories.
pub const UNKNOWN_DISPOSAL: DisposalInfo = DisposalInfo {
    bin: "General Waste",
    hazard_status: "Unknown",
};

impl Category {
    /// All categories in class-index order.
    pub const ALL: [Category; NUM_CATEGORIES] = [
        Category::Metal,
        Category::Organic,
        Category::Plastic,
        Category::Paper,
        Category::Needle,
        Category::BodyTissue,
        Category::Gauze,
        Category::Glass,
        Category::Gloves,
        Category::Mask,
        Category::Syringe,
        Category::Tweezers,
    ];

    /// Human-readable label, identical to the dataset folder name.
    pub fn label(self) -> &'static str {
        match self {
            Category::Metal => "(ME) Metal",
            Category::Organic => "(OW) Organic",
            Category::Plastic => "(PE) Plastic",
            Category::Paper => "(PP) Paper",
            Category::Needle => "(SN) Needle",
            Category::BodyTissue => "Body Tissue",
            Category::Gauze => "Gauze",
            Category::Glass => "Glass",
            Category::Gloves => "Gloves",
            Category::Mask => "Mask",
            Category::Syringe => "Syringe",
            Category::Tweezers => "Tweezers",
        }
    }

    /// Class index used by the classifier.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Category for a class index.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Exact label lookup.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }

    /// Lenient lookup for dataset folder names: trimmed, case-insensitive.
    pub fn from_folder_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.label().trim().to_lowercase() == wanted)
    }

    /// Hazard flag reported with every prediction.
    pub fn is_hazardous(self) -> bool {
        matches!(
            self,
            Category::Needle | Category::BodyTissue | Category::Gauze | Category::Syringe
        )
    }

    /// Disposal routing for this category.
    pub fn disposal(self) -> DisposalInfo {
        const RECYCLING: &str = "Recycling Bin (Blue)";
        const SHARPS: &str = "Red Sharps Bin";
        const BIOHAZARD: &str = "Yellow Biohazard Bin";
        const HAZARDOUS: &str = "Hazardous";
        const SAFE: &str = "Non-Hazardous";

        let (bin, hazard_status) = match self {
            Category::Metal => (RECYCLING, SAFE),
            Category::Organic => ("Organic Bin (Green)", SAFE),
            Category::Plastic => (RECYCLING, SAFE),
            Category::Paper => ("Paper Bin (Blue)", SAFE),
            Category::Needle => (SHARPS, HAZARDOUS),
            Category::BodyTissue => (BIOHAZARD, HAZARDOUS),
            Category::Gauze => (BIOHAZARD, HAZARDOUS),
            Category::Glass => (SHARPS, HAZARDOUS),
            Category::Gloves => (BIOHAZARD, HAZARDOUS),
            Category::Mask => (BIOHAZARD, HAZARDOUS),
            Category::Syringe => (SHARPS, HAZARDOUS),
            Category::Tweezers => (SHARPS, HAZARDOUS),
        };
        DisposalInfo { bin, hazard_status }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Disposal routing for a free-form label; unknown labels get [`UNKNOWN_DISPOSAL`].
pub fn disposal_for_label(label: &str) -> DisposalInfo {
    Category::from_label(label)
        .map(Category::disposal)
        .unwrap_or(UNKNOWN_DISPOSAL)
}
