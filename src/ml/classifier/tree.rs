//! Histogram-based decision tree growth shared by both ensembles.
//!
//! A tree is grown over a [`BinnedMatrix`] with an explicit work stack. The
//! ensemble supplies a [`SplitObjective`] that turns per-row statistics into
//! split gains and leaf values; gradient boosting accumulates
//! gradient/hessian pairs, the forest accumulates weighted class counts.

use super::binning::{BinnedMatrix, FeatureBinner};
use rand::seq::index::sample;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;

/// One node of a fitted tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    /// Rows with `x[feature] <= threshold` go to `left`.
    Split {
        /// Feature index
        feature: u32,
        /// Raw-value threshold
        threshold: f32,
        /// Bin index equivalent of `threshold`
        bin: u8,
        /// Left child
        left: u32,
        /// Right child
        right: u32,
    },
    /// Terminal node.
    Leaf {
        /// Leaf output (a margin or a class distribution)
        value: Vec<f32>,
    },
}

/// A fitted decision tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Leaf output for a raw feature vector.
    pub fn leaf_value(&self, x: &[f32]) -> &[f32] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    // NaN goes right, consistent with the binner.
                    idx = if x[*feature as usize] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                },
            }
        }
    }

    /// Leaf output for a row of the training matrix.
    pub fn leaf_value_binned(&self, binned: &BinnedMatrix, row: usize) -> &[f32] {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    bin,
                    left,
                    right,
                    ..
                } => {
                    idx = if binned.get(row, *feature as usize) <= *bin {
                        *left as usize
                    } else {
                        *right as usize
                    };
                },
            }
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree has no nodes (never the case for a fitted tree).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check a deserialized tree before it is used for prediction.
    ///
    /// Children must point strictly forward to existing nodes, which rules
    /// out cycles, split features must be below `n_features`, and every leaf
    /// must hold exactly `leaf_len` finite values.
    pub fn check_structure(&self, n_features: usize, leaf_len: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        let len = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature, left, right, ..
                } => {
                    if *feature as usize >= n_features {
                        return Err(format!(
                            "node {} splits on feature {} but the model has {} features",
                            idx, feature, n_features
                        ));
                    }
                    for child in [*left as usize, *right as usize] {
                        if child <= idx || child >= len {
                            return Err(format!(
                                "node {} points to child {} outside {}..{}",
                                idx,
                                child,
                                idx + 1,
                                len
                            ));
                        }
                    }
                },
                TreeNode::Leaf { value } => {
                    if value.len() != leaf_len {
                        return Err(format!(
                            "leaf {} holds {} values, expected {}",
                            idx,
                            value.len(),
                            leaf_len
                        ));
                    }
                    if value.iter().any(|v| !v.is_finite()) {
                        return Err(format!("leaf {} holds a non-finite value", idx));
                    }
                },
            }
        }
        Ok(())
    }
}

/// Turns accumulated row statistics into split decisions.
///
/// Statistics are fixed-width `f64` vectors that add up across rows; gains are
/// `score(left) + score(right) - score(parent)`.
pub trait SplitObjective: Sync {
    /// Width of the per-row statistic vector.
    fn stat_width(&self) -> usize;

    /// Add the statistics of `row` into `acc`.
    fn accumulate(&self, row: usize, acc: &mut [f64]);

    /// Node score; larger is better.
    fn score(&self, stats: &[f64]) -> f64;

    /// Whether a child with these statistics is allowed.
    fn valid_child(&self, stats: &[f64]) -> bool;

    /// Leaf output for a node with these statistics.
    fn leaf_value(&self, stats: &[f64]) -> Vec<f32>;
}

/// How candidate features are drawn.
#[derive(Debug, Clone)]
pub enum FeatureSampling {
    /// Fixed candidate set for the whole tree.
    PerTree(Vec<usize>),
    /// Fresh `k` of `n_features` at every split.
    PerSplit {
        /// Total features
        n_features: usize,
        /// Candidates per split
        k: usize,
    },
}

/// Growth limits.
#[derive(Debug, Clone, Copy)]
pub struct TreeLimits {
    /// Maximum depth (`None` grows until nodes are pure or too small)
    pub max_depth: Option<usize>,
    /// Minimum rows for a node to be split
    pub min_samples_split: usize,
}

struct BestSplit {
    gain: f64,
    feature: usize,
    bin: usize,
}

struct WorkItem {
    node: usize,
    rows: Vec<u32>,
    depth: usize,
}

/// Grow one tree over `rows` (duplicates allowed, e.g. bootstrap draws).
pub fn grow_tree<O: SplitObjective, R: Rng>(
    binned: &BinnedMatrix,
    binner: &FeatureBinner,
    rows: Vec<u32>,
    objective: &O,
    sampling: &FeatureSampling,
    limits: TreeLimits,
    rng: &mut R,
) -> DecisionTree {
    let mut nodes = vec![TreeNode::Leaf { value: Vec::new() }];
    let mut stack = vec![WorkItem {
        node: 0,
        rows,
        depth: 0,
    }];

    while let Some(item) = stack.pop() {
        let stats = node_stats(objective, &item.rows);
        let depth_ok = limits.max_depth.map_or(true, |d| item.depth < d);
        let size_ok = item.rows.len() >= limits.min_samples_split.max(2);

        let best = if depth_ok && size_ok {
            match sampling {
                FeatureSampling::PerTree(features) => {
                    best_split(binned, binner, objective, &item.rows, &stats, features)
                },
                FeatureSampling::PerSplit { n_features, k } => {
                    let k = (*k).clamp(1, (*n_features).max(1));
                    let first = sample(rng, *n_features, k.min(*n_features)).into_vec();
                    // Keep drawing past constant features until some split is valid.
                    best_split(binned, binner, objective, &item.rows, &stats, &first).or_else(|| {
                        let mut rest: Vec<usize> = (0..*n_features).filter(|f| !first.contains(f)).collect();
                        rest.shuffle(rng);
                        rest.chunks(k)
                            .find_map(|chunk| best_split(binned, binner, objective, &item.rows, &stats, chunk))
                    })
                },
            }
        } else {
            None
        };

        match best {
            Some(split) => {
                let column = binned.column(split.feature);
                let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = item
                    .rows
                    .iter()
                    .partition(|&&r| column[r as usize] as usize <= split.bin);

                let left = nodes.len();
                let right = left + 1;
                nodes.push(TreeNode::Leaf { value: Vec::new() });
                nodes.push(TreeNode::Leaf { value: Vec::new() });
                nodes[item.node] = TreeNode::Split {
                    feature: split.feature as u32,
                    threshold: binner.threshold(split.feature, split.bin),
                    bin: split.bin as u8,
                    left: left as u32,
                    right: right as u32,
                };
                stack.push(WorkItem {
                    node: right,
                    rows: right_rows,
                    depth: item.depth + 1,
                });
                stack.push(WorkItem {
                    node: left,
                    rows: left_rows,
                    depth: item.depth + 1,
                });
            },
            None => {
                nodes[item.node] = TreeNode::Leaf {
                    value: objective.leaf_value(&stats),
                };
            },
        }
    }

    DecisionTree { nodes }
}

fn node_stats<O: SplitObjective>(objective: &O, rows: &[u32]) -> Vec<f64> {
    let mut stats = vec![0f64; objective.stat_width()];
    for &r in rows {
        objective.accumulate(r as usize, &mut stats);
    }
    stats
}

fn best_split<O: SplitObjective>(
    binned: &BinnedMatrix,
    binner: &FeatureBinner,
    objective: &O,
    rows: &[u32],
    parent: &[f64],
    candidates: &[usize],
) -> Option<BestSplit> {
    let width = objective.stat_width();
    let parent_score = objective.score(parent);

    candidates
        .par_iter()
        .filter_map(|&f| {
            let n_bins = binner.n_bins(f);
            if n_bins < 2 {
                return None;
            }
            let column = binned.column(f);
            let mut hist = vec![0f64; n_bins * width];
            for &r in rows {
                let b = column[r as usize] as usize;
                objective.accumulate(r as usize, &mut hist[b * width..(b + 1) * width]);
            }

            let mut left = vec![0f64; width];
            let mut right = vec![0f64; width];
            let mut best: Option<BestSplit> = None;
            for b in 0..n_bins - 1 {
                for j in 0..width {
                    left[j] += hist[b * width + j];
                    right[j] = parent[j] - left[j];
                }
                if !objective.valid_child(&left) || !objective.valid_child(&right) {
                    continue;
                }
                let gain = objective.score(&left) + objective.score(&right) - parent_score;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |s| gain > s.gain) {
                    best = Some(BestSplit { gain, feature: f, bin: b });
                }
            }
            best
        })
        // Ties resolve to the lowest feature index so results do not depend on scheduling.
        .reduce_with(|a, b| {
            if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                b
            } else {
                a
            }
        })
}
