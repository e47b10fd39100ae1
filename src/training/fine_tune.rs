//! Fine-tuning of the embedding backbone with a temporary classification head.
//!
//! Only the top `fine_tune_layers` backbone layers and the head are updated.
//! The saved safetensors file contains both scopes; inference reads only
//! `backbone.`.

use crate::category::NUM_CATEGORIES;
use crate::config::TrainingConfig;
use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use crate::ml::backbone::{ConvBackbone, BACKBONE_PREFIX, LAYERS};
use crate::preprocess::CanonicalImage;
use crate::training::augment::Augmenter;
use crate::training::callbacks::{EarlyStopping, ReduceLrOnPlateau, StoppingDecision};
use candle_core::{DType, Device, Module, Tensor, Var, D};
use candle_nn::{linear, Linear, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::path::Path;

/// Tensor-name prefix of the classification head.
pub const HEAD_PREFIX: &str = "head";

const HEAD_HIDDEN: usize = 256;
const POOL_DROPOUT: f32 = 0.3;
const HIDDEN_DROPOUT: f32 = 0.2;

/// `dropout → dense 256 ReLU → dropout → dense 12` on the pooled embedding.
#[derive(Debug)]
pub struct ClassificationHead {
    hidden: Linear,
    output: Linear,
}

impl ClassificationHead {
    /// Build the head from a var builder scoped to [`HEAD_PREFIX`].
    pub fn new(vb: VarBuilder, embedding_dim: usize, n_classes: usize) -> candle_core::Result<Self> {
        Ok(Self {
            hidden: linear(embedding_dim, HEAD_HIDDEN, vb.pp("hidden"))?,
            output: linear(HEAD_HIDDEN, n_classes, vb.pp("output"))?,
        })
    }

    /// Logits for a batch of pooled embeddings. Dropout is applied only when
    /// `train` is set.
    pub fn forward(&self, pooled: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let xs = if train {
            candle_nn::ops::dropout(pooled, POOL_DROPOUT)?
        } else {
            pooled.clone()
        };
        let xs = self.hidden.forward(&xs)?.relu()?;
        let xs = if train {
            candle_nn::ops::dropout(&xs, HIDDEN_DROPOUT)?
        } else {
            xs
        };
        self.output.forward(&xs)
    }
}

/// Mean cross entropy over a batch, optionally scaled per sample.
pub fn cross_entropy(logits: &Tensor, labels: &Tensor, weights: Option<&Tensor>) -> candle_core::Result<Tensor> {
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let picked = log_probs.gather(&labels.unsqueeze(1)?, 1)?.squeeze(1)?;
    let picked = match weights {
        Some(w) => picked.mul(w)?,
        None => picked,
    };
    picked.mean_all()?.neg()
}

/// Metrics of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochStats {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean weighted training loss
    pub train_loss: f64,
    /// Mean validation loss
    pub val_loss: f64,
    /// Validation accuracy in [0, 1]
    pub val_accuracy: f64,
    /// Learning rate used during the epoch
    pub learning_rate: f64,
}

/// Result of [`fine_tune`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FineTuneOutcome {
    /// Epochs actually run
    pub epochs_run: usize,
    /// Epoch whose weights were kept
    pub best_epoch: usize,
    /// Validation accuracy of the kept weights
    pub best_val_accuracy: f64,
    /// Whether early stopping ended training
    pub stopped_early: bool,
    /// Backbone layers that were updated, counted from the top
    pub trainable_layers: usize,
    /// Per-epoch metrics
    pub history: Vec<EpochStats>,
}

/// A training or validation example.
pub type Example<'a> = (&'a CanonicalImage, usize);

/// Fine-tune the backbone on `train`, validate on `val`, and save the best
/// weights to `output`.
///
/// When `val` is empty the training examples are used for validation.
///
/// # Errors
///
/// Returns [`Error::Training`] for an empty training set or a class-weight
/// table that does not cover the twelve categories, and [`Error::Ml`] for
/// tensor failures.
pub fn fine_tune(
    config: &TrainingConfig,
    contract: &FeatureContract,
    train: &[Example<'_>],
    val: &[Example<'_>],
    class_weights: &[f32],
    output: &Path,
) -> Result<FineTuneOutcome> {
    if train.is_empty() {
        return Err(Error::Training("fine-tuning needs at least one training image".to_string()));
    }
    if class_weights.len() != NUM_CATEGORIES {
        return Err(Error::Training(format!(
            "expected {} class weights, got {}",
            NUM_CATEGORIES,
            class_weights.len()
        )));
    }

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let backbone = ConvBackbone::new(vb.pp(BACKBONE_PREFIX), contract)?;
    let head = ClassificationHead::new(vb.pp(HEAD_PREFIX), contract.embedding_dim, NUM_CATEGORIES)?;

    let trainable_layers = match &config.base_weights {
        Some(base) => {
            let loaded = load_base_weights(&varmap, base, &device)?;
            log::info!("Loaded {} base tensors from {}", loaded, base.display());
            config.fine_tune_layers.min(LAYERS.len())
        },
        None => {
            if config.fine_tune_layers < LAYERS.len() {
                log::warn!(
                    "No base weights configured; training all {} backbone layers instead of the top {}",
                    LAYERS.len(),
                    config.fine_tune_layers
                );
            }
            LAYERS.len()
        },
    };

    let trainable = trainable_vars(&varmap, trainable_layers)?;
    let n_trainable: usize = trainable.iter().map(|v| v.elem_count()).sum();
    log::info!(
        "Fine-tuning top {} backbone layers and head ({} tensors, {} parameters)",
        trainable_layers,
        trainable.len(),
        n_trainable
    );
    let frozen_layers = LAYERS.len() - trainable_layers;

    let mut optimizer = candle_nn::AdamW::new(
        trainable.clone(),
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;

    let augmenter = Augmenter::new(config.augmentation.clone());
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut early = EarlyStopping::new(config.early_stopping_patience);
    let mut plateau = ReduceLrOnPlateau::new(config.plateau_factor, config.plateau_patience, config.min_learning_rate);
    let eval_set = if val.is_empty() { train } else { val };

    let mut history = Vec::with_capacity(config.epochs);
    let mut best_weights: Option<Vec<Tensor>> = None;
    let mut stopped_early = false;
    let mut order: Vec<usize> = (0..train.len()).collect();

    for epoch in 1..=config.epochs {
        let learning_rate = optimizer.learning_rate();
        order.shuffle(&mut rng);

        let mut loss_sum = 0.0;
        for chunk in order.chunks(config.batch_size) {
            let augmented: Vec<CanonicalImage> = if augmenter.is_enabled() {
                chunk
                    .iter()
                    .map(|&i| augmenter.augment(train[i].0, contract, &mut rng))
                    .collect::<Result<_>>()?
            } else {
                Vec::new()
            };
            let images: Vec<&CanonicalImage> = if augmenter.is_enabled() {
                augmented.iter().collect()
            } else {
                chunk.iter().map(|&i| train[i].0).collect()
            };
            let labels: Vec<u32> = chunk.iter().map(|&i| train[i].1 as u32).collect();
            let weights: Vec<f32> = chunk.iter().map(|&i| class_weights[train[i].1]).collect();

            let xs = backbone.batch_tensor(&images)?;
            let labels = Tensor::from_vec(labels, chunk.len(), &device)?;
            let weights = Tensor::from_vec(weights, chunk.len(), &device)?;

            let pooled = backbone.forward_pooled(&xs, frozen_layers)?;
            let logits = head.forward(&pooled, true)?;
            let loss = cross_entropy(&logits, &labels, Some(&weights))?;
            optimizer.backward_step(&loss)?;
            loss_sum += loss.to_scalar::<f32>()? as f64 * chunk.len() as f64;
        }
        let train_loss = loss_sum / train.len() as f64;

        let (val_loss, val_accuracy) = evaluate(&backbone, &head, eval_set, config.batch_size, &device)?;
        log::info!(
            "Epoch {}/{}: loss {:.4}, val_loss {:.4}, val_accuracy {:.4}, lr {:.2e}",
            epoch,
            config.epochs,
            train_loss,
            val_loss,
            val_accuracy,
            learning_rate
        );
        history.push(EpochStats {
            epoch,
            train_loss,
            val_loss,
            val_accuracy,
            learning_rate,
        });

        match early.update(epoch, val_accuracy) {
            StoppingDecision::Improved => best_weights = Some(snapshot(&trainable)?),
            StoppingDecision::Continue => {},
            StoppingDecision::Stop => {
                log::info!("Early stopping after epoch {}", epoch);
                stopped_early = true;
                break;
            },
        }
        if let Some(lr) = plateau.update(val_loss, learning_rate) {
            log::info!("Reducing learning rate to {:.2e}", lr);
            optimizer.set_learning_rate(lr);
        }
    }

    if let Some(weights) = &best_weights {
        for (var, tensor) in trainable.iter().zip(weights) {
            var.set(tensor)?;
        }
        log::info!("Restored weights from epoch {}", early.best_epoch());
    }

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    varmap.save(output)?;
    log::info!("Saved fine-tuned network to {}", output.display());

    Ok(FineTuneOutcome {
        epochs_run: history.len(),
        best_epoch: early.best_epoch(),
        best_val_accuracy: early.best().unwrap_or(0.0),
        stopped_early,
        trainable_layers,
        history,
    })
}

/// Mean unweighted loss and accuracy over `examples`, without dropout.
fn evaluate(
    backbone: &ConvBackbone,
    head: &ClassificationHead,
    examples: &[Example<'_>],
    batch_size: usize,
    device: &Device,
) -> Result<(f64, f64)> {
    let mut loss_sum = 0.0;
    let mut correct = 0usize;
    for chunk in examples.chunks(batch_size) {
        let images: Vec<&CanonicalImage> = chunk.iter().map(|(img, _)| *img).collect();
        let truth: Vec<u32> = chunk.iter().map(|(_, label)| *label as u32).collect();

        let xs = backbone.batch_tensor(&images)?;
        let logits = head.forward(&backbone.forward_pooled(&xs, LAYERS.len())?, false)?;
        let predicted = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
        correct += predicted.iter().zip(&truth).filter(|(p, t)| p == t).count();

        let labels = Tensor::from_vec(truth, chunk.len(), device)?;
        loss_sum += cross_entropy(&logits, &labels, None)?.to_scalar::<f32>()? as f64 * chunk.len() as f64;
    }
    let n = examples.len().max(1) as f64;
    Ok((loss_sum / n, correct as f64 / n))
}

/// Variables of the top `n` backbone layers and of the head, sorted by name.
fn trainable_vars(varmap: &VarMap, n: usize) -> Result<Vec<Var>> {
    let mut prefixes = ConvBackbone::top_layer_prefixes(n);
    prefixes.push(format!("{}.", HEAD_PREFIX));

    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Training("variable map lock poisoned".to_string()))?;
    let mut named: Vec<(&String, &Var)> = data
        .iter()
        .filter(|(name, _)| prefixes.iter().any(|p| name.starts_with(p.as_str())))
        .collect();
    named.sort_by(|a, b| a.0.cmp(b.0));
    Ok(named.into_iter().map(|(_, v)| v.clone()).collect())
}

/// Copy matching tensors from a safetensors file into `varmap`; returns how
/// many were set.
///
/// Every backbone variable must be present with the right shape. Head
/// variables missing from the file keep their initialization.
fn load_base_weights(varmap: &VarMap, path: &Path, device: &Device) -> Result<usize> {
    let tensors = candle_core::safetensors::load(path, device)
        .map_err(|e| Error::artifact(path, format!("invalid base weights: {}", e)))?;
    let data = varmap
        .data()
        .lock()
        .map_err(|_| Error::Training("variable map lock poisoned".to_string()))?;

    let backbone_scope = format!("{}.", BACKBONE_PREFIX);
    let mut loaded = 0;
    let mut unmatched = Vec::new();
    for (name, var) in data.iter() {
        match tensors.get(name) {
            Some(t) if t.shape() == var.shape() => {
                var.set(t)?;
                loaded += 1;
                continue;
            },
            Some(t) => log::warn!(
                "Base tensor {} has shape {:?}, expected {:?}",
                name,
                t.shape(),
                var.shape()
            ),
            None => {},
        }
        if name.starts_with(&backbone_scope) {
            unmatched.push(name.clone());
        }
    }

    if !unmatched.is_empty() {
        unmatched.sort();
        return Err(Error::artifact(
            path,
            format!(
                "base weights cover only part of the backbone; missing or mis-shaped: {}",
                unmatched.join(", ")
            ),
        ));
    }
    Ok(loaded)
}

fn snapshot(vars: &[Var]) -> Result<Vec<Tensor>> {
    Ok(vars.iter().map(|v| v.as_tensor().copy()).collect::<candle_core::Result<_>>()?)
}
