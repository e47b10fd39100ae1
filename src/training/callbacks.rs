//! Epoch-level training controls: early stopping and learning-rate decay.

/// Stops training when validation accuracy stops improving.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    best_epoch: usize,
    wait: usize,
}

/// What [`EarlyStopping::update`] decided for an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppingDecision {
    /// New best value; the current weights should be kept.
    Improved,
    /// No improvement, keep going.
    Continue,
    /// Patience exhausted.
    Stop,
}

impl EarlyStopping {
    /// Stop after `patience` epochs without a strictly better accuracy.
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            best_epoch: 0,
            wait: 0,
        }
    }

    /// Record the accuracy observed after `epoch`.
    pub fn update(&mut self, epoch: usize, val_accuracy: f64) -> StoppingDecision {
        match self.best {
            Some(best) if val_accuracy <= best => {
                self.wait += 1;
                if self.wait >= self.patience {
                    StoppingDecision::Stop
                } else {
                    StoppingDecision::Continue
                }
            },
            _ => {
                self.best = Some(val_accuracy);
                self.best_epoch = epoch;
                self.wait = 0;
                StoppingDecision::Improved
            },
        }
    }

    /// Best accuracy seen so far.
    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Epoch at which the best accuracy was seen.
    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

/// Multiplies the learning rate by `factor` when validation loss plateaus.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    /// Create a scheduler.
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Record the loss of an epoch; returns the new rate when it changes.
    pub fn update(&mut self, val_loss: f64, current_lr: f64) -> Option<f64> {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.patience {
            return None;
        }
        self.wait = 0;
        let next = (current_lr * self.factor).max(self.min_lr);
        if next < current_lr {
            Some(next)
        } else {
            None
        }
    }
}
