use std::time::Duration;

/// Step decay: `lr(epoch) = base_lr * gamma^(epoch / step_size)`, epochs
/// counted from zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLr {
    pub base_lr: f64,
    pub step_size: usize,
    pub gamma: f64,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size,
            gamma,
        }
    }

    pub fn lr(&self, epoch: usize) -> f64 {
        if self.step_size == 0 {
            return self.base_lr;
        }
        self.base_lr * self.gamma.powi((epoch / self.step_size) as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EpochVerdict {
    /// New best; keep going.
    Improved,
    /// New best at 100%; nothing left to improve.
    Converged,
    /// No improvement for this many epochs, still within patience.
    Stalled(usize),
    /// Patience exhausted.
    Stop,
}

impl EpochVerdict {
    pub fn is_improvement(self) -> bool {
        matches!(self, EpochVerdict::Improved | EpochVerdict::Converged)
    }
}

/// Tracks the best accuracy (percent) and counts epochs without a strict
/// improvement.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    stale_epochs: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            stale_epochs: 0,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn observe(&mut self, accuracy: f64) -> EpochVerdict {
        if self.best.is_none_or(|best| accuracy > best) {
            self.best = Some(accuracy);
            self.stale_epochs = 0;
            return if accuracy >= 100.0 {
                EpochVerdict::Converged
            } else {
                EpochVerdict::Improved
            };
        }
        self.stale_epochs += 1;
        if self.stale_epochs >= self.patience {
            EpochVerdict::Stop
        } else {
            EpochVerdict::Stalled(self.stale_epochs)
        }
    }
}

/// Remaining time extrapolated from the average epoch duration so far.
pub fn estimate_remaining(elapsed: Duration, epochs_done: usize, total_epochs: usize) -> Duration {
    if epochs_done == 0 {
        return Duration::ZERO;
    }
    let per_epoch = elapsed.as_secs_f64() / epochs_done as f64;
    Duration::from_secs_f64(per_epoch * total_epochs.saturating_sub(epochs_done) as f64)
}

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
