use tch::Tensor;

pub const INITIAL_SCALE: f64 = 65_536.0;
pub const GROWTH_FACTOR: f64 = 2.0;
pub const BACKOFF_FACTOR: f64 = 0.5;
pub const GROWTH_INTERVAL: usize = 2000;

/// Dynamic loss scaling for half-precision training. The loss is multiplied
/// by `scale` before backprop and gradients are divided by it before the
/// optimizer step. Steps with non-finite gradients are skipped and the scale
/// backs off; after `GROWTH_INTERVAL` clean steps it grows.
#[derive(Debug, Clone, PartialEq)]
pub struct LossScaler {
    enabled: bool,
    scale: f64,
    clean_steps: usize,
}

impl LossScaler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            scale: if enabled { INITIAL_SCALE } else { 1.0 },
            clean_steps: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn scale_loss(&self, loss: &Tensor) -> Tensor {
        if self.enabled { loss * self.scale } else { loss.shallow_clone() }
    }

    /// Divides every defined gradient by the current scale. Returns `false`
    /// when any gradient holds an inf or NaN.
    pub fn unscale(&self, parameters: &[Tensor]) -> bool {
        if !self.enabled {
            return true;
        }
        let inv_scale = 1.0 / self.scale;
        let mut finite = true;
        tch::no_grad(|| {
            for parameter in parameters {
                let mut grad = parameter.grad();
                if !grad.defined() {
                    continue;
                }
                grad *= inv_scale;
                if finite && grad.isfinite().all().int64_value(&[]) == 0 {
                    finite = false;
                }
            }
        });
        finite
    }

    /// Records the outcome of a step. Returns whether the optimizer step
    /// should be taken.
    pub fn update(&mut self, grads_finite: bool) -> bool {
        if !self.enabled {
            return true;
        }
        if !grads_finite {
            self.scale *= BACKOFF_FACTOR;
            self.clean_steps = 0;
            log::warn!("Non-finite gradients, skipping step (loss scale now {})", self.scale);
            return false;
        }
        self.clean_steps += 1;
        if self.clean_steps >= GROWTH_INTERVAL {
            self.scale *= GROWTH_FACTOR;
            self.clean_steps = 0;
        }
        true
    }
}
