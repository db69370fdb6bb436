//! Optimizers and learning-rate schedules.
use anyhow::Result;
use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use serde::{Deserialize, Serialize};

/// Configuration of optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// AdamW optimizer.
    AdamW {
        /// Learning rate.
        lr: f64,
        #[serde(default = "default_beta1")]
        /// First moment decay.
        beta1: f64,
        #[serde(default = "default_beta2")]
        /// Second moment decay.
        beta2: f64,
        #[serde(default = "default_eps")]
        /// Numerical stabilizer.
        eps: f64,
        #[serde(default = "default_weight_decay")]
        /// Decoupled weight decay.
        weight_decay: f64,
    },

    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },
}

fn default_beta1() -> f64 {
    ParamsAdamW::default().beta1
}

fn default_beta2() -> f64 {
    ParamsAdamW::default().beta2
}

fn default_eps() -> f64 {
    ParamsAdamW::default().eps
}

fn default_weight_decay() -> f64 {
    ParamsAdamW::default().weight_decay
}

impl OptimizerConfig {
    /// Constructs the optimizer over the given variables.
    pub fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        match &self {
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => {
                let params = ParamsAdamW {
                    lr: *lr,
                    beta1: *beta1,
                    beta2: *beta2,
                    eps: *eps,
                    weight_decay: *weight_decay,
                };
                let opt = AdamW::new(vars, params)?;
                Ok(Optimizer::AdamW(opt))
            }
            OptimizerConfig::Adam { lr } => {
                let params = ParamsAdam {
                    lr: *lr,
                    ..ParamsAdam::default()
                };
                let opt = Adam::new(vars, params)?;
                Ok(Optimizer::Adam(opt))
            }
        }
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::AdamW {
                lr: _,
                beta1,
                beta2,
                eps,
                weight_decay,
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
            },
            Self::Adam { lr: _ } => Self::Adam { lr },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam { lr: 1e-4 }
    }
}

/// Optimizers.
pub enum Optimizer {
    /// AdamW optimizer.
    AdamW(AdamW),

    /// Adam optimizer.
    Adam(Adam),
}

impl Optimizer {
    /// Applies a backward pass and an optimization step.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        match self {
            Self::AdamW(opt) => Ok(opt.backward_step(loss)?),
            Self::Adam(opt) => Ok(opt.backward_step(loss)?),
        }
    }

    /// Applies an optimization step from precomputed gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::AdamW(opt) => Ok(opt.step(grads)?),
            Self::Adam(opt) => Ok(opt.step(grads)?),
        }
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::AdamW(opt) => opt.learning_rate(),
            Self::Adam(opt) => opt.learning_rate(),
        }
    }

    /// Overrides the learning rate for subsequent steps.
    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::AdamW(opt) => opt.set_learning_rate(lr),
            Self::Adam(opt) => opt.set_learning_rate(lr),
        }
    }
}

/// Learning-rate decay by a constant factor every fixed number of steps.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepLr {
    /// Number of optimization steps between decays.
    pub step_size: usize,
    /// Multiplicative decay factor.
    pub gamma: f64,
}

impl Default for StepLr {
    fn default() -> Self {
        Self {
            step_size: 32,
            gamma: 0.96,
        }
    }
}

impl StepLr {
    /// Learning rate after `steps` optimization steps from `base_lr`.
    pub fn lr_at(&self, base_lr: f64, steps: usize) -> f64 {
        base_lr * self.gamma.powi((steps / self.step_size) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn backward_step_descends_with_the_overridden_rate() {
        let var = Var::ones(3, DType::F32, &Device::Cpu).unwrap();
        let config = OptimizerConfig::default().learning_rate(0.1);
        let mut opt = config.build(vec![var.clone()]).unwrap();
        assert_eq!(opt.learning_rate(), 0.1);

        let loss = var.as_tensor().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();
        let values = var.as_tensor().to_vec1::<f32>().unwrap();
        for v in values {
            assert!(v < 1.0);
        }
    }

    #[test]
    fn step_lr_decays_in_plateaus() {
        let schedule = StepLr {
            step_size: 32,
            gamma: 0.5,
        };
        assert_eq!(schedule.lr_at(1.0, 0), 1.0);
        assert_eq!(schedule.lr_at(1.0, 31), 1.0);
        assert_eq!(schedule.lr_at(1.0, 32), 0.5);
        assert_eq!(schedule.lr_at(1.0, 64), 0.25);
    }
}
