#![warn(missing_docs)]
//! Policies backed by [candle](https://github.com/huggingface/candle) and a
//! zeroth-order trainer for them.
//!
//! The policy maps one observation to the parameters of a maneuver, so a
//! single forward pass drives a whole episode. Training estimates the
//! gradient of the episode return from two rollouts per iteration: one with
//! the policy's own maneuver and one with a Gaussian perturbation of it. The
//! return difference scales the analytic gradient of the policy output,
//! which turns the non-differentiable simulator into a one-sample
//! finite-difference oracle.
mod mlp;
mod opt;
mod policy;
mod zo;

pub use mlp::{Mlp, MlpConfig};
pub use opt::{Optimizer, OptimizerConfig, StepLr};
pub use policy::{MlpPolicy, MlpPolicyConfig};
pub use zo::{clip_grad_norm, next_run_dir, scale_grads, ZoTrainer, ZoTrainerConfig};
