//! Multilayer perceptron.
mod base;
mod config;
pub use base::Mlp;
pub use config::MlpConfig;

use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Linear, Module};

fn mlp_forward(xs: Tensor, layers: &[Linear]) -> Result<Tensor> {
    let n_layers = layers.len();
    let mut xs = xs;

    for layer in layers.iter().take(n_layers - 1) {
        xs = layer.forward(&xs)?.relu()?;
    }

    Ok(layers[n_layers - 1].forward(&xs)?)
}
