use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Mlp`](super::Mlp).
pub struct MlpConfig {
    pub(super) in_dim: i64,
    pub(super) units: Vec<i64>,
    pub(super) out_dim: i64,
}

impl MlpConfig {
    /// Creates configuration of an MLP with ReLU between the hidden layers
    /// and a linear output layer.
    pub fn new(in_dim: i64, units: Vec<i64>, out_dim: i64) -> Self {
        Self {
            in_dim,
            units,
            out_dim,
        }
    }

    /// Output dimension of the network.
    pub fn out_dim(&self) -> i64 {
        self.out_dim
    }
}
