//! MLP policy mapping one observation to maneuver parameters.
use crate::{
    mlp::{Mlp, MlpConfig},
    opt::{Optimizer, OptimizerConfig},
};
use anyhow::Result;
use candle_core::{backprop::GradStore, DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use drivegym_core::{Env, Policy};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`MlpPolicy`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct MlpPolicyConfig {
    pub(crate) mlp_config: MlpConfig,
    pub(crate) opt_config: OptimizerConfig,
}

impl MlpPolicyConfig {
    /// Creates the configuration with a default optimizer.
    pub fn new(mlp_config: MlpConfig) -> Self {
        Self {
            mlp_config,
            opt_config: OptimizerConfig::default(),
        }
    }

    /// Sets optimizer configuration.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Constructs [`MlpPolicyConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`MlpPolicyConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// A deterministic MLP policy whose parameters live in a [`VarMap`].
pub struct MlpPolicy {
    device: Device,
    varmap: VarMap,
    mlp: Mlp,
    mlp_config: MlpConfig,
    opt_config: OptimizerConfig,
    opt: Optimizer,
}

impl MlpPolicy {
    /// Constructs the policy on the given device.
    pub fn build(config: MlpPolicyConfig, device: Device) -> Result<Self> {
        let varmap = VarMap::new();
        let mlp = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            Mlp::build(vb, &config.mlp_config)?
        };
        let opt = config.opt_config.build(varmap.all_vars())?;

        Ok(Self {
            device,
            varmap,
            mlp,
            mlp_config: config.mlp_config,
            opt_config: config.opt_config,
            opt,
        })
    }

    /// Device the parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Forward pass. The input must carry a batch dimension.
    pub fn forward(&self, obs: &Tensor) -> Result<Tensor> {
        self.mlp.forward(obs)
    }

    /// All trainable variables.
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Applies an optimization step from precomputed gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.opt.step(grads)
    }

    /// Current learning rate of the optimizer.
    pub fn learning_rate(&self) -> f64 {
        self.opt.learning_rate()
    }

    /// Overrides the learning rate for subsequent steps.
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.opt.set_learning_rate(lr);
    }

    /// Saves the parameters as a safetensors file.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save mlp policy to {:?}", path.as_ref());
        Ok(())
    }

    /// Loads parameters saved with [`save`](Self::save).
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load mlp policy from {:?}", path.as_ref());
        Ok(())
    }
}

impl Clone for MlpPolicy {
    fn clone(&self) -> Self {
        let device = self.device.clone();
        let varmap = VarMap::new();
        let mlp = {
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            Mlp::build(vb, &self.mlp_config).unwrap()
        };
        // Copy parameter values into the clone's own variables. Rebinding the
        // map would alias the source, and the clone must be a snapshot.
        {
            let src = self.varmap.data().lock().unwrap();
            let dst = varmap.data().lock().unwrap();
            for (name, var) in dst.iter() {
                var.set(src.get(name).unwrap().as_tensor()).unwrap();
            }
        }
        let opt = self.opt_config.build(varmap.all_vars()).unwrap();

        Self {
            device,
            varmap,
            mlp,
            mlp_config: self.mlp_config.clone(),
            opt_config: self.opt_config.clone(),
            opt,
        }
    }
}

impl<E: Env> Policy<E> for MlpPolicy
where
    E::Obs: Into<Vec<f32>>,
    E::Act: From<Vec<f32>>,
{
    fn sample(&mut self, obs: &E::Obs) -> E::Act {
        let values: Vec<f32> = obs.clone().into();
        let xs = Tensor::new(values.as_slice(), &self.device)
            .unwrap()
            .unsqueeze(0)
            .unwrap();
        let ys = self.forward(&xs).unwrap().squeeze(0).unwrap();
        ys.to_vec1::<f32>().unwrap().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn new_policy() -> MlpPolicy {
        let config = MlpPolicyConfig::new(MlpConfig::new(4, vec![16], 2));
        MlpPolicy::build(config, Device::Cpu).unwrap()
    }

    #[test]
    fn clone_reproduces_the_forward_pass() {
        let policy = new_policy();
        let cloned = policy.clone();
        let xs = Tensor::new(&[[0.5f32, -0.5, 1.0, 0.0]], &Device::Cpu).unwrap();
        let a = policy.forward(&xs).unwrap().to_vec2::<f32>().unwrap();
        let b = cloned.forward(&xs).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clone_is_an_independent_snapshot() {
        let policy = new_policy();
        let cloned = policy.clone();
        // Zero out the original; the clone must keep its copied values.
        for var in policy.vars() {
            let zeros = var.as_tensor().zeros_like().unwrap();
            var.set(&zeros).unwrap();
        }
        let xs = Tensor::new(&[[0.5f32, -0.5, 1.0, 0.0]], &Device::Cpu).unwrap();
        let zeroed = policy.forward(&xs).unwrap().to_vec2::<f32>().unwrap();
        let kept = cloned.forward(&xs).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(zeroed, vec![vec![0.0, 0.0]]);
        assert_ne!(kept, zeroed);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = TempDir::new("mlp_policy").unwrap();
        let path = dir.path().join("policy.safetensors");
        let policy = new_policy();
        policy.save(&path).unwrap();

        let xs = Tensor::new(&[[1.0f32, 2.0, 3.0, 4.0]], &Device::Cpu).unwrap();
        let before = policy.forward(&xs).unwrap().to_vec2::<f32>().unwrap();

        let mut other = new_policy();
        other.load(&path).unwrap();
        let after = other.forward(&xs).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(before, after);
    }
}
