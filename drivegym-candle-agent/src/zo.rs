//! Zeroth-order training of an [`MlpPolicy`] on episode returns.
use crate::{
    opt::StepLr,
    policy::MlpPolicy,
};
use anyhow::{anyhow, Result};
use candle_core::{backprop::GradStore, Tensor, Var};
use chrono::Local;
use drivegym_core::record::{Record, RecordValue, Recorder};
use drivegym_core::Env;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::{create_dir_all, read_dir, File},
    io::{BufReader, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

/// Configuration of [`ZoTrainer`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ZoTrainerConfig {
    /// Number of training iterations, two episodes each.
    pub max_iters: usize,
    /// Standard deviation of the Gaussian maneuver perturbation.
    pub perturb_std: f64,
    /// Global gradient norm above which gradients are rescaled.
    pub grad_clip_norm: f64,
    /// Initial learning rate.
    pub lr: f64,
    /// Learning-rate decay schedule.
    pub lr_schedule: StepLr,
    /// Interval in iterations between checkpoints of the best policy.
    pub save_model_interval: usize,
    /// Directory that receives one `run{N}` subdirectory per training run.
    /// `None` disables checkpointing.
    pub model_dir: Option<String>,
}

impl Default for ZoTrainerConfig {
    fn default() -> Self {
        Self {
            max_iters: 1000,
            perturb_std: 0.5,
            grad_clip_norm: 10.0,
            lr: 1e-4,
            lr_schedule: StepLr::default(),
            save_model_interval: 100,
            model_dir: None,
        }
    }
}

impl ZoTrainerConfig {
    /// Sets the number of training iterations.
    pub fn max_iters(mut self, v: usize) -> Self {
        self.max_iters = v;
        self
    }

    /// Sets the perturbation standard deviation.
    pub fn perturb_std(mut self, v: f64) -> Self {
        self.perturb_std = v;
        self
    }

    /// Sets the checkpoint directory.
    pub fn model_dir(mut self, v: impl Into<String>) -> Self {
        self.model_dir = Some(v.into());
        self
    }

    /// Constructs [`ZoTrainerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ZoTrainerConfig`] as a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Trains an [`MlpPolicy`] by one-sample finite differences.
///
/// Each iteration runs two episodes on independent environment instances: one
/// with the policy's own maneuver and one with a Gaussian perturbation of it.
/// The surrogate loss is the negated mean of the policy output, so its
/// gradient with respect to the parameters is the (negated, averaged)
/// network Jacobian; scaling it by the return difference of the two episodes
/// yields an ascent direction on the episode return.
pub struct ZoTrainer<E: Env> {
    config: ZoTrainerConfig,
    env_config: E::Config,
    phantom: PhantomData<E>,
}

impl<E: Env> ZoTrainer<E>
where
    E::Obs: Into<Vec<f32>>,
    E::Act: From<Vec<f32>>,
{
    /// Constructs the trainer.
    pub fn new(config: ZoTrainerConfig, env_config: E::Config) -> Self {
        Self {
            config,
            env_config,
            phantom: PhantomData,
        }
    }

    /// Runs the training loop, reporting per-iteration metrics to `recorder`.
    /// Returns the best episode return observed.
    pub fn train(&self, policy: &mut MlpPolicy, recorder: &mut dyn Recorder) -> Result<f32> {
        let run_dir = match &self.config.model_dir {
            Some(dir) => Some(next_run_dir(dir)?),
            None => None,
        };
        let mut best_return = f32::NEG_INFINITY;
        let mut best_policy: Option<MlpPolicy> = None;

        for iter in 0..self.config.max_iters {
            // Base rollout with the policy's own maneuver.
            let mut env = E::build(&self.env_config, 2 * iter as u64)?;
            let obs = env.reset()?;
            let values: Vec<f32> = obs.into();
            let xs = Tensor::new(values.as_slice(), policy.device())?.unsqueeze(0)?;
            let out = policy.forward(&xs)?.squeeze(0)?;
            let loss = out.mean_all()?.neg()?;
            let maneuver = out.detach().to_vec1::<f32>()?;
            let base_return = rollout(&mut env, maneuver)?;

            // Perturbed rollout on a fresh environment instance.
            let mut env = E::build(&self.env_config, 2 * iter as u64 + 1)?;
            env.reset()?;
            let noise = Tensor::randn(
                0f32,
                self.config.perturb_std as f32,
                out.dims(),
                policy.device(),
            )?;
            let perturbed = (out.detach() + noise)?.to_vec1::<f32>()?;
            let perturbed_return = rollout(&mut env, perturbed)?;

            // The parameters that achieved this return are the candidate
            // snapshot; they must be captured before the update below.
            if base_return > best_return {
                best_return = base_return;
                best_policy = Some(policy.clone());
            }

            // The return difference turns the surrogate gradient into a
            // finite-difference estimate of the return gradient.
            let delta = (perturbed_return - base_return) as f64;
            let vars = policy.vars();
            let mut grads = loss.backward()?;
            scale_grads(&mut grads, &vars, delta)?;
            clip_grad_norm(&mut grads, &vars, self.config.grad_clip_norm)?;
            policy.step(&grads)?;
            policy.set_learning_rate(self.config.lr_schedule.lr_at(self.config.lr, iter + 1));

            if let (Some(run_dir), Some(best)) = (&run_dir, &best_policy) {
                if (iter + 1) % self.config.save_model_interval == 0 {
                    best.save(run_dir.join("best.safetensors"))?;
                }
            }

            let mut record = Record::from_scalar("episode_reward", base_return)
                .merge(Record::from_scalar("perturbed_reward", perturbed_return))
                .merge(Record::from_scalar(
                    "learning_rate",
                    policy.learning_rate() as f32,
                ));
            record.insert("datetime", RecordValue::DateTime(Local::now()));
            recorder.write(record);
            info!(
                "iter {}: return {:.2}, perturbed {:.2}",
                iter, base_return, perturbed_return
            );
        }

        if let (Some(run_dir), Some(best)) = (&run_dir, &best_policy) {
            best.save(run_dir.join("best.safetensors"))?;
        }
        Ok(best_return)
    }
}

/// Runs one episode with a fixed maneuver and returns the episode return.
fn rollout<E: Env>(env: &mut E, maneuver: Vec<f32>) -> Result<f32>
where
    E::Act: From<Vec<f32>>,
{
    let mut episode_return = 0.0;
    loop {
        let act = E::Act::from(maneuver.clone());
        let (step, _) = env.step(&act);
        episode_return += step.reward;
        if step.is_done() {
            return Ok(episode_return);
        }
    }
}

/// Multiplies every gradient of `vars` in `grads` by `factor`.
pub fn scale_grads(grads: &mut GradStore, vars: &[Var], factor: f64) -> Result<()> {
    for var in vars.iter() {
        if let Some(grad) = grads.remove(var.as_tensor()) {
            grads.insert(var.as_tensor(), (grad * factor)?);
        }
    }
    Ok(())
}

/// Rescales the gradients of `vars` so that their global L2 norm does not
/// exceed `max_norm`. Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let mut total = 0f64;
    for var in vars.iter() {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
    }
    let norm = total.sqrt();
    if norm > max_norm {
        let scale = max_norm / (norm + 1e-6);
        for var in vars.iter() {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                grads.insert(var.as_tensor(), (grad * scale)?);
            }
        }
    }
    Ok(norm)
}

/// Creates and returns the next `run{N}` subdirectory of `model_dir`, where
/// `N` is one past the largest existing run number.
pub fn next_run_dir(model_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let model_dir = model_dir.as_ref();
    create_dir_all(model_dir)?;
    let mut next = 0u32;
    for entry in read_dir(model_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name
            .to_str()
            .ok_or_else(|| anyhow!("non-utf8 entry in {:?}", model_dir))?;
        if let Some(n) = name.strip_prefix("run").and_then(|n| n.parse::<u32>().ok()) {
            next = next.max(n + 1);
        }
    }
    let run_dir = model_dir.join(format!("run{}", next));
    create_dir_all(&run_dir)?;
    Ok(run_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use tempdir::TempDir;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn grads_of_sum(var: &Var) -> GradStore {
        let loss = var.as_tensor().sum_all().unwrap();
        loss.backward().unwrap()
    }

    #[test]
    fn zero_return_difference_zeroes_the_gradients() {
        init();
        let var = Var::ones((2, 3), DType::F32, &Device::Cpu).unwrap();
        let mut grads = grads_of_sum(&var);
        scale_grads(&mut grads, &[var.clone()], 0.0).unwrap();
        let grad = grads.get(var.as_tensor()).unwrap();
        let magnitude = grad.sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(magnitude, 0.0);
    }

    #[test]
    fn clipping_bounds_the_global_norm() {
        init();
        // Gradient of the sum is all ones: norm sqrt(100) = 10.
        let var = Var::ones((10, 10), DType::F32, &Device::Cpu).unwrap();
        let mut grads = grads_of_sum(&var);
        let norm = clip_grad_norm(&mut grads, &[var.clone()], 1.0).unwrap();
        assert!((norm - 10.0).abs() < 1e-4);

        let clipped = clip_grad_norm(&mut grads, &[var.clone()], 1.0).unwrap();
        assert!(clipped <= 1.0 + 1e-4);
    }

    #[test]
    fn small_gradients_are_left_alone() {
        init();
        let var = Var::ones(2, DType::F32, &Device::Cpu).unwrap();
        let mut grads = grads_of_sum(&var);
        clip_grad_norm(&mut grads, &[var.clone()], 10.0).unwrap();
        let grad = grads.get(var.as_tensor()).unwrap();
        assert_eq!(grad.to_vec1::<f32>().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn run_directories_are_numbered_past_the_maximum() {
        init();
        let dir = TempDir::new("zo_runs").unwrap();
        let first = next_run_dir(dir.path()).unwrap();
        assert!(first.ends_with("run0"));
        create_dir_all(dir.path().join("run7")).unwrap();
        let next = next_run_dir(dir.path()).unwrap();
        assert!(next.ends_with("run8"));
        assert!(next.is_dir());
    }
}
