//! Environment.
use super::{Act, Info, Obs, Step};
use crate::record::Record;
use anyhow::Result;

/// Represents an environment, typically an MDP.
pub trait Env {
    /// Configurations.
    type Config: Clone;

    /// Observation of the environment.
    type Obs: Obs;

    /// Action of the environment.
    type Act: Act;

    /// Information in the [`Step`] object.
    type Info: Info;

    /// Builds an environment with a given random seed.
    fn build(config: &Self::Config, seed: u64) -> Result<Self>
    where
        Self: Sized;

    /// Resets the environment and returns the initial observation.
    ///
    /// After a successful reset the environment is guaranteed to be in a
    /// non-terminal state.
    fn reset(&mut self) -> Result<Self::Obs>;

    /// Performs an environment step.
    fn step(&mut self, a: &Self::Act) -> (Step<Self>, Record)
    where
        Self: Sized;
}
