//! Reinforcement learning for hierarchical autonomous driving.
//!
//! Drivegym consists of the following crates:
//!
//! * [drivegym-core](../drivegym_core/index.html) provides the traits generic
//!   to environments and policies (`Env`, `Obs`, `Act`, `Policy`) and the
//!   record types used to report training metrics.
//! * [drivegym-sim-env](../drivegym_sim_env/index.html) implements a driving
//!   environment on top of an external traffic simulator: scenario spawning,
//!   sensor aggregation, road-relative state estimation, reward shaping and
//!   the episode state machine.
//! * [drivegym-candle-agent](../drivegym_candle_agent/index.html) implements
//!   policies based on [candle](https://crates.io/crates/candle-core) and a
//!   zeroth-order trainer that estimates return gradients from paired
//!   rollouts.
//!
//! This crate re-exports the core abstractions and carries the workspace
//! integration tests.
pub use drivegym_core as core;
