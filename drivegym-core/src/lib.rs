#![warn(missing_docs)]
//! Core abstractions for reinforcement learning on driving simulators.
//!
//! This crate defines the MDP boundary the rest of the workspace talks to:
//! the [`Env`] trait with its associated [`Obs`], [`Act`] and [`Info`] types,
//! the [`Step`] object emitted at every interaction step, the [`Policy`]
//! trait, and the [`record`] module for training metrics.
pub mod error;
pub mod record;

mod base;
pub use base::{Act, Env, Info, Obs, Policy, Step};
