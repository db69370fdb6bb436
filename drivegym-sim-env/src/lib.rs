#![warn(missing_docs)]
//! Driving environment on top of an external traffic simulator.
//!
//! The environment couples a synchronously-stepped simulator session with a
//! hierarchical control scheme: a maneuver specification produced once per
//! episode by a high-level policy is converted into per-tick vehicle
//! actuation, while the episode state machine ([`DriveEnv`]) provides the MDP
//! interface (reset/step/terminal/reward) on top of asynchronous sensor
//! callbacks and road-relative (Frenet) state estimation.
//!
//! The simulator itself is an external collaborator reached through the
//! traits in the [`sim`] module; [`sim::stub`] provides a deterministic
//! in-process backend for tests.
mod act;
mod base;
mod config;
mod frenet;
mod obs;
mod reward;
mod sensor;
pub mod sim;
mod spawn;

pub use act::{DirectController, DriveAct, ManeuverController};
pub use base::{DriveEnv, DriveInfo, EpisodeFlags, VehicleGeometry, ARRIVE_TOLERANCE};
pub use config::{DriveEnvConfig, Goal};
pub use frenet::{estimate, EgoState, ReferenceLane};
pub use obs::DriveObs;
pub use reward::{reward, RewardInput};
pub use sensor::SensorHub;
pub use spawn::{actor_polygons, ScenarioSpawner};
