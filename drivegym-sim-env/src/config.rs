//! Configuration of [`DriveEnv`](crate::DriveEnv).
use crate::sim::{CameraSpec, ConnectOptions};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Target state of the driving task, in road-relative coordinates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Goal {
    /// Arc-length station of the goal.
    pub s: f64,
    /// Lateral offset of the goal from the reference lane centerline.
    pub d: f64,
    /// Heading error of the goal, radians.
    pub yaw: f64,
    /// Longitudinal speed of the goal, m/s.
    pub v: f64,
}

impl Default for Goal {
    fn default() -> Self {
        Self {
            s: 275.0,
            d: 0.0,
            yaw: 0.0,
            v: 8.0,
        }
    }
}

/// Configuration of the driving environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriveEnvConfig {
    /// Simulator connection parameters.
    pub connect: ConnectOptions,
    /// Fixed simulation timestep in seconds.
    pub dt: f64,
    /// Number of control steps after which the episode is truncated.
    pub max_time_episode: u32,
    /// Number of past actor-polygon snapshots kept per actor class.
    pub max_past_step: usize,
    /// Number of background autopilot vehicles.
    pub number_of_vehicles: usize,
    /// Number of background pedestrians.
    pub number_of_walkers: usize,
    /// Number of scripted moving agents placed along the reference lane.
    pub moving_agents: usize,
    /// Nominal station spacing between consecutive moving agents.
    pub agent_spacing: f64,
    /// Minimum station gap enforced between consecutive moving agents.
    pub agent_gap_min: f64,
    /// Number of ray-cast obstacle detectors in the forward fan.
    pub detector_num: usize,
    /// Total angular aperture of the detector fan, degrees.
    pub detect_angle: f64,
    /// Maximum detection distance of each detector.
    pub detect_range: f64,
    /// Detection cylinder radius of each detector.
    pub hit_radius: f64,
    /// Index into the map's recommended spawn points used for the ego vehicle.
    pub ego_spawn_index: usize,
    /// Attempts at spawning the ego before the whole reset is restarted.
    pub max_ego_spawn_times: u32,
    /// Sleep between ego spawn attempts, seconds.
    pub spawn_backoff: f64,
    /// Road identifier of the reference lane.
    pub road_id: i32,
    /// Lane identifier of the reference lane.
    pub center_lane_id: i32,
    /// Target state of the task.
    pub goal: Goal,
    /// Speed above which forward progress is rewarded, m/s.
    pub desired_speed: f64,
    /// Speed used to normalize the speed observation, m/s.
    pub max_speed: f64,
    /// Evaluation mode narrows the moving-agent placement noise.
    pub eval: bool,
    /// Keep camera frames for rendering.
    pub render: bool,
    /// Camera parameters, used when `render` is set.
    pub camera: CameraSpec,
}

impl Default for DriveEnvConfig {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            dt: 0.1,
            max_time_episode: 500,
            max_past_step: 1,
            number_of_vehicles: 10,
            number_of_walkers: 5,
            moving_agents: 9,
            agent_spacing: 15.0,
            agent_gap_min: 6.0,
            detector_num: 8,
            detect_angle: 150.0,
            detect_range: 50.0,
            hit_radius: 0.2,
            ego_spawn_index: 155,
            max_ego_spawn_times: 10,
            spawn_backoff: 0.1,
            road_id: 34,
            center_lane_id: -2,
            goal: Goal::default(),
            desired_speed: 8.0,
            max_speed: 10.0,
            eval: false,
            render: false,
            camera: CameraSpec::default(),
        }
    }
}

impl DriveEnvConfig {
    /// Sets the simulator connection parameters.
    pub fn connect(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    /// Sets the number of background autopilot vehicles.
    pub fn number_of_vehicles(mut self, n: usize) -> Self {
        self.number_of_vehicles = n;
        self
    }

    /// Sets the number of background pedestrians.
    pub fn number_of_walkers(mut self, n: usize) -> Self {
        self.number_of_walkers = n;
        self
    }

    /// Sets the number of scripted moving agents.
    pub fn moving_agents(mut self, n: usize) -> Self {
        self.moving_agents = n;
        self
    }

    /// Sets the episode truncation horizon in control steps.
    pub fn max_time_episode(mut self, n: u32) -> Self {
        self.max_time_episode = n;
        self
    }

    /// Sets the goal state.
    pub fn goal(mut self, goal: Goal) -> Self {
        self.goal = goal;
        self
    }

    /// Switches evaluation mode on or off.
    pub fn eval(mut self, eval: bool) -> Self {
        self.eval = eval;
        self
    }

    /// Switches camera rendering on or off.
    pub fn render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    /// Moving-agent placement noise bound for the current mode.
    pub fn noise_bound(&self) -> f64 {
        if self.eval {
            0.5
        } else {
            5.0
        }
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let config = serde_yaml::from_reader(rdr)?;
        Ok(config)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_bound_depends_on_mode() {
        let config = DriveEnvConfig::default();
        assert_eq!(config.noise_bound(), 5.0);
        assert_eq!(config.eval(true).noise_bound(), 0.5);
    }

    #[test]
    fn yaml_roundtrip() {
        let config = DriveEnvConfig::default().number_of_vehicles(3).eval(true);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let restored: DriveEnvConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored.number_of_vehicles, 3);
        assert!(restored.eval);
    }
}
