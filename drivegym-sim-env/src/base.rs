//! Episode state machine of the driving environment.
use crate::act::{
    to_control, DirectController, DriveAct, ManeuverController, DISCRETE_ACC, DISCRETE_STEER,
};
use crate::config::DriveEnvConfig;
use crate::frenet::{estimate, EgoState, ReferenceLane};
use crate::obs::DriveObs;
use crate::reward::{reward, RewardInput};
use crate::sensor::SensorHub;
use crate::sim::{ActorId, SimMap, SimWorld, Weather};
use crate::spawn::{actor_polygons, ScenarioSpawner};
use anyhow::{anyhow, Result};
use drivegym_core::record::{Record, RecordValue};
use drivegym_core::{Env, Info, Step};
use log::{info, warn};
use ndarray::Array3;
use std::collections::{HashMap, VecDeque};
use std::{thread, time::Duration};

/// The episode terminates with arrival when the ego station is within this
/// distance of the goal station.
pub const ARRIVE_TOLERANCE: f64 = 2.0;

/// Terminal flags of an episode. At most one outcome flag is ever set; once
/// the episode is done, later events of the same episode are ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpisodeFlags {
    /// The episode has ended.
    pub done: bool,
    /// Ended by reaching the goal.
    pub arrived: bool,
    /// Ended by running out of time.
    pub out_of_time: bool,
    /// Ended by a collision.
    pub collided: bool,
}

impl EpisodeFlags {
    /// Clears all flags for a new episode.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Folds this step's events into the flags. Collision dominates timeout,
    /// which dominates arrival.
    pub fn update(&mut self, collided: bool, timed_out: bool, arrived: bool) {
        if self.done {
            return;
        }
        if collided {
            self.collided = true;
            self.done = true;
        } else if timed_out {
            self.out_of_time = true;
            self.done = true;
        } else if arrived {
            self.arrived = true;
            self.done = true;
        }
        debug_assert!(self.collided as u8 + self.out_of_time as u8 + self.arrived as u8 <= 1);
    }
}

/// Step information: the road-relative ego state after the step.
#[derive(Clone, Copy, Debug)]
pub struct DriveInfo {
    /// Road-relative state of the ego vehicle.
    pub ego_state: EgoState,
}

impl Info for DriveInfo {}

/// Geometry of the ego vehicle and the road, captured at reset.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VehicleGeometry {
    /// Full body length.
    pub length: f64,
    /// Full body width.
    pub width: f64,
    /// Lane width of the reference lane.
    pub lane_width: f64,
    /// Lateral distance from the reference centerline beyond which a body
    /// corner is out of bounds.
    pub road_bound: f64,
}

/// Driving environment over a synchronously-stepped simulator session.
///
/// One instance owns one simulator session. [`Env::reset`] builds a fresh
/// scenario (traffic, pedestrians, moving agents, ego, sensors) and
/// [`Env::step`] advances the world by one fixed timestep per call.
pub struct DriveEnv<W: SimWorld> {
    world: W,
    config: DriveEnvConfig,
    spawner: ScenarioSpawner,
    hub: SensorHub,
    controller: Box<dyn ManeuverController>,
    reference: ReferenceLane,
    ego: Option<ActorId>,
    vehicles: Vec<ActorId>,
    walkers: Vec<ActorId>,
    flags: EpisodeFlags,
    ego_state: EgoState,
    prev_s: Option<f64>,
    time_step: u32,
    total_step: u64,
    t: f64,
    geometry: VehicleGeometry,
    road_len: f64,
    vehicle_polygons: VecDeque<HashMap<ActorId, [[f64; 2]; 4]>>,
    walker_polygons: VecDeque<HashMap<ActorId, [[f64; 2]; 4]>>,
}

impl<W: SimWorld> DriveEnv<W> {
    /// Replaces the maneuver controller.
    pub fn set_controller(&mut self, controller: Box<dyn ManeuverController>) {
        self.controller = controller;
    }

    /// Identifier of the ego vehicle of the current episode.
    pub fn ego(&self) -> Option<ActorId> {
        self.ego
    }

    /// Road-relative state of the ego after the last step.
    pub fn ego_state(&self) -> &EgoState {
        &self.ego_state
    }

    /// Terminal flags of the current episode.
    pub fn flags(&self) -> &EpisodeFlags {
        &self.flags
    }

    /// Geometry captured at the last reset.
    pub fn geometry(&self) -> &VehicleGeometry {
        &self.geometry
    }

    /// Number of control steps taken since the environment was built.
    pub fn total_step(&self) -> u64 {
        self.total_step
    }

    /// Mutable access to the simulator session.
    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    /// Reseeds the scenario randomness. Returns the seeds in use.
    pub fn seed(&mut self, seed: u64) -> Vec<u64> {
        self.spawner.reseed(seed);
        vec![seed]
    }

    /// Latest camera frame, available when rendering is enabled.
    pub fn render(&self) -> Option<&Array3<u8>> {
        if self.config.render {
            self.hub.frame()
        } else {
            None
        }
    }

    /// Destroys all actors of the current episode and detaches all sensors.
    /// Safe to call repeatedly.
    pub fn teardown(&mut self) -> Result<()> {
        self.hub.detach(&mut self.world)?;
        if let Some(ego) = self.ego.take() {
            self.world.destroy(ego)?;
        }
        for id in self.vehicles.drain(..) {
            self.world.destroy(id)?;
        }
        for id in self.walkers.drain(..) {
            self.world.destroy(id)?;
        }
        self.vehicle_polygons.clear();
        self.walker_polygons.clear();
        Ok(())
    }

    fn snapshot_polygons(&mut self) -> Result<()> {
        let vehicles = actor_polygons(&self.world, &self.vehicles)?;
        let walkers = actor_polygons(&self.world, &self.walkers)?;
        self.vehicle_polygons.push_back(vehicles);
        self.walker_polygons.push_back(walkers);
        while self.vehicle_polygons.len() > self.config.max_past_step {
            self.vehicle_polygons.pop_front();
        }
        while self.walker_polygons.len() > self.config.max_past_step {
            self.walker_polygons.pop_front();
        }
        Ok(())
    }

    fn reset_inner(&mut self) -> Result<DriveObs> {
        let config = self.config.clone();
        // The whole scenario is rebuilt when the ego cannot be placed.
        'reset: loop {
            self.teardown()?;
            self.flags.clear();
            self.time_step = 0;
            self.t = 0.0;
            self.prev_s = None;
            self.hub.reset();
            self.world.set_synchronous(true, config.dt)?;

            let vehicles = self
                .spawner
                .spawn_vehicles(&mut self.world, config.number_of_vehicles)?;
            self.vehicles.extend(vehicles);
            let walkers = self
                .spawner
                .spawn_walkers(&mut self.world, config.number_of_walkers)?;
            self.walkers.extend(walkers);
            self.snapshot_polygons()?;

            let spawn_points = self.world.map().spawn_points();
            let ego_transform = spawn_points[config.ego_spawn_index % spawn_points.len()];
            let mut ego = None;
            for _ in 0..config.max_ego_spawn_times {
                let polygons = self.vehicle_polygons.back().cloned().unwrap_or_default();
                if let Some(id) =
                    self.spawner
                        .try_spawn_ego(&mut self.world, &ego_transform, &polygons)?
                {
                    ego = Some(id);
                    break;
                }
                thread::sleep(Duration::from_secs_f64(config.spawn_backoff));
                self.snapshot_polygons()?;
            }
            let ego = match ego {
                Some(ego) => ego,
                None => {
                    warn!(
                        "ego spawn blocked {} times, rebuilding the scenario",
                        config.max_ego_spawn_times
                    );
                    continue 'reset;
                }
            };
            self.ego = Some(ego);

            let bbox = self.world.bounding_box(ego)?;
            let lane_width = self
                .world
                .map()
                .project(&ego_transform.location)
                .map(|w| w.lane_width)
                .unwrap_or(3.5);
            self.geometry = VehicleGeometry {
                length: bbox.extent.x * 2.0,
                width: bbox.extent.y * 2.0,
                lane_width,
                road_bound: 1.5 * lane_width,
            };
            self.road_len = config.goal.s;

            let stations = self.spawner.agent_stations(
                config.moving_agents,
                config.agent_spacing,
                config.agent_gap_min,
                config.noise_bound(),
            );
            let agents =
                self.spawner
                    .spawn_moving_agents(&mut self.world, config.road_id, &stations)?;
            self.vehicles.extend(agents);

            let camera = if config.render {
                Some(&config.camera)
            } else {
                None
            };
            self.hub.attach(
                &mut self.world,
                ego,
                config.detect_angle,
                config.hit_radius,
                camera,
            )?;

            self.ego_state = estimate(&self.world, ego, &self.reference)?;
            info!(
                "episode reset: ego at s={:.1}, {} vehicles, {} walkers",
                self.ego_state.s,
                self.vehicles.len(),
                self.walkers.len()
            );
            return Ok(DriveObs::new(&self.ego_state, self.hub.distances()));
        }
    }

    fn step_inner(&mut self, act: &DriveAct) -> Result<(Step<Self>, Record)> {
        let ego = self.ego.ok_or_else(|| anyhow!("step before reset"))?;

        let (acc, steer) = match act {
            // The simulator steers positive-right; commands are given
            // positive-left.
            DriveAct::Continuous { acc, steer } => (*acc as f64, -(*steer as f64)),
            DriveAct::Discrete(index) => (
                DISCRETE_ACC[index / DISCRETE_STEER.len()],
                DISCRETE_STEER[index % DISCRETE_STEER.len()],
            ),
            DriveAct::Maneuver(params) => self.controller.actuation(params, &self.ego_state),
        };
        let control = to_control(acc, steer);
        self.world.apply_control(ego, &control)?;
        self.world.tick()?;
        self.hub.refresh();
        self.snapshot_polygons()?;

        self.t += self.config.dt;
        self.time_step += 1;
        self.total_step += 1;

        self.ego_state = estimate(&self.world, ego, &self.reference)?;
        let velocity = self.world.velocity(ego)?;
        let planar_speed = (velocity.x * velocity.x + velocity.y * velocity.y).sqrt();

        let collided = self.hub.collided();
        let timed_out = self.time_step > self.config.max_time_episode;
        let arrived = self.ego_state.s >= self.config.goal.s - ARRIVE_TOLERANCE;
        self.flags.update(collided, timed_out, arrived);

        let r = reward(&RewardInput {
            ego: &self.ego_state,
            prev_s: self.prev_s,
            planar_speed,
            steer: control.steer,
            collision: self.flags.collided,
            arrived: self.flags.arrived,
            out_of_time: self.flags.out_of_time,
            elapsed: self.t,
            road_len: self.road_len,
            half_length: self.geometry.length / 2.0,
            half_width: self.geometry.width / 2.0,
            road_bound: self.geometry.road_bound,
            speed_threshold: self.config.desired_speed,
            max_speed: self.config.max_speed,
        });
        self.prev_s = Some(self.ego_state.s);

        let obs = DriveObs::new(&self.ego_state, self.hub.distances());
        let mut record = Record::empty();
        record.insert(
            "ego_state",
            RecordValue::Array1(self.ego_state.to_vec()),
        );
        if self.config.render {
            if let Some(frame) = self.hub.frame() {
                let (h, w, c) = frame.dim();
                let data = frame.iter().map(|v| *v as f32).collect();
                record.insert("camera", RecordValue::Array3(data, [h, w, c]));
            }
        }

        let step = Step::new(
            obs,
            act.clone(),
            r as f32,
            self.flags.collided || self.flags.arrived,
            self.flags.out_of_time,
            DriveInfo {
                ego_state: self.ego_state,
            },
        );
        Ok((step, record))
    }
}

impl<W: SimWorld> Env for DriveEnv<W> {
    type Config = DriveEnvConfig;
    type Obs = DriveObs;
    type Act = DriveAct;
    type Info = DriveInfo;

    fn build(config: &Self::Config, seed: u64) -> Result<Self> {
        let mut world = W::connect(&config.connect, seed)?;
        world.set_weather(Weather::ClearNoon)?;
        let hub = SensorHub::new(config.detector_num, config.detect_range);
        let reference = ReferenceLane {
            road_id: config.road_id,
            lane_id: config.center_lane_id,
        };
        Ok(Self {
            world,
            config: config.clone(),
            spawner: ScenarioSpawner::new(seed),
            hub,
            controller: Box::new(DirectController),
            reference,
            ego: None,
            vehicles: Vec::new(),
            walkers: Vec::new(),
            flags: EpisodeFlags::default(),
            ego_state: EgoState::default(),
            prev_s: None,
            time_step: 0,
            total_step: 0,
            t: 0.0,
            geometry: VehicleGeometry::default(),
            road_len: 0.0,
            vehicle_polygons: VecDeque::new(),
            walker_polygons: VecDeque::new(),
        })
    }

    fn reset(&mut self) -> Result<Self::Obs> {
        self.reset_inner()
    }

    fn step(&mut self, a: &Self::Act) -> (Step<Self>, Record) {
        self.step_inner(a).expect("simulator session lost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::stub::StubWorld;
    use crate::sim::{Location, Rotation, Transform};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn quiet_config() -> DriveEnvConfig {
        let mut config = DriveEnvConfig::default();
        config.number_of_vehicles = 0;
        config.number_of_walkers = 0;
        config.moving_agents = 0;
        config
    }

    #[test]
    fn collision_dominates_timeout_and_arrival() {
        let mut flags = EpisodeFlags::default();
        flags.update(true, true, true);
        assert!(flags.done && flags.collided);
        assert!(!flags.out_of_time && !flags.arrived);
    }

    #[test]
    fn timeout_dominates_arrival() {
        let mut flags = EpisodeFlags::default();
        flags.update(false, true, true);
        assert!(flags.out_of_time && !flags.arrived);
    }

    #[test]
    fn flags_are_absorbing() {
        let mut flags = EpisodeFlags::default();
        flags.update(false, false, true);
        flags.update(true, false, false);
        assert!(flags.arrived && !flags.collided);
    }

    #[test]
    fn first_step_has_no_progress_reward() {
        init();
        let mut env = DriveEnv::<StubWorld>::build(&quiet_config(), 0).unwrap();
        env.reset().unwrap();
        let (step, _) = env.step(&DriveAct::Maneuver(vec![0.0, 0.0]));
        assert_eq!(step.reward, 0.0);
        assert!(!step.is_done());
    }

    #[test]
    fn timeout_truncates_without_terminating() {
        init();
        let mut config = quiet_config();
        config.max_time_episode = 1;
        let mut env = DriveEnv::<StubWorld>::build(&config, 0).unwrap();
        env.reset().unwrap();
        let (step, _) = env.step(&DriveAct::Maneuver(vec![0.0, 0.0]));
        assert!(!step.is_done());
        let (step, _) = env.step(&DriveAct::Maneuver(vec![0.0, 0.0]));
        assert!(step.is_truncated);
        assert!(!step.is_terminated);
        assert!(env.flags().out_of_time);
    }

    #[test]
    fn arrival_terminates_the_episode() {
        init();
        let mut env = DriveEnv::<StubWorld>::build(&quiet_config(), 0).unwrap();
        env.reset().unwrap();
        let ego = env.ego().unwrap();
        let goal_s = env.config.goal.s;
        env.world_mut().force_transform(
            ego,
            Transform::new(
                Location::new(goal_s - 1.0, 5.25, 0.0),
                Rotation::from_yaw(0.0),
            ),
        );
        let (step, _) = env.step(&DriveAct::Maneuver(vec![0.0, 0.0]));
        assert!(step.is_terminated);
        assert!(env.flags().arrived);
        // Arrival pays out the distance-over-time bonus.
        assert!(step.reward > 0.0);
    }

    #[test]
    fn teardown_is_idempotent() {
        init();
        let mut env = DriveEnv::<StubWorld>::build(&quiet_config(), 0).unwrap();
        env.reset().unwrap();
        env.teardown().unwrap();
        env.teardown().unwrap();
        assert!(env.ego().is_none());
    }

    #[test]
    fn step_records_the_ego_state() {
        init();
        let mut env = DriveEnv::<StubWorld>::build(&quiet_config(), 0).unwrap();
        env.reset().unwrap();
        let (_, record) = env.step(&DriveAct::Maneuver(vec![1.0, 0.0]));
        let state = record.get_array1("ego_state").unwrap();
        assert_eq!(state.len(), 4);
    }

    #[test]
    fn rendering_records_the_camera_frame() {
        init();
        let mut config = quiet_config();
        config.render = true;
        let mut env = DriveEnv::<StubWorld>::build(&config, 0).unwrap();
        env.reset().unwrap();
        let (_, record) = env.step(&DriveAct::Maneuver(vec![0.0, 0.0]));
        match record.get("camera").unwrap() {
            RecordValue::Array3(data, shape) => {
                assert_eq!(shape[2], 3);
                assert_eq!(data.len(), shape[0] * shape[1] * shape[2]);
            }
            _ => panic!("camera frame must be a 3-dimensional array"),
        }
    }
}
