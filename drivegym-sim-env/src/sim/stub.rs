//! Deterministic in-process simulator backend.
//!
//! [`StubWorld`] implements the full [`SimWorld`] contract on a straight
//! multi-lane road with a trivial kinematic vehicle model. Sensor callbacks
//! are dispatched inside [`SimWorld::tick`], which makes the tick barrier of
//! the boundary hold by construction. It exists so that the episode state
//! machine, the estimators and the trainer can be exercised without a
//! simulator server.
use super::types::{
    ActorId, BoundingBox, CollisionEvent, ImageFrame, Location, ObstacleEvent, Rotation, SensorId,
    Transform, VehicleControl, Waypoint,
};
use super::world::{
    CameraCallback, CameraSpec, CollisionCallback, ConnectOptions, ObstacleCallback,
    ObstacleSensorSpec, SimMap, SimWorld, Weather,
};
use anyhow::{anyhow, bail, Result};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::collections::BTreeMap;

/// Road identifier of the single road of the stub map.
pub const STUB_ROAD_ID: i32 = 34;
/// Drivable lane identifiers, rightmost last.
pub const STUB_LANE_IDS: [i32; 3] = [-1, -2, -3];
/// Lane width of the stub map.
pub const STUB_LANE_WIDTH: f64 = 3.5;
/// Maximum station of the stub road.
pub const STUB_ROAD_LEN: f64 = 300.0;

const SPAWN_BLOCK_RADIUS: f64 = 2.0;
const COLLISION_RADIUS: f64 = 3.0;
const AUTOPILOT_SPEED: f64 = 5.0;
const STEER_RATE_DEG: f64 = 60.0;
const BODY_RADIUS: f64 = 1.0;

/// Map of [`StubWorld`]: one straight road along +X with three lanes.
pub struct StubMap;

impl StubMap {
    fn lane_center_y(lane_id: i32) -> f64 {
        ((-lane_id) as f64 - 0.5) * STUB_LANE_WIDTH
    }

    fn make_waypoint(lane_id: i32, s: f64) -> Waypoint {
        Waypoint {
            transform: Transform::new(
                Location::new(s, Self::lane_center_y(lane_id), 0.0),
                Rotation::from_yaw(0.0),
            ),
            s,
            road_id: STUB_ROAD_ID,
            lane_id,
            lane_width: STUB_LANE_WIDTH,
        }
    }
}

impl SimMap for StubMap {
    fn project(&self, location: &Location) -> Option<Waypoint> {
        let s = location.x.max(0.0).min(STUB_ROAD_LEN);
        let lane = *STUB_LANE_IDS
            .iter()
            .min_by(|a, b| {
                let da = (Self::lane_center_y(**a) - location.y).abs();
                let db = (Self::lane_center_y(**b) - location.y).abs();
                da.partial_cmp(&db).unwrap()
            })
            .unwrap();
        Some(Self::make_waypoint(lane, s))
    }

    fn waypoint(&self, road_id: i32, lane_id: i32, s: f64) -> Option<Waypoint> {
        if road_id != STUB_ROAD_ID || !STUB_LANE_IDS.contains(&lane_id) {
            return None;
        }
        if s < 0.0 || s > STUB_ROAD_LEN {
            return None;
        }
        Some(Self::make_waypoint(lane_id, s))
    }

    fn spawn_points(&self) -> Vec<Transform> {
        let mut points = Vec::new();
        for lane_id in STUB_LANE_IDS.iter() {
            for i in 1..60 {
                let s = 5.0 * i as f64;
                points.push(Self::make_waypoint(*lane_id, s).transform);
            }
        }
        points
    }
}

struct StubActor {
    transform: Transform,
    speed: f64,
    control: VehicleControl,
    autopilot: bool,
    walker: bool,
}

enum StubSensor {
    Collision(ActorId, CollisionCallback),
    Obstacle(ActorId, ObstacleSensorSpec, ObstacleCallback),
    Camera(ActorId, CameraSpec, CameraCallback),
}

/// Deterministic kinematic backend implementing [`SimWorld`].
pub struct StubWorld {
    map: StubMap,
    actors: BTreeMap<ActorId, StubActor>,
    sensors: BTreeMap<SensorId, StubSensor>,
    next_actor: u64,
    next_sensor: u64,
    synchronous: bool,
    fixed_delta: f64,
    rng: SmallRng,
}

impl StubWorld {
    /// Moves an actor to the given pose. Test helper.
    pub fn force_transform(&mut self, actor: ActorId, transform: Transform) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.transform = transform;
        }
    }

    /// Overrides an actor's forward speed. Test helper.
    pub fn force_speed(&mut self, actor: ActorId, speed: f64) {
        if let Some(a) = self.actors.get_mut(&actor) {
            a.speed = speed;
        }
    }

    fn spawn(&mut self, transform: &Transform, walker: bool) -> Option<ActorId> {
        let blocked = self
            .actors
            .values()
            .any(|a| a.transform.location.planar_distance(&transform.location) < SPAWN_BLOCK_RADIUS);
        if blocked {
            return None;
        }
        let id = ActorId(self.next_actor);
        self.next_actor += 1;
        self.actors.insert(
            id,
            StubActor {
                transform: *transform,
                speed: 0.0,
                control: VehicleControl::default(),
                autopilot: false,
                walker,
            },
        );
        Some(id)
    }

    fn advance_actors(&mut self) {
        let dt = self.fixed_delta;
        for actor in self.actors.values_mut() {
            if actor.walker {
                continue;
            }
            if actor.autopilot {
                actor.speed = AUTOPILOT_SPEED;
            } else {
                let acc = actor.control.throttle * 3.0 - actor.control.brake * 8.0;
                actor.speed = (actor.speed + acc * dt).max(0.0);
                actor.transform.rotation.yaw += actor.control.steer * STEER_RATE_DEG * dt;
            }
            let forward = actor.transform.forward();
            actor.transform.location.x += forward.x * actor.speed * dt;
            actor.transform.location.y += forward.y * actor.speed * dt;
        }
    }

    fn dispatch_sensors(&mut self) {
        // Snapshot of actor poses, so callbacks can be invoked mutably below.
        let poses: Vec<(ActorId, Location, f64)> = self
            .actors
            .iter()
            .map(|(id, a)| (*id, a.transform.location, a.transform.rotation.yaw))
            .collect();

        for sensor in self.sensors.values_mut() {
            match sensor {
                StubSensor::Collision(parent, cb) => {
                    let parent_loc = match poses.iter().find(|(id, _, _)| id == parent) {
                        Some((_, loc, _)) => *loc,
                        None => continue,
                    };
                    let hit = poses
                        .iter()
                        .any(|(id, loc, _)| id != parent && loc.planar_distance(&parent_loc) < COLLISION_RADIUS);
                    if hit {
                        cb(CollisionEvent {
                            normal_impulse: Location::new(500.0, 0.0, 0.0),
                        });
                    }
                }
                StubSensor::Obstacle(parent, spec, cb) => {
                    let (parent_loc, parent_yaw) =
                        match poses.iter().find(|(id, _, _)| id == parent) {
                            Some((_, loc, yaw)) => (*loc, *yaw),
                            None => continue,
                        };
                    let ray = (parent_yaw + spec.yaw_offset).to_radians();
                    let (dir_x, dir_y) = (ray.cos(), ray.sin());
                    let mut nearest: Option<f64> = None;
                    for (id, loc, _) in poses.iter() {
                        if id == parent {
                            continue;
                        }
                        let dx = loc.x - parent_loc.x;
                        let dy = loc.y - parent_loc.y;
                        let along = dx * dir_x + dy * dir_y;
                        let lateral = (dx * dir_y - dy * dir_x).abs();
                        if along > 0.0 && along <= spec.range && lateral <= spec.hit_radius + BODY_RADIUS
                        {
                            nearest = Some(nearest.map_or(along, |d: f64| d.min(along)));
                        }
                    }
                    cb(nearest.map(|distance| ObstacleEvent { distance }));
                }
                StubSensor::Camera(parent, spec, cb) => {
                    if !poses.iter().any(|(id, _, _)| id == parent) {
                        continue;
                    }
                    let n = (spec.width * spec.height) as usize;
                    let mut data = Vec::with_capacity(n * 4);
                    for _ in 0..n {
                        data.extend_from_slice(&[10, 20, 30, 255]);
                    }
                    cb(ImageFrame {
                        width: spec.width,
                        height: spec.height,
                        data,
                    });
                }
            }
        }
    }
}

impl SimWorld for StubWorld {
    type Map = StubMap;

    fn connect(_opts: &ConnectOptions, seed: u64) -> Result<Self> {
        Ok(Self {
            map: StubMap,
            actors: BTreeMap::new(),
            sensors: BTreeMap::new(),
            next_actor: 1,
            next_sensor: 1,
            synchronous: false,
            fixed_delta: 0.1,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    fn map(&self) -> &Self::Map {
        &self.map
    }

    fn set_weather(&mut self, _weather: Weather) -> Result<()> {
        Ok(())
    }

    fn set_synchronous(&mut self, enabled: bool, fixed_delta: f64) -> Result<()> {
        self.synchronous = enabled;
        self.fixed_delta = fixed_delta;
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        if !self.synchronous {
            bail!("tick requested outside synchronized-stepping mode");
        }
        self.advance_actors();
        // All callbacks complete before tick returns, per the boundary contract.
        self.dispatch_sensors();
        Ok(())
    }

    fn try_spawn_vehicle(&mut self, transform: &Transform) -> Result<Option<ActorId>> {
        Ok(self.spawn(transform, false))
    }

    fn try_spawn_walker(&mut self, transform: &Transform) -> Result<Option<ActorId>> {
        Ok(self.spawn(transform, true))
    }

    fn random_nav_location(&mut self) -> Option<Location> {
        let x = self.rng.gen_range(0.0..STUB_ROAD_LEN);
        Some(Location::new(x, 12.0, 0.0))
    }

    fn set_autopilot(&mut self, actor: ActorId, enabled: bool) -> Result<()> {
        let a = self
            .actors
            .get_mut(&actor)
            .ok_or_else(|| anyhow!("no such actor: {:?}", actor))?;
        a.autopilot = enabled;
        Ok(())
    }

    fn destroy(&mut self, actor: ActorId) -> Result<()> {
        self.actors.remove(&actor);
        Ok(())
    }

    fn vehicle_ids(&self) -> Vec<ActorId> {
        self.actors
            .iter()
            .filter(|(_, a)| !a.walker)
            .map(|(id, _)| *id)
            .collect()
    }

    fn walker_ids(&self) -> Vec<ActorId> {
        self.actors
            .iter()
            .filter(|(_, a)| a.walker)
            .map(|(id, _)| *id)
            .collect()
    }

    fn transform(&self, actor: ActorId) -> Result<Transform> {
        self.actors
            .get(&actor)
            .map(|a| a.transform)
            .ok_or_else(|| anyhow!("no such actor: {:?}", actor))
    }

    fn velocity(&self, actor: ActorId) -> Result<Location> {
        let a = self
            .actors
            .get(&actor)
            .ok_or_else(|| anyhow!("no such actor: {:?}", actor))?;
        let forward = a.transform.forward();
        Ok(Location::new(
            forward.x * a.speed,
            forward.y * a.speed,
            0.0,
        ))
    }

    fn bounding_box(&self, actor: ActorId) -> Result<BoundingBox> {
        self.actors
            .get(&actor)
            .map(|_| BoundingBox {
                extent: Location::new(2.4, 1.0, 0.75),
            })
            .ok_or_else(|| anyhow!("no such actor: {:?}", actor))
    }

    fn apply_control(&mut self, actor: ActorId, control: &VehicleControl) -> Result<()> {
        let a = self
            .actors
            .get_mut(&actor)
            .ok_or_else(|| anyhow!("no such actor: {:?}", actor))?;
        a.control = *control;
        Ok(())
    }

    fn attach_collision_sensor(
        &mut self,
        actor: ActorId,
        callback: CollisionCallback,
    ) -> Result<SensorId> {
        let id = SensorId(self.next_sensor);
        self.next_sensor += 1;
        self.sensors.insert(id, StubSensor::Collision(actor, callback));
        Ok(id)
    }

    fn attach_obstacle_sensor(
        &mut self,
        actor: ActorId,
        spec: &ObstacleSensorSpec,
        callback: ObstacleCallback,
    ) -> Result<SensorId> {
        let id = SensorId(self.next_sensor);
        self.next_sensor += 1;
        self.sensors
            .insert(id, StubSensor::Obstacle(actor, *spec, callback));
        Ok(id)
    }

    fn attach_camera(
        &mut self,
        actor: ActorId,
        spec: &CameraSpec,
        callback: CameraCallback,
    ) -> Result<SensorId> {
        let id = SensorId(self.next_sensor);
        self.next_sensor += 1;
        self.sensors
            .insert(id, StubSensor::Camera(actor, *spec, callback));
        Ok(id)
    }

    fn detach(&mut self, sensor: SensorId) -> Result<()> {
        self.sensors.remove(&sensor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> StubWorld {
        StubWorld::connect(&ConnectOptions::default(), 0).unwrap()
    }

    #[test]
    fn waypoint_outside_road_range_is_none() {
        let w = world();
        assert!(w.map().waypoint(STUB_ROAD_ID, -2, 100.0).is_some());
        assert!(w.map().waypoint(STUB_ROAD_ID, -2, 301.0).is_none());
        assert!(w.map().waypoint(STUB_ROAD_ID, -4, 100.0).is_none());
        assert!(w.map().waypoint(0, -2, 100.0).is_none());
    }

    #[test]
    fn spawn_is_rejected_on_occupied_transform() {
        let mut w = world();
        let tf = Transform::new(Location::new(50.0, 5.25, 0.0), Rotation::from_yaw(0.0));
        let first = w.try_spawn_vehicle(&tf).unwrap();
        assert!(first.is_some());
        assert!(w.try_spawn_vehicle(&tf).unwrap().is_none());
    }

    #[test]
    fn destroy_twice_is_a_noop() {
        let mut w = world();
        let tf = Transform::new(Location::new(50.0, 5.25, 0.0), Rotation::from_yaw(0.0));
        let id = w.try_spawn_vehicle(&tf).unwrap().unwrap();
        w.destroy(id).unwrap();
        w.destroy(id).unwrap();
    }

    #[test]
    fn tick_outside_sync_mode_fails() {
        let mut w = world();
        assert!(w.tick().is_err());
        w.set_synchronous(true, 0.1).unwrap();
        assert!(w.tick().is_ok());
    }

    #[test]
    fn throttle_moves_vehicle_forward() {
        let mut w = world();
        w.set_synchronous(true, 0.1).unwrap();
        let tf = Transform::new(Location::new(10.0, 5.25, 0.0), Rotation::from_yaw(0.0));
        let id = w.try_spawn_vehicle(&tf).unwrap().unwrap();
        w.apply_control(
            id,
            &VehicleControl {
                throttle: 1.0,
                steer: 0.0,
                brake: 0.0,
            },
        )
        .unwrap();
        for _ in 0..10 {
            w.tick().unwrap();
        }
        assert!(w.transform(id).unwrap().location.x > 10.0);
    }
}
