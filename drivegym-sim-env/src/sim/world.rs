//! Traits describing a simulator session.
use super::types::{
    ActorId, BoundingBox, CollisionEvent, ImageFrame, Location, ObstacleEvent, SensorId, Transform,
    VehicleControl, Waypoint,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Callback invoked on every collision of the parent actor.
pub type CollisionCallback = Box<dyn FnMut(CollisionEvent) + Send>;

/// Callback invoked on every tick for an obstacle detector; `None` means no
/// hit within range on this tick.
pub type ObstacleCallback = Box<dyn FnMut(Option<ObstacleEvent>) + Send>;

/// Callback invoked whenever the camera captures a frame.
pub type CameraCallback = Box<dyn FnMut(ImageFrame) + Send>;

/// Connection parameters of a simulator session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Host running the simulator server.
    pub host: String,
    /// RPC port of the simulator server.
    pub port: u16,
    /// Scene to load.
    pub town: String,
    /// Client timeout in seconds.
    pub timeout: f64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2000,
            town: "Town05".to_string(),
            timeout: 10.0,
        }
    }
}

/// Weather presets of the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weather {
    /// Clear sky, sun at noon.
    ClearNoon,
    /// Overcast, sun at noon.
    CloudyNoon,
    /// Wet road, sun at noon.
    WetNoon,
}

/// Geometry of one ray-cast obstacle detector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ObstacleSensorSpec {
    /// Yaw offset of the ray relative to the parent's forward axis, degrees.
    pub yaw_offset: f64,
    /// Maximum detection distance.
    pub range: f64,
    /// Radius of the detection cylinder around the ray.
    pub hit_radius: f64,
}

/// Camera sensor parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CameraSpec {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Horizontal field of view, degrees.
    pub fov: f64,
}

impl Default for CameraSpec {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            fov: 70.0,
        }
    }
}

/// Map-relative queries of a loaded scene.
pub trait SimMap {
    /// Projects a world location onto the road network and returns the
    /// waypoint of the orthogonal projection, with its arc-length station.
    fn project(&self, location: &Location) -> Option<Waypoint>;

    /// Returns the lane-centerline waypoint at `s` on the given road/lane,
    /// or `None` if the station lies outside the road range.
    fn waypoint(&self, road_id: i32, lane_id: i32, s: f64) -> Option<Waypoint>;

    /// Returns the recommended vehicle spawn transforms of the scene.
    fn spawn_points(&self) -> Vec<Transform>;
}

/// One simulator world session.
///
/// Each environment instance owns exactly one session; concurrent rollouts
/// require independent sessions.
///
/// # Tick contract
///
/// In synchronized-stepping mode, [`tick`](SimWorld::tick) advances the world
/// by exactly one fixed timestep and returns only after every sensor callback
/// triggered by that tick has completed. The step loop reads sensor state
/// only between ticks, which is the sole synchronization point of the design.
pub trait SimWorld {
    /// Map query interface of the loaded scene.
    type Map: SimMap;

    /// Establishes a session with the simulator and loads the scene.
    ///
    /// A connection failure here is fatal; there is no reconnect policy at
    /// this layer.
    fn connect(opts: &ConnectOptions, seed: u64) -> Result<Self>
    where
        Self: Sized;

    /// Returns the scene map.
    fn map(&self) -> &Self::Map;

    /// Sets the weather of the scene.
    fn set_weather(&mut self, weather: Weather) -> Result<()>;

    /// Enables or disables synchronized-stepping mode with the given fixed
    /// timestep in seconds.
    fn set_synchronous(&mut self, enabled: bool, fixed_delta: f64) -> Result<()>;

    /// Advances the world by one fixed timestep. See the trait-level tick
    /// contract.
    fn tick(&mut self) -> Result<()>;

    /// Tries to spawn a vehicle; returns `None` when the spawn point is
    /// blocked or the simulator rejects the request.
    fn try_spawn_vehicle(&mut self, transform: &Transform) -> Result<Option<ActorId>>;

    /// Tries to spawn a pedestrian with its AI controller started and a
    /// randomized walking speed.
    fn try_spawn_walker(&mut self, transform: &Transform) -> Result<Option<ActorId>>;

    /// Returns a random location on the pedestrian navigation mesh.
    fn random_nav_location(&mut self) -> Option<Location>;

    /// Enables or disables the built-in autopilot of a vehicle.
    fn set_autopilot(&mut self, actor: ActorId, enabled: bool) -> Result<()>;

    /// Destroys an actor. Destroying an already-destroyed actor is a no-op.
    fn destroy(&mut self, actor: ActorId) -> Result<()>;

    /// Identifiers of all alive vehicles.
    fn vehicle_ids(&self) -> Vec<ActorId>;

    /// Identifiers of all alive pedestrians.
    fn walker_ids(&self) -> Vec<ActorId>;

    /// World pose of an actor.
    fn transform(&self, actor: ActorId) -> Result<Transform>;

    /// World velocity of an actor.
    fn velocity(&self, actor: ActorId) -> Result<Location>;

    /// Bounding box of an actor in its body frame.
    fn bounding_box(&self, actor: ActorId) -> Result<BoundingBox>;

    /// Applies per-tick actuation to a vehicle.
    fn apply_control(&mut self, actor: ActorId, control: &VehicleControl) -> Result<()>;

    /// Attaches a collision sensor to an actor.
    fn attach_collision_sensor(
        &mut self,
        actor: ActorId,
        callback: CollisionCallback,
    ) -> Result<SensorId>;

    /// Attaches a ray-cast obstacle detector to an actor. The callback fires
    /// on every tick, with `None` when nothing is within range.
    fn attach_obstacle_sensor(
        &mut self,
        actor: ActorId,
        spec: &ObstacleSensorSpec,
        callback: ObstacleCallback,
    ) -> Result<SensorId>;

    /// Attaches a camera to an actor.
    fn attach_camera(
        &mut self,
        actor: ActorId,
        spec: &CameraSpec,
        callback: CameraCallback,
    ) -> Result<SensorId>;

    /// Detaches a sensor. Detaching an unknown sensor is a no-op.
    fn detach(&mut self, sensor: SensorId) -> Result<()>;
}
