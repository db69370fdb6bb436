//! Boundary to the traffic simulator.
//!
//! The episode state machine is generic over [`SimWorld`], which mirrors the
//! session surface of a CARLA-style simulator: synchronized stepping, actor
//! spawning and destruction, pose/velocity/bounding-box queries, map-relative
//! waypoint queries and push-callback sensors. The world advances only on
//! [`SimWorld::tick`], and `tick` must return only after every sensor
//! callback registered for that tick has completed; the sensor hub relies on
//! this barrier instead of locking.
pub mod stub;
mod types;
mod world;

pub use types::{
    ActorId, BoundingBox, CollisionEvent, ImageFrame, Location, ObstacleEvent, Rotation, SensorId,
    Transform, VehicleControl, Waypoint,
};
pub use world::{
    CameraCallback, CameraSpec, CollisionCallback, ConnectOptions, ObstacleCallback,
    ObstacleSensorSpec, SimMap, SimWorld, Weather,
};
