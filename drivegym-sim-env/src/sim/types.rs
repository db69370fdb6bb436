//! Geometry and actor types shared across the simulator boundary.
//!
//! The simulator uses a screen-space convention: the Y axis grows downwards,
//! so the coordinate frame is left-handed relative to standard math
//! convention. Consumers that need right-handed math (the Frenet estimator)
//! apply the Y flip themselves.
use serde::{Deserialize, Serialize};

/// A 3-component vector in simulator world coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// X component (meters).
    pub x: f64,
    /// Y component (meters, screen-space: positive is "down").
    pub y: f64,
    /// Z component (meters).
    pub z: f64,
}

impl Location {
    /// Constructs a vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Dot product.
    pub fn dot(&self, other: &Location) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Planar (XY) distance to another point.
    pub fn planar_distance(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// An actor orientation. Only the yaw component is relevant to the planar
/// vehicle model; it is kept in degrees as the simulator reports it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    /// Yaw in degrees, about the world Z axis.
    pub yaw: f64,
}

impl Rotation {
    /// Constructs a rotation from a yaw angle in degrees.
    pub fn from_yaw(yaw: f64) -> Self {
        Self { yaw }
    }
}

/// A pose: location plus orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Location of the actor origin.
    pub location: Location,
    /// Orientation of the actor.
    pub rotation: Rotation,
}

impl Transform {
    /// Constructs a transform.
    pub fn new(location: Location, rotation: Rotation) -> Self {
        Self { location, rotation }
    }

    /// Unit vector along the actor's forward axis, in world coordinates.
    pub fn forward(&self) -> Location {
        let yaw = self.rotation.yaw.to_radians();
        Location::new(yaw.cos(), yaw.sin(), 0.0)
    }
}

/// Axis-aligned half extents of an actor in its body frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Half extents: x is half the length, y half the width, z half the height.
    pub extent: Location,
}

/// Per-tick vehicle actuation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleControl {
    /// Throttle in `[0, 1]`.
    pub throttle: f64,
    /// Steering in `[-1, 1]`.
    pub steer: f64,
    /// Brake in `[0, 1]`.
    pub brake: f64,
}

/// A map waypoint: a pose on a lane centerline together with its road-relative
/// coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Pose of the waypoint; the rotation is the centerline tangent heading.
    pub transform: Transform,
    /// Arc-length station along the road reference.
    pub s: f64,
    /// Road identifier.
    pub road_id: i32,
    /// Lane identifier (negative lanes are right of the road reference line).
    pub lane_id: i32,
    /// Width of the lane at this waypoint.
    pub lane_width: f64,
}

/// Opaque handle to a spawned actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

/// Opaque handle to an attached sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorId(pub u64);

/// Payload of a collision sensor callback.
#[derive(Clone, Copy, Debug)]
pub struct CollisionEvent {
    /// Impulse applied by the collision, in world axes.
    pub normal_impulse: Location,
}

/// Payload of an obstacle (ray-cast) sensor callback when a hit is reported.
#[derive(Clone, Copy, Debug)]
pub struct ObstacleEvent {
    /// Distance to the detected obstacle along the ray.
    pub distance: f64,
}

/// Payload of a camera callback: one raw frame in the simulator's native
/// BGRA byte order, row-major.
#[derive(Clone, Debug)]
pub struct ImageFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// `height * width * 4` bytes, BGRA.
    pub data: Vec<u8>,
}
