//! Road-relative (Frenet) state estimation.
//!
//! The simulator reports poses in a screen-space frame whose Y axis grows
//! downwards. The estimator works in the corrected right-handed frame, which
//! negates Y components and yaw angles coming from the simulator.
use crate::sim::{ActorId, SimMap, SimWorld};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Lane whose centerline serves as the longitudinal reference of an episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLane {
    /// Road identifier.
    pub road_id: i32,
    /// Lane identifier.
    pub lane_id: i32,
}

/// Road-relative state of the ego vehicle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EgoState {
    /// Arc-length station along the road reference.
    pub s: f64,
    /// Signed lateral offset from the reference lane centerline; positive is
    /// left of the lane direction in the corrected frame.
    pub d: f64,
    /// Heading error relative to the centerline tangent, radians.
    pub yaw_err: f64,
    /// Velocity component along the vehicle's own forward axis, m/s.
    pub v_long: f64,
}

impl EgoState {
    /// Flattens the state for observation assembly.
    pub fn to_vec(&self) -> Vec<f32> {
        vec![
            self.s as f32,
            self.d as f32,
            self.yaw_err as f32,
            self.v_long as f32,
        ]
    }
}

/// Estimates the road-relative state of `actor` against `reference`.
///
/// The station comes from the orthogonal projection of the actor onto the
/// road network. The lateral offset and heading error are measured against
/// the reference-lane centerline waypoint at that station; when the station
/// lies outside the reference lane's range, the actor's own projected
/// waypoint serves as the fallback centerline.
pub fn estimate<W: SimWorld>(
    world: &W,
    actor: ActorId,
    reference: &ReferenceLane,
) -> Result<EgoState> {
    let transform = world.transform(actor)?;
    let velocity = world.velocity(actor)?;
    let projected = world
        .map()
        .project(&transform.location)
        .ok_or_else(|| anyhow!("actor is off the road network"))?;
    let s = projected.s;
    let center = world
        .map()
        .waypoint(reference.road_id, reference.lane_id, s)
        .unwrap_or(projected);

    let tangent = center.transform.forward();
    // In the corrected frame the unit normal of the tangent is (ty, tx).
    let normal = (tangent.y, tangent.x);
    let delta = (
        transform.location.x - center.transform.location.x,
        -(transform.location.y - center.transform.location.y),
    );
    let d = normal.0 * delta.0 + normal.1 * delta.1;

    let forward_angle = (-tangent.y).atan2(tangent.x).to_degrees().rem_euclid(360.0);
    let global_yaw = (-transform.rotation.yaw).rem_euclid(360.0);
    let yaw_err = (global_yaw - forward_angle).to_radians();

    // Velocity is projected onto the vehicle's own forward axis, not the
    // centerline tangent. The Y flips of both vectors cancel in the dot
    // product.
    let v_long = velocity.dot(&transform.forward());

    Ok(EgoState {
        s,
        d,
        yaw_err,
        v_long,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::stub::{StubWorld, STUB_ROAD_ID};
    use crate::sim::{ConnectOptions, Location, Rotation, Transform};

    const CENTER: ReferenceLane = ReferenceLane {
        road_id: STUB_ROAD_ID,
        lane_id: -2,
    };

    fn world_with_actor(transform: Transform) -> (StubWorld, ActorId) {
        let mut world = StubWorld::connect(&ConnectOptions::default(), 0).unwrap();
        let id = world.try_spawn_vehicle(&transform).unwrap().unwrap();
        (world, id)
    }

    #[test]
    fn on_centerline_has_zero_offset_and_heading_error() {
        let (world, id) = world_with_actor(Transform::new(
            Location::new(42.0, 5.25, 0.0),
            Rotation::from_yaw(0.0),
        ));
        let state = estimate(&world, id, &CENTER).unwrap();
        assert!((state.s - 42.0).abs() < 1e-9);
        assert!(state.d.abs() < 1e-9);
        assert!(state.yaw_err.abs() < 1e-9);
    }

    #[test]
    fn lateral_offset_is_signed() {
        // One meter towards larger screen Y is one meter to the right of the
        // lane direction in the corrected frame.
        let (world, id) = world_with_actor(Transform::new(
            Location::new(42.0, 6.25, 0.0),
            Rotation::from_yaw(0.0),
        ));
        let state = estimate(&world, id, &CENTER).unwrap();
        assert!((state.d + 1.0).abs() < 1e-9);
    }

    #[test]
    fn longitudinal_speed_follows_the_body_axis() {
        let (mut world, id) = world_with_actor(Transform::new(
            Location::new(42.0, 5.25, 0.0),
            Rotation::from_yaw(0.0),
        ));
        world.force_speed(id, 7.5);
        let state = estimate(&world, id, &CENTER).unwrap();
        assert!((state.v_long - 7.5).abs() < 1e-9);
    }

    #[test]
    fn longitudinal_speed_is_kept_under_heading_error() {
        // Heading 90 degrees off the centerline: the projection axis is the
        // vehicle's own forward vector, so the full speed is retained even
        // though the velocity is orthogonal to the centerline tangent.
        let (mut world, id) = world_with_actor(Transform::new(
            Location::new(42.0, 5.25, 0.0),
            Rotation::from_yaw(90.0),
        ));
        world.force_speed(id, 5.0);
        let state = estimate(&world, id, &CENTER).unwrap();
        assert!((state.v_long - 5.0).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_the_projected_lane_when_reference_is_unavailable() {
        let (world, id) = world_with_actor(Transform::new(
            Location::new(42.0, 1.75, 0.0),
            Rotation::from_yaw(0.0),
        ));
        let bogus = ReferenceLane {
            road_id: 99,
            lane_id: -2,
        };
        let state = estimate(&world, id, &bogus).unwrap();
        // Measured against the actor's own lane centerline.
        assert!(state.d.abs() < 1e-9);
    }
}
