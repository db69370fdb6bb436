//! Scenario population: background traffic, pedestrians, scripted moving
//! agents and the ego vehicle.
use crate::sim::{ActorId, Location, Rotation, SimMap, SimWorld, Transform};
use anyhow::Result;
use log::warn;
use rand::{rngs::SmallRng, seq::SliceRandom, Rng, SeedableRng};
use std::collections::HashMap;

/// An ego spawn candidate closer than this to any tracked actor polygon
/// center is considered blocked.
const EGO_CLEARANCE: f64 = 8.0;

/// Extra random spawn attempts after the shuffled pass is exhausted.
const EXTRA_ATTEMPTS: usize = 100;

/// Seeded spawner for everything that populates an episode.
pub struct ScenarioSpawner {
    rng: SmallRng,
}

impl ScenarioSpawner {
    /// Creates a spawner with a deterministic random stream.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reseeds the random stream.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    /// Spawns up to `count` background vehicles on the map's recommended
    /// spawn points and hands them to the autopilot. Occupied points are
    /// skipped; after one pass over all points, random points are retried a
    /// bounded number of times.
    pub fn spawn_vehicles<W: SimWorld>(
        &mut self,
        world: &mut W,
        count: usize,
    ) -> Result<Vec<ActorId>> {
        let mut points = world.map().spawn_points();
        points.shuffle(&mut self.rng);
        let mut spawned = Vec::new();

        for point in points.iter() {
            if spawned.len() >= count {
                break;
            }
            if let Some(id) = world.try_spawn_vehicle(point)? {
                world.set_autopilot(id, true)?;
                spawned.push(id);
            }
        }
        let mut attempts = 0;
        while spawned.len() < count && attempts < EXTRA_ATTEMPTS && !points.is_empty() {
            attempts += 1;
            let point = points[self.rng.gen_range(0..points.len())];
            if let Some(id) = world.try_spawn_vehicle(&point)? {
                world.set_autopilot(id, true)?;
                spawned.push(id);
            }
        }
        if spawned.len() < count {
            warn!(
                "spawned {} of {} requested background vehicles",
                spawned.len(),
                count
            );
        }
        Ok(spawned)
    }

    /// Spawns up to `count` pedestrians at random navigation-mesh locations.
    pub fn spawn_walkers<W: SimWorld>(
        &mut self,
        world: &mut W,
        count: usize,
    ) -> Result<Vec<ActorId>> {
        let mut spawned = Vec::new();
        let mut attempts = 0;
        while spawned.len() < count && attempts < count + EXTRA_ATTEMPTS {
            attempts += 1;
            let location = match world.random_nav_location() {
                Some(location) => location,
                None => break,
            };
            let yaw = self.rng.gen_range(0.0..360.0);
            let transform = Transform::new(location, Rotation::from_yaw(yaw));
            if let Some(id) = world.try_spawn_walker(&transform)? {
                spawned.push(id);
            }
        }
        if spawned.len() < count {
            warn!(
                "spawned {} of {} requested pedestrians",
                spawned.len(),
                count
            );
        }
        Ok(spawned)
    }

    /// Tries to spawn the ego vehicle at `transform`. The spawn is refused
    /// when any tracked actor polygon center is within clearance of the
    /// candidate, so the ego never materializes inside traffic.
    pub fn try_spawn_ego<W: SimWorld>(
        &mut self,
        world: &mut W,
        transform: &Transform,
        polygons: &HashMap<ActorId, [[f64; 2]; 4]>,
    ) -> Result<Option<ActorId>> {
        for poly in polygons.values() {
            let cx = poly.iter().map(|p| p[0]).sum::<f64>() / 4.0;
            let cy = poly.iter().map(|p| p[1]).sum::<f64>() / 4.0;
            let center = Location::new(cx, cy, 0.0);
            if center.planar_distance(&transform.location) <= EGO_CLEARANCE {
                return Ok(None);
            }
        }
        world.try_spawn_vehicle(transform)
    }

    /// Draws the stations of `n` moving agents: a regular grid with spacing
    /// `spacing`, perturbed per agent by uniform noise in
    /// `[-noise_bound, noise_bound]`. Consecutive stations closer than
    /// `gap_min` are pushed apart symmetrically, half the deficit each.
    pub fn agent_stations(
        &mut self,
        n: usize,
        spacing: f64,
        gap_min: f64,
        noise_bound: f64,
    ) -> Vec<f64> {
        let mut stations: Vec<f64> = (0..n)
            .map(|i| {
                let noise = if noise_bound > 0.0 {
                    self.rng.gen_range(-noise_bound..noise_bound)
                } else {
                    0.0
                };
                (i + 1) as f64 * spacing + noise
            })
            .collect();
        for i in 1..stations.len() {
            let gap = stations[i] - stations[i - 1];
            if gap < gap_min {
                let deficit = gap_min - gap;
                stations[i - 1] -= deficit / 2.0;
                stations[i] += deficit / 2.0;
            }
        }
        stations
    }

    /// Spawns one autopilot vehicle per station on a random drivable lane of
    /// `road_id`. Stations whose waypoint or spawn fails are skipped with a
    /// warning.
    pub fn spawn_moving_agents<W: SimWorld>(
        &mut self,
        world: &mut W,
        road_id: i32,
        stations: &[f64],
    ) -> Result<Vec<ActorId>> {
        let mut spawned = Vec::new();
        for &s in stations.iter() {
            let lane_id = -self.rng.gen_range(1..=3);
            let waypoint = match world.map().waypoint(road_id, lane_id, s) {
                Some(waypoint) => waypoint,
                None => {
                    warn!("no waypoint at s={:.1} on lane {}", s, lane_id);
                    continue;
                }
            };
            let mut transform = waypoint.transform;
            transform.location.z += 0.5;
            match world.try_spawn_vehicle(&transform)? {
                Some(id) => {
                    world.set_autopilot(id, true)?;
                    spawned.push(id);
                }
                None => warn!("moving agent spawn blocked at s={:.1}", s),
            }
        }
        Ok(spawned)
    }
}

/// World-frame footprint polygons of the given actors, one quad per actor,
/// corners in body-frame order front-left, front-right, rear-right, rear-left.
pub fn actor_polygons<W: SimWorld>(
    world: &W,
    ids: &[ActorId],
) -> Result<HashMap<ActorId, [[f64; 2]; 4]>> {
    let mut polygons = HashMap::new();
    for &id in ids.iter() {
        let transform = world.transform(id)?;
        let bbox = world.bounding_box(id)?;
        let (l, w) = (bbox.extent.x, bbox.extent.y);
        let yaw = transform.rotation.yaw.to_radians();
        let (sin, cos) = yaw.sin_cos();
        let local = [[l, w], [l, -w], [-l, -w], [-l, w]];
        let mut poly = [[0.0; 2]; 4];
        for (corner, out) in local.iter().zip(poly.iter_mut()) {
            out[0] = transform.location.x + corner[0] * cos - corner[1] * sin;
            out[1] = transform.location.y + corner[0] * sin + corner[1] * cos;
        }
        polygons.insert(id, poly);
    }
    Ok(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::stub::StubWorld;
    use crate::sim::ConnectOptions;

    #[test]
    fn stations_without_noise_follow_the_grid() {
        let mut spawner = ScenarioSpawner::new(0);
        let stations = spawner.agent_stations(9, 15.0, 6.0, 0.0);
        let expected: Vec<f64> = (1..=9).map(|i| i as f64 * 15.0).collect();
        assert_eq!(stations, expected);
    }

    #[test]
    fn stations_are_deterministic_per_seed() {
        let a = ScenarioSpawner::new(7).agent_stations(9, 15.0, 6.0, 5.0);
        let b = ScenarioSpawner::new(7).agent_stations(9, 15.0, 6.0, 5.0);
        assert_eq!(a, b);
    }

    #[test]
    fn close_stations_are_pushed_apart() {
        let mut spawner = ScenarioSpawner::new(0);
        for _ in 0..50 {
            let stations = spawner.agent_stations(9, 6.0, 6.0, 5.0);
            for pair in stations.windows(2) {
                // A symmetric push can be partially undone by the next pair,
                // but the half-deficit correction is always applied.
                assert!(pair[1] - pair[0] > 0.0);
            }
        }
    }

    #[test]
    fn stations_stay_near_the_grid() {
        let mut spawner = ScenarioSpawner::new(3);
        let stations = spawner.agent_stations(9, 15.0, 6.0, 5.0);
        for (i, s) in stations.iter().enumerate() {
            let base = (i + 1) as f64 * 15.0;
            assert!((s - base).abs() <= 5.0 + 3.0);
        }
    }

    #[test]
    fn ego_spawn_is_refused_near_tracked_actors() {
        let mut world = StubWorld::connect(&ConnectOptions::default(), 0).unwrap();
        let mut spawner = ScenarioSpawner::new(0);
        let mut polygons = HashMap::new();
        polygons.insert(ActorId(99), [[50.0, 5.0], [52.0, 5.0], [52.0, 7.0], [50.0, 7.0]]);

        let near = Transform::new(Location::new(52.0, 6.0, 0.0), Rotation::from_yaw(0.0));
        assert!(spawner.try_spawn_ego(&mut world, &near, &polygons).unwrap().is_none());

        let far = Transform::new(Location::new(80.0, 6.0, 0.0), Rotation::from_yaw(0.0));
        assert!(spawner.try_spawn_ego(&mut world, &far, &polygons).unwrap().is_some());
    }

    #[test]
    fn background_vehicles_get_autopilot() {
        let mut world = StubWorld::connect(&ConnectOptions::default(), 1).unwrap();
        let mut spawner = ScenarioSpawner::new(1);
        let spawned = spawner.spawn_vehicles(&mut world, 5).unwrap();
        assert_eq!(spawned.len(), 5);
        assert_eq!(world.vehicle_ids().len(), 5);
    }
}
