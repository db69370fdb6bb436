//! Aggregation of asynchronous sensor callbacks into per-tick state.
//!
//! Simulator sensors deliver data through callbacks that may run on simulator
//! threads. Each callback forwards its payload over a channel; the step loop
//! drains the channel with [`SensorHub::refresh`] after every tick. The tick
//! barrier of [`SimWorld::tick`] guarantees that all events of a tick are in
//! the channel before `refresh` runs, so no other synchronization is needed.
use crate::sim::{
    ActorId, CameraSpec, ImageFrame, ObstacleSensorSpec, SensorId, SimWorld,
};
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::Array3;
use std::collections::VecDeque;

/// Only the most recent collision is retained.
const COLLISION_HISTORY: usize = 1;

enum SensorEvent {
    Collision { impulse: f64 },
    Obstacle { slot: usize, distance: Option<f64> },
    Frame(ImageFrame),
}

/// Latest-state view over all sensors attached to the ego vehicle.
pub struct SensorHub {
    tx: Sender<SensorEvent>,
    rx: Receiver<SensorEvent>,
    distances: Vec<f64>,
    collision: VecDeque<f64>,
    frame: Option<Array3<u8>>,
    detect_range: f64,
    sensor_ids: Vec<SensorId>,
}

impl SensorHub {
    /// Creates a hub for a fan of `detector_num` obstacle detectors. All
    /// distances start at `detect_range`, the no-hit sentinel.
    pub fn new(detector_num: usize, detect_range: f64) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            distances: vec![detect_range; detector_num],
            collision: VecDeque::new(),
            frame: None,
            detect_range,
            sensor_ids: Vec::new(),
        }
    }

    /// Attaches the collision sensor, the detector fan and (optionally) the
    /// camera to the ego vehicle.
    ///
    /// Detector `i` of `n` is aimed at `-detect_angle/2 + detect_angle/(n-1) * i`
    /// relative to the vehicle's forward axis, so the fan spans the aperture
    /// symmetrically.
    pub fn attach<W: SimWorld>(
        &mut self,
        world: &mut W,
        ego: ActorId,
        detect_angle: f64,
        hit_radius: f64,
        camera: Option<&CameraSpec>,
    ) -> Result<()> {
        let tx = self.tx.clone();
        let id = world.attach_collision_sensor(
            ego,
            Box::new(move |event| {
                let _ = tx.send(SensorEvent::Collision {
                    impulse: event.normal_impulse.norm(),
                });
            }),
        )?;
        self.sensor_ids.push(id);

        let n = self.distances.len();
        for slot in 0..n {
            let yaw_offset = if n > 1 {
                -detect_angle / 2.0 + detect_angle / (n - 1) as f64 * slot as f64
            } else {
                0.0
            };
            let spec = ObstacleSensorSpec {
                yaw_offset,
                range: self.detect_range,
                hit_radius,
            };
            let tx = self.tx.clone();
            let id = world.attach_obstacle_sensor(
                ego,
                &spec,
                Box::new(move |event| {
                    let _ = tx.send(SensorEvent::Obstacle {
                        slot,
                        distance: event.map(|e| e.distance),
                    });
                }),
            )?;
            self.sensor_ids.push(id);
        }

        if let Some(spec) = camera {
            let tx = self.tx.clone();
            let id = world.attach_camera(
                ego,
                spec,
                Box::new(move |frame| {
                    let _ = tx.send(SensorEvent::Frame(frame));
                }),
            )?;
            self.sensor_ids.push(id);
        }
        Ok(())
    }

    /// Detaches every sensor attached by [`attach`](Self::attach).
    pub fn detach<W: SimWorld>(&mut self, world: &mut W) -> Result<()> {
        for id in self.sensor_ids.drain(..) {
            world.detach(id)?;
        }
        Ok(())
    }

    /// Drains all pending sensor events and folds them into the latest state.
    /// Call once after every tick.
    pub fn refresh(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                SensorEvent::Collision { impulse } => {
                    self.collision.push_back(impulse);
                    while self.collision.len() > COLLISION_HISTORY {
                        self.collision.pop_front();
                    }
                }
                SensorEvent::Obstacle { slot, distance } => {
                    if let Some(d) = self.distances.get_mut(slot) {
                        *d = distance.unwrap_or(self.detect_range);
                    }
                }
                SensorEvent::Frame(frame) => {
                    self.frame = Some(bgra_to_rgb(&frame));
                }
            }
        }
    }

    /// Resets all sensor state to its initial values and discards any events
    /// still in flight.
    pub fn reset(&mut self) {
        for d in self.distances.iter_mut() {
            *d = self.detect_range;
        }
        self.collision.clear();
        self.frame = None;
        while self.rx.try_recv().is_ok() {}
    }

    /// Latest detector distances; `detect_range` means no hit.
    pub fn distances(&self) -> &[f64] {
        &self.distances
    }

    /// Whether a collision has been sensed since the last reset.
    pub fn collided(&self) -> bool {
        !self.collision.is_empty()
    }

    /// Impulse magnitude of the most recent collision, if any.
    pub fn last_impulse(&self) -> Option<f64> {
        self.collision.back().copied()
    }

    /// Latest camera frame as an `(height, width, 3)` RGB array.
    pub fn frame(&self) -> Option<&Array3<u8>> {
        self.frame.as_ref()
    }
}

fn bgra_to_rgb(frame: &ImageFrame) -> Array3<u8> {
    let (h, w) = (frame.height as usize, frame.width as usize);
    let mut out = Array3::zeros((h, w, 3));
    for row in 0..h {
        for col in 0..w {
            let idx = (row * w + col) * 4;
            out[[row, col, 0]] = frame.data[idx + 2];
            out[[row, col, 1]] = frame.data[idx + 1];
            out[[row, col, 2]] = frame.data[idx];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::stub::StubWorld;
    use crate::sim::{ConnectOptions, Location, Rotation, Transform};

    #[test]
    fn distances_start_at_the_no_hit_sentinel() {
        let hub = SensorHub::new(8, 50.0);
        assert_eq!(hub.distances(), &[50.0; 8][..]);
        assert!(!hub.collided());
    }

    #[test]
    fn missed_detectors_return_to_range_after_refresh() {
        let mut world = StubWorld::connect(&ConnectOptions::default(), 0).unwrap();
        world.set_synchronous(true, 0.1).unwrap();
        let ego = world
            .try_spawn_vehicle(&Transform::new(
                Location::new(10.0, 5.25, 0.0),
                Rotation::from_yaw(0.0),
            ))
            .unwrap()
            .unwrap();
        // Obstacle straight ahead, then far out of range.
        let other = world
            .try_spawn_vehicle(&Transform::new(
                Location::new(30.0, 5.25, 0.0),
                Rotation::from_yaw(0.0),
            ))
            .unwrap()
            .unwrap();

        let mut hub = SensorHub::new(3, 50.0);
        hub.attach(&mut world, ego, 150.0, 0.2, None).unwrap();
        world.tick().unwrap();
        hub.refresh();
        // Center detector sees the obstacle at about 20m.
        assert!(hub.distances()[1] < 25.0);

        world.force_transform(
            other,
            Transform::new(Location::new(200.0, 5.25, 0.0), Rotation::from_yaw(0.0)),
        );
        world.tick().unwrap();
        hub.refresh();
        assert_eq!(hub.distances()[1], 50.0);
    }

    #[test]
    fn only_the_latest_collision_is_kept() {
        let mut hub = SensorHub::new(1, 50.0);
        hub.tx.send(SensorEvent::Collision { impulse: 1.0 }).unwrap();
        hub.tx.send(SensorEvent::Collision { impulse: 2.0 }).unwrap();
        hub.refresh();
        assert!(hub.collided());
        assert_eq!(hub.last_impulse(), Some(2.0));
        assert_eq!(hub.collision.len(), 1);
    }

    #[test]
    fn frames_arrive_in_rgb_order() {
        let mut hub = SensorHub::new(1, 50.0);
        hub.tx
            .send(SensorEvent::Frame(ImageFrame {
                width: 1,
                height: 1,
                data: vec![10, 20, 30, 255],
            }))
            .unwrap();
        hub.refresh();
        let frame = hub.frame().unwrap();
        assert_eq!(frame[[0, 0, 0]], 30);
        assert_eq!(frame[[0, 0, 1]], 20);
        assert_eq!(frame[[0, 0, 2]], 10);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut hub = SensorHub::new(2, 50.0);
        hub.tx
            .send(SensorEvent::Obstacle {
                slot: 0,
                distance: Some(3.0),
            })
            .unwrap();
        hub.tx.send(SensorEvent::Collision { impulse: 9.0 }).unwrap();
        hub.refresh();
        hub.reset();
        assert_eq!(hub.distances(), &[50.0, 50.0][..]);
        assert!(!hub.collided());
        assert!(hub.frame().is_none());
    }
}
