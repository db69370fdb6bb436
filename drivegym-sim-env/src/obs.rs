//! Observation of the driving environment.
use crate::frenet::EgoState;
use drivegym_core::Obs;

/// Flat observation: the road-relative ego state followed by the obstacle
/// detector distances, front-left to front-right.
#[derive(Clone, Debug, PartialEq)]
pub struct DriveObs(pub Vec<f32>);

impl DriveObs {
    pub(crate) fn new(ego: &EgoState, distances: &[f64]) -> Self {
        let mut values = ego.to_vec();
        values.extend(distances.iter().map(|d| *d as f32));
        Self(values)
    }
}

impl Obs for DriveObs {
    fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<DriveObs> for Vec<f32> {
    fn from(obs: DriveObs) -> Self {
        obs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_ego_state_then_distances() {
        let ego = EgoState {
            s: 1.0,
            d: 2.0,
            yaw_err: 3.0,
            v_long: 4.0,
        };
        let obs = DriveObs::new(&ego, &[50.0, 12.5]);
        assert_eq!(obs.0, vec![1.0, 2.0, 3.0, 4.0, 50.0, 12.5]);
        assert_eq!(obs.len(), 6);
    }
}
