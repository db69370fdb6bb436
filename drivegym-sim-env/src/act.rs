//! Actions of the driving environment and their conversion to actuation.
use crate::frenet::EgoState;
use crate::sim::VehicleControl;
use drivegym_core::Act;

/// Longitudinal acceleration levels of the discrete action set, m/s².
pub const DISCRETE_ACC: [f64; 3] = [-3.0, 0.0, 3.0];
/// Steering levels of the discrete action set.
pub const DISCRETE_STEER: [f64; 3] = [-0.2, 0.0, 0.2];

/// An action of [`DriveEnv`](crate::DriveEnv).
#[derive(Clone, Debug, PartialEq)]
pub enum DriveAct {
    /// Direct acceleration and steering command applied every step.
    Continuous {
        /// Longitudinal acceleration, m/s².
        acc: f32,
        /// Steering in `[-1, 1]`.
        steer: f32,
    },
    /// Index into the cross product of [`DISCRETE_ACC`] and [`DISCRETE_STEER`].
    Discrete(usize),
    /// Maneuver parameters interpreted by the environment's
    /// [`ManeuverController`] on every step.
    Maneuver(Vec<f32>),
}

impl Act for DriveAct {
    fn len(&self) -> usize {
        match self {
            DriveAct::Continuous { .. } => 2,
            DriveAct::Discrete(_) => 1,
            DriveAct::Maneuver(params) => params.len(),
        }
    }
}

impl From<Vec<f32>> for DriveAct {
    fn from(params: Vec<f32>) -> Self {
        DriveAct::Maneuver(params)
    }
}

/// Maps an acceleration command to pedal positions: positive acceleration
/// becomes throttle scaled by the maximum engine acceleration, negative
/// becomes brake scaled by the maximum braking deceleration.
pub fn to_control(acc: f64, steer: f64) -> VehicleControl {
    let (throttle, brake) = if acc > 0.0 {
        ((acc / 3.0).min(1.0).max(0.0), 0.0)
    } else {
        (0.0, (-acc / 8.0).min(1.0).max(0.0))
    };
    VehicleControl {
        throttle,
        steer,
        brake,
    }
}

/// Converts a maneuver specification into a per-step acceleration and
/// steering command, given the current road-relative state.
pub trait ManeuverController: Send {
    /// Returns `(acc, steer)` for one control step.
    fn actuation(&mut self, maneuver: &[f32], ego: &EgoState) -> (f64, f64);
}

/// Reads the command directly from the first two maneuver parameters. A
/// placeholder for model-predictive controllers that track the maneuver.
#[derive(Clone, Debug, Default)]
pub struct DirectController;

impl ManeuverController for DirectController {
    fn actuation(&mut self, maneuver: &[f32], _ego: &EgoState) -> (f64, f64) {
        let acc = maneuver.first().copied().unwrap_or(0.0) as f64;
        let steer = maneuver.get(1).copied().unwrap_or(0.0) as f64;
        (acc, steer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceleration_saturates_the_throttle() {
        let control = to_control(5.0, 0.0);
        assert_eq!(control.throttle, 1.0);
        assert_eq!(control.brake, 0.0);
    }

    #[test]
    fn deceleration_maps_to_brake() {
        let control = to_control(-4.0, 0.1);
        assert_eq!(control.throttle, 0.0);
        assert_eq!(control.brake, 0.5);
        assert_eq!(control.steer, 0.1);
    }

    #[test]
    fn zero_acceleration_coasts() {
        let control = to_control(0.0, 0.0);
        assert_eq!(control.throttle, 0.0);
        assert_eq!(control.brake, 0.0);
    }

    #[test]
    fn direct_controller_reads_the_first_two_params() {
        let mut controller = DirectController;
        let ego = EgoState::default();
        assert_eq!(controller.actuation(&[2.0, -0.3], &ego), (2.0, -0.3f32 as f64));
        assert_eq!(controller.actuation(&[], &ego), (0.0, 0.0));
    }
}
