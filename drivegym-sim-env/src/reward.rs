//! Per-step reward of the driving task.
use crate::frenet::EgoState;

const COLLISION_PENALTY: f64 = -100.0;
const TIMEOUT_PENALTY: f64 = -100.0;

/// Everything the reward depends on for one control step.
pub struct RewardInput<'a> {
    /// Road-relative state after the step.
    pub ego: &'a EgoState,
    /// Station after the previous step; `None` on the first step.
    pub prev_s: Option<f64>,
    /// Planar speed of the ego, m/s.
    pub planar_speed: f64,
    /// Steering command of the step, in `[-1, 1]`.
    pub steer: f64,
    /// Whether a collision was sensed this step.
    pub collision: bool,
    /// Whether the ego reached the goal this step.
    pub arrived: bool,
    /// Whether the episode ran out of time this step.
    pub out_of_time: bool,
    /// Simulated time since reset, seconds.
    pub elapsed: f64,
    /// Station of the goal, used for the arrival bonus.
    pub road_len: f64,
    /// Half the ego length.
    pub half_length: f64,
    /// Half the ego width.
    pub half_width: f64,
    /// Lateral distance beyond which a body corner is out of bounds.
    pub road_bound: f64,
    /// Speed above which forward speed is rewarded, m/s.
    pub speed_threshold: f64,
    /// Normalizer of the speed term, m/s.
    pub max_speed: f64,
}

/// Computes the step reward as the sum of seven equally weighted terms:
/// fast driving, collision, steering effort, arrival, timeout, station
/// progress, and lane-boundary violation of the body corners.
pub fn reward(input: &RewardInput) -> f64 {
    let ego = input.ego;

    let r_speed = if input.planar_speed >= input.speed_threshold {
        input.planar_speed / input.max_speed
    } else {
        0.0
    };

    let r_collision = if input.collision { COLLISION_PENALTY } else { 0.0 };

    let r_steer = -input.steer.abs();

    let r_arrival = if input.arrived && input.elapsed > 0.0 {
        input.road_len / input.elapsed
    } else {
        0.0
    };

    let r_timeout = if input.out_of_time { TIMEOUT_PENALTY } else { 0.0 };

    let r_progress = match input.prev_s {
        Some(prev_s) => ego.s - prev_s,
        None => 0.0,
    };

    // Body corners in (longitudinal, lateral) body coordinates, rotated by
    // the heading error into the road frame. When several corners are out of
    // bounds the last one measured sets the penalty.
    let (sin, cos) = ego.yaw_err.sin_cos();
    let (hl, hw) = (input.half_length, input.half_width);
    let mut r_road = 0.0;
    for (dx, dy) in [(hl, hw), (hl, -hw), (-hl, -hw), (-hl, hw)].iter() {
        let lateral = ego.d + sin * dx + cos * dy;
        if lateral.abs() >= input.road_bound {
            r_road = -(lateral.abs() - input.road_bound);
        }
    }

    r_speed + r_collision + r_steer + r_arrival + r_timeout + r_progress + r_road
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(ego: &EgoState) -> RewardInput {
        RewardInput {
            ego,
            prev_s: Some(ego.s),
            planar_speed: 0.0,
            steer: 0.0,
            collision: false,
            arrived: false,
            out_of_time: false,
            elapsed: 1.0,
            road_len: 275.0,
            half_length: 2.4,
            half_width: 1.0,
            road_bound: 5.25,
            speed_threshold: 8.0,
            max_speed: 10.0,
        }
    }

    #[test]
    fn slow_driving_earns_no_speed_reward() {
        let ego = EgoState::default();
        let mut input = base_input(&ego);
        input.planar_speed = 7.9;
        assert_eq!(reward(&input), 0.0);
        input.planar_speed = 9.0;
        assert!((reward(&input) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn first_step_earns_no_progress() {
        let ego = EgoState {
            s: 30.0,
            ..Default::default()
        };
        let mut input = base_input(&ego);
        input.prev_s = None;
        assert_eq!(reward(&input), 0.0);
        input.prev_s = Some(28.5);
        assert!((reward(&input) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn collision_and_timeout_each_cost_one_hundred() {
        let ego = EgoState::default();
        let mut input = base_input(&ego);
        input.collision = true;
        assert_eq!(reward(&input), -100.0);
        input.collision = false;
        input.out_of_time = true;
        assert_eq!(reward(&input), -100.0);
    }

    #[test]
    fn arrival_bonus_scales_with_episode_time() {
        let ego = EgoState::default();
        let mut input = base_input(&ego);
        input.arrived = true;
        input.elapsed = 27.5;
        assert!((reward(&input) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn steering_effort_is_penalized_symmetrically() {
        let ego = EgoState::default();
        let mut input = base_input(&ego);
        input.steer = -0.4;
        assert!((reward(&input) + 0.4).abs() < 1e-9);
        input.steer = 0.4;
        assert!((reward(&input) + 0.4).abs() < 1e-9);
    }

    #[test]
    fn corner_penalty_keeps_last_offender() {
        // Large positive offset pushes the left corners out of bounds; with
        // zero heading error the last corner measured is (-hl, hw). Corner
        // offsets are (longitudinal, lateral) = (half length, half width), so
        // the lateral reach of a corner here is the half width, not the half
        // length.
        let ego = EgoState {
            d: 5.0,
            ..Default::default()
        };
        let input = base_input(&ego);
        // lateral of the offending corners is d + hw = 6.0; excess 0.75.
        assert!((reward(&input) + 0.75).abs() < 1e-9);
    }

    #[test]
    fn corners_inside_the_road_cost_nothing() {
        let ego = EgoState {
            d: 1.0,
            ..Default::default()
        };
        let input = base_input(&ego);
        assert_eq!(reward(&input), 0.0);
    }
}
