use nalgebra::SVector;
use std::f32::consts::PI;

use super::{Planner, TrajectoryPoint};

/// Planner for Lissajous curve trajectories
/// # Example
/// ```
/// use nalgebra::Vector2;
/// use quad_mppi::planners::{LissajousPlanner, Planner};
/// let lissajous_planner = LissajousPlanner {
///     start_position: Vector2::new(0.0, 0.0),
///     center: Vector2::new(0.0, 0.0),
///     amplitude: Vector2::new(1.0, 0.5),
///     frequency: Vector2::new(1.0, 2.0),
///     phase: Vector2::new(0.0, 0.0),
///     duration: 6.0,
///     ramp_time: 1.0,
/// };
/// let point = lissajous_planner.plan(0.0);
/// assert_eq!(point.position, Vector2::zeros());
/// ```
#[derive(Clone, Debug)]
pub struct LissajousPlanner<const D: usize> {
    /// Starting position of the trajectory
    pub start_position: SVector<f32, D>,
    /// Center of the Lissajous curve
    pub center: SVector<f32, D>,
    /// Amplitude of the Lissajous curve
    pub amplitude: SVector<f32, D>,
    /// Number of periods per axis over `duration`
    pub frequency: SVector<f32, D>,
    /// Phase of the Lissajous curve
    pub phase: SVector<f32, D>,
    /// Duration of one sweep of the curve in seconds
    pub duration: f32,
    /// Ramp-up time for smooth transitions
    pub ramp_time: f32,
}

impl<const D: usize> Planner<D> for LissajousPlanner<D> {
    fn plan(&self, time: f32) -> TrajectoryPoint<D> {
        let t = (time / self.duration).clamp(0.0, 1.0);
        let ramp = self.ramp_time / self.duration;
        let smooth_start = if t < ramp {
            let t_ramp = t / ramp;
            t_ramp * t_ramp * (3.0 - 2.0 * t_ramp)
        } else {
            1.0
        };
        let velocity_ramp = if t < ramp {
            smooth_start
        } else if t > 1.0 - ramp {
            let t_down = (1.0 - t) / ramp;
            t_down * t_down * (3.0 - 2.0 * t_down)
        } else {
            1.0
        };
        let ang_pos = self.frequency * (t * 2.0 * PI) + self.phase;
        let lissajous = self.amplitude.component_mul(&ang_pos.map(f32::sin));
        let position =
            self.start_position + ((self.center + lissajous) - self.start_position) * smooth_start;
        let mut velocity = self
            .amplitude
            .component_mul(&self.frequency)
            .component_mul(&ang_pos.map(f32::cos))
            * (2.0 * PI * velocity_ramp / self.duration);
        if t < ramp {
            let transition_velocity = (self.center - self.start_position)
                * (2.0 * t / self.ramp_time - 2.0 * t * t / (self.ramp_time * self.ramp_time))
                / self.duration;
            velocity += transition_velocity;
        }
        TrajectoryPoint { position, velocity }
    }
}
