use nalgebra::SVector;

use super::{Planner, TrajectoryPoint};

/// Planner for hovering at a fixed position
/// # Example
/// ```
/// use nalgebra::Vector3;
/// use quad_mppi::planners::{HoverPlanner, Planner};
/// let hover_planner = HoverPlanner {
///     target_position: Vector3::new(0.0, 0.0, 1.0),
/// };
/// assert_eq!(hover_planner.plan(10.0).velocity, Vector3::zeros());
/// ```
#[derive(Clone, Debug)]
pub struct HoverPlanner<const D: usize> {
    /// Target position for hovering
    pub target_position: SVector<f32, D>,
}

impl<const D: usize> Planner<D> for HoverPlanner<D> {
    fn plan(&self, _time: f32) -> TrajectoryPoint<D> {
        TrajectoryPoint {
            position: self.target_position,
            velocity: SVector::zeros(),
        }
    }
}
