//! Reference trajectory generation.
//!
//! Planners are sampled once per episode into a [`ReferenceTrajectory`], which the
//! environments read by time index while stepping. Planners are generic over the
//! spatial dimension so the same code serves the planar (`D = 2`) and 3D (`D = 3`) vehicles.
use nalgebra::SVector;
use rand::Rng;

use crate::SimulationError;

mod hover;
mod lissajous;

pub use hover::HoverPlanner;
pub use lissajous::LissajousPlanner;

/// A single desired point of a reference trajectory
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrajectoryPoint<const D: usize> {
    /// Desired position
    pub position: SVector<f32, D>,
    /// Desired velocity
    pub velocity: SVector<f32, D>,
}

/// Trait defining the interface for reference planners
/// # Example
/// ```
/// use nalgebra::Vector2;
/// use quad_mppi::planners::{Planner, TrajectoryPoint};
/// struct Still;
/// impl Planner<2> for Still {
///     fn plan(&self, _time: f32) -> TrajectoryPoint<2> {
///         TrajectoryPoint { position: Vector2::new(0.0, 1.0), velocity: Vector2::zeros() }
///     }
/// }
/// assert_eq!(Still.plan(3.0).position, Vector2::new(0.0, 1.0));
/// ```
pub trait Planner<const D: usize> {
    /// Returns the desired position and velocity at `time` seconds after episode start
    fn plan(&self, time: f32) -> TrajectoryPoint<D>;
}

/// Planners available from the configuration file
#[derive(Clone, Debug)]
pub enum PlannerType<const D: usize> {
    Hover(HoverPlanner<D>),
    Lissajous(LissajousPlanner<D>),
}

impl<const D: usize> PlannerType<D> {
    /// Returns a copy of the planner with its free parameters re-drawn from `rng`.
    /// Only the Lissajous phase is randomized; a hover target stays fixed.
    pub fn randomized<R: Rng>(&self, rng: &mut R) -> Self {
        match self {
            PlannerType::Hover(planner) => PlannerType::Hover(planner.clone()),
            PlannerType::Lissajous(planner) => {
                let mut planner = planner.clone();
                planner.phase = SVector::from_fn(|_, _| rng.gen_range(0.0..std::f32::consts::TAU));
                PlannerType::Lissajous(planner)
            }
        }
    }
}

impl<const D: usize> Planner<D> for PlannerType<D> {
    fn plan(&self, time: f32) -> TrajectoryPoint<D> {
        match self {
            PlannerType::Hover(planner) => planner.plan(time),
            PlannerType::Lissajous(planner) => planner.plan(time),
        }
    }
}

/// A precomputed reference, one entry per simulation step
/// # Example
/// ```
/// use nalgebra::Vector2;
/// use quad_mppi::planners::{HoverPlanner, ReferenceTrajectory};
/// let hover = HoverPlanner { target_position: Vector2::new(0.0, 1.0) };
/// let reference = ReferenceTrajectory::from_planner(&hover, 0.02, 10);
/// assert_eq!(reference.len(), 10);
/// assert_eq!(reference.position(25), Vector2::new(0.0, 1.0));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceTrajectory<const D: usize> {
    /// Desired positions, indexed by step
    pub positions: Vec<SVector<f32, D>>,
    /// Desired velocities, indexed by step
    pub velocities: Vec<SVector<f32, D>>,
}

impl<const D: usize> ReferenceTrajectory<D> {
    /// Samples `planner` every `dt` seconds for `len` steps
    /// # Arguments
    /// * `planner` - The planner to sample
    /// * `dt` - Sampling period in seconds
    /// * `len` - Number of samples, must be at least one
    pub fn from_planner<P: Planner<D> + ?Sized>(planner: &P, dt: f32, len: usize) -> Self {
        let (positions, velocities) = (0..len.max(1))
            .map(|i| {
                let point = planner.plan(i as f32 * dt);
                (point.position, point.velocity)
            })
            .unzip();
        Self {
            positions,
            velocities,
        }
    }

    /// Builds a reference from explicit sequences
    /// # Errors
    /// * If the sequences are empty or of different lengths
    pub fn from_points(
        positions: Vec<SVector<f32, D>>,
        velocities: Vec<SVector<f32, D>>,
    ) -> Result<Self, SimulationError> {
        if positions.is_empty() || positions.len() != velocities.len() {
            return Err(SimulationError::InvalidConfig(format!(
                "reference needs matching non-empty sequences, got {} positions and {} velocities",
                positions.len(),
                velocities.len()
            )));
        }
        Ok(Self {
            positions,
            velocities,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Desired position at step `index`. Reads past the end hold the final point,
    /// which only happens for rollouts that already crossed the episode bound.
    pub fn position(&self, index: usize) -> SVector<f32, D> {
        self.positions[index.min(self.positions.len() - 1)]
    }

    /// Desired velocity at step `index`, with the same end-hold rule as [`Self::position`]
    pub fn velocity(&self, index: usize) -> SVector<f32, D> {
        self.velocities[index.min(self.velocities.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Vector2, Vector3};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn lissajous() -> LissajousPlanner<3> {
        LissajousPlanner {
            start_position: Vector3::zeros(),
            center: Vector3::new(0.0, 0.0, 0.5),
            amplitude: Vector3::new(1.0, 1.0, 0.2),
            frequency: Vector3::new(1.0, 2.0, 1.0),
            phase: Vector3::zeros(),
            duration: 6.0,
            ramp_time: 1.0,
        }
    }

    #[test]
    fn test_reference_clamps_past_end() {
        let reference = ReferenceTrajectory::from_planner(&lissajous(), 0.02, 50);
        assert_eq!(reference.position(49), reference.position(1000));
        assert_eq!(reference.velocity(49), reference.velocity(1000));
    }

    #[test]
    fn test_from_points_rejects_mismatch() {
        let result = ReferenceTrajectory::from_points(
            vec![Vector2::zeros(), Vector2::zeros()],
            vec![Vector2::zeros()],
        );
        assert!(matches!(result, Err(SimulationError::InvalidConfig(_))));
    }

    #[test]
    fn test_lissajous_starts_at_start_position() {
        let point = lissajous().plan(0.0);
        assert_relative_eq!(point.position, Vector3::zeros(), epsilon = 1e-6);
    }

    #[test]
    fn test_lissajous_velocity_matches_finite_difference() {
        let planner = lissajous();
        let (t, h) = (3.0, 1e-3);
        let fd = (planner.plan(t + h).position - planner.plan(t - h).position) / (2.0 * h);
        assert_relative_eq!(planner.plan(t).velocity, fd, epsilon = 1e-2);
    }

    #[test]
    fn test_randomized_is_reproducible() {
        let planner = PlannerType::Lissajous(lissajous());
        let a = planner.randomized(&mut ChaCha8Rng::seed_from_u64(3));
        let b = planner.randomized(&mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a.plan(1.5), b.plan(1.5));
        assert_ne!(a.plan(1.5), planner.plan(1.5));
    }
}
