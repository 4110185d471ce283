//! # Quadrotor MPPI
//! This crate provides a sampling-based Model Predictive Path Integral (MPPI) controller
//! for quadrotors, together with the rigid-body dynamics it rolls candidate plans out against.
//! ## Features
//! - Planar body-rate quadrotor and 3D torque-controlled quadrotor dynamics
//! - Optional rope-suspended payload in the loose (tension-free) regime
//! - Time-indexed Gaussian trajectory distribution with receding-horizon warm start
//! - Reproducible batch sampling on counter-based ChaCha sub-streams
//! - Lock-step parallel rollouts with rayon and softmax importance re-weighting
//! - Tracking environments and reference planners for closed-loop runs
//! ## Example
//! ```
//! use quad_mppi::{MppiController, Quad2DEnv, Params2D, Environment};
//! let env = Quad2DEnv::hover();
//! let params = Params2D::default();
//! let controller = MppiController::new(env, 16, 4, 0.01).unwrap();
//! let distribution = controller
//!     .initial_distribution(&controller.env().nominal_action(&params), 0.1, 1.0, 0.0, 1.0)
//!     .unwrap();
//! let (obs, state) = controller.env().reset(0, &params);
//! let output = controller.control_tick(&obs, &state, &params, 7, distribution).unwrap();
//! assert_eq!(output.action.len(), 2);
//! ```
pub mod lib_controller;
pub mod lib_quadrotor;

pub use lib_controller::*;
pub use lib_quadrotor::*;

pub mod config;
pub mod distribution;
pub mod environment;
pub mod logger;
pub mod planners;
pub mod quad_sim;
pub mod rollout;
pub mod sampler;
pub mod weighting;

pub use distribution::{BatchStatistics, ControlDistribution};
pub use environment::{Environment, Quad2DEnv, Quad3DEnv, StepInfo, Transition};
pub use sampler::ActionSequence;

#[cfg(test)]
pub(crate) mod test_utils;

#[derive(thiserror::Error, Debug)]
/// Represents errors that can occur while building or running the controller
/// # Example
/// ```
/// use quad_mppi::SimulationError;
/// let error = SimulationError::NalgebraError("Matrix inversion failed".to_string());
/// ```
pub enum SimulationError {
    /// Error related to linear algebra operations
    #[error("Nalgebra error: {0}")]
    NalgebraError(String),
    /// Invalid or inconsistent configuration, reported at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Shapes passed at tick time do not match what the controller was built for
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// Error reading a configuration or output file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// Error parsing a YAML configuration
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// Error writing the CSV trace
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    /// Other general errors
    #[error("Other error: {0}")]
    OtherError(String),
}

/// Wraps an angle into the interval [-pi, pi]
/// # Arguments
/// * `angle` - The angle in radians
/// # Returns
/// * The equivalent angle in [-pi, pi]
/// # Example
/// ```
/// use quad_mppi::angle_normalize;
/// let wrapped = angle_normalize(2.5 * std::f32::consts::PI);
/// assert!((wrapped - 0.5 * std::f32::consts::PI).abs() < 1e-5);
/// ```
#[inline]
pub fn angle_normalize(angle: f32) -> f32 {
    use std::f32::consts::PI;
    (angle + PI).rem_euclid(2.0 * PI) - PI
}
