//! Configuration module
//!
//! This module contains the configuration for the simulation, the quadrotor, the MPPI
//! controller and the reference trajectory.
//! The configuration is loaded from a YAML file using the serde library and converted into
//! the runtime parameter types with validation.
use nalgebra::{DVector, SVector, Vector2, Vector3};

use crate::distribution::ControlDistribution;
use crate::environment::{Environment, Quad2DEnv, Quad3DEnv};
use crate::lib_controller::MppiController;
use crate::lib_quadrotor::{Params2D, Params3D, PayloadParams, PayloadParams2D};
use crate::planners::{HoverPlanner, LissajousPlanner, PlannerType};
use crate::SimulationError;

#[derive(Clone, Debug, serde::Deserialize)]
/// Configuration for a closed-loop run
pub struct Config {
    /// Simulation configuration
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Quadrotor configuration
    pub quadrotor: QuadrotorConfigurations,
    /// MPPI controller configuration
    pub mppi: MppiConfig,
    /// Reference trajectory configuration
    #[serde(default)]
    pub reference: ReferenceConfig,
    /// Default log filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for the simulation
pub struct SimulationConfig {
    /// Integration step in seconds
    pub dt: f32,
    /// Gravity in m/s^2
    pub gravity: f32,
    /// Episode length bound in steps
    pub max_steps_in_episode: usize,
    /// Seed of the episode and of the controller
    pub seed: u64,
    /// Re-draw the reference's free parameters from the seed at reset
    pub randomize_reference: bool,
    /// Optional CSV trace output
    pub trace_path: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            dt: 0.02,
            gravity: 9.81,
            max_steps_in_episode: 300,
            seed: 0,
            randomize_reference: false,
            trace_path: None,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(tag = "type")]
/// Vehicle specific configuration
pub enum QuadrotorConfigurations {
    Quad2D(Quad2DConfig),
    Quad3D(Quad3DConfig),
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for the planar body-rate quadrotor
pub struct Quad2DConfig {
    /// Mass of the quadrotor in kg
    pub mass: f32,
    /// Maximum collective thrust in N
    pub max_thrust: f32,
    /// Maximum roll rate in rad/s
    pub max_bodyrate: f32,
    /// Number of future reference points in the observation
    pub traj_obs_len: usize,
    /// Stride between observed reference points
    pub traj_obs_gap: usize,
    /// Rope-suspended payload
    pub payload: Option<Payload2DConfig>,
}

impl Default for Quad2DConfig {
    fn default() -> Self {
        let params = Params2D::default();
        Quad2DConfig {
            mass: params.mass,
            max_thrust: params.max_thrust,
            max_bodyrate: params.max_bodyrate,
            traj_obs_len: params.traj_obs_len,
            traj_obs_gap: params.traj_obs_gap,
            payload: None,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for the 3D quadrotor
pub struct Quad3DConfig {
    /// Mass of the quadrotor in kg
    pub mass: f32,
    /// Inertia matrix in kg*m^2, row-major
    pub inertia_matrix: [f32; 9],
    /// Maximum collective thrust in N
    pub max_thrust: f32,
    /// Maximum body torque per axis in N*m
    pub max_torque: [f32; 3],
    /// Number of future reference points in the observation
    pub traj_obs_len: usize,
    /// Stride between observed reference points
    pub traj_obs_gap: usize,
    /// Rope-suspended payload
    pub payload: Option<PayloadConfig>,
}

impl Default for Quad3DConfig {
    fn default() -> Self {
        let params = Params3D::default();
        let inertia = params.inertia_matrix;
        Quad3DConfig {
            mass: params.mass,
            inertia_matrix: [
                inertia[(0, 0)],
                inertia[(0, 1)],
                inertia[(0, 2)],
                inertia[(1, 0)],
                inertia[(1, 1)],
                inertia[(1, 2)],
                inertia[(2, 0)],
                inertia[(2, 1)],
                inertia[(2, 2)],
            ],
            max_thrust: params.max_thrust,
            max_torque: params.max_torque.into(),
            traj_obs_len: params.traj_obs_len,
            traj_obs_gap: params.traj_obs_gap,
            payload: None,
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for the rope-suspended payload
pub struct PayloadConfig {
    /// Rope length in m
    pub rope_length: f32,
    /// Hook position relative to the quadrotor center in the body frame, in m
    pub hook_offset: [f32; 3],
}

impl Default for PayloadConfig {
    fn default() -> Self {
        let params = PayloadParams::default();
        PayloadConfig {
            rope_length: params.rope_length,
            hook_offset: params.hook_offset.into(),
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
/// Configuration for the rope-suspended payload of the planar quadrotor
pub struct Payload2DConfig {
    /// Rope length in m
    pub rope_length: f32,
    /// Hook position (y, z) relative to the quadrotor center in the body frame, in m
    pub hook_offset: [f32; 2],
}

impl Default for Payload2DConfig {
    fn default() -> Self {
        let params = PayloadParams2D::default();
        Payload2DConfig {
            rope_length: params.rope_length,
            hook_offset: params.hook_offset.into(),
        }
    }
}

#[derive(Clone, Debug, serde::Deserialize)]
/// Configuration for the MPPI controller
pub struct MppiConfig {
    /// Number of sampled sequences per tick
    pub num_samples: usize,
    /// Planning horizon in steps
    pub horizon: usize,
    /// Temperature of the importance weights
    pub lambda: f32,
    /// Blend factor of the batch mean
    #[serde(default = "default_gamma_mean")]
    pub gamma_mean: f32,
    /// Blend factor of the batch covariance
    #[serde(default)]
    pub gamma_sigma: f32,
    /// Per-step reward discount
    #[serde(default = "default_discount")]
    pub discount: f32,
    /// Initial standard deviation of every action component
    #[serde(default = "default_sample_sigma")]
    pub sample_sigma: f32,
    /// Initial mean action, the environment's hover action if absent
    #[serde(default)]
    pub initial_mean: Option<Vec<f32>>,
}

fn default_gamma_mean() -> f32 {
    1.0
}

fn default_discount() -> f32 {
    1.0
}

fn default_sample_sigma() -> f32 {
    0.1
}

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(tag = "type")]
/// Configuration for the reference trajectory. Vectors are given per axis; an empty
/// vector stands for the origin.
pub enum ReferenceConfig {
    Hover {
        #[serde(default)]
        target_position: Vec<f32>,
    },
    Lissajous {
        #[serde(default)]
        start_position: Vec<f32>,
        #[serde(default)]
        center: Vec<f32>,
        amplitude: Vec<f32>,
        frequency: Vec<f32>,
        #[serde(default)]
        phase: Vec<f32>,
        duration: f32,
        #[serde(default)]
        ramp_time: f32,
    },
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        ReferenceConfig::Hover {
            target_position: Vec::new(),
        }
    }
}

/// Converts per-axis values into a `D`-vector
fn to_vector<const D: usize>(name: &str, values: &[f32]) -> Result<SVector<f32, D>, SimulationError> {
    match values.len() {
        0 => Ok(SVector::zeros()),
        len if len == D => Ok(SVector::from_column_slice(values)),
        len => Err(SimulationError::DimensionMismatch(format!(
            "{name} has {len} components, expected {}",
            D
        ))),
    }
}

fn check_positive(name: &str, value: f32) -> Result<(), SimulationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimulationError::InvalidConfig(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

impl SimulationConfig {
    fn validate(&self) -> Result<(), SimulationError> {
        check_positive("simulation.dt", self.dt)?;
        if !self.gravity.is_finite() {
            return Err(SimulationError::InvalidConfig(
                "simulation.gravity must be finite".to_string(),
            ));
        }
        if self.max_steps_in_episode == 0 {
            return Err(SimulationError::InvalidConfig(
                "simulation.max_steps_in_episode must be at least one".to_string(),
            ));
        }
        Ok(())
    }
}

impl Quad2DConfig {
    /// Builds the physical parameters of the planar quadrotor
    /// # Errors
    /// * If the mass, the thrust bound or the rope length is not positive
    pub fn params(&self, simulation: &SimulationConfig) -> Result<Params2D, SimulationError> {
        simulation.validate()?;
        check_positive("quadrotor.mass", self.mass)?;
        check_positive("quadrotor.max_thrust", self.max_thrust)?;
        let payload = match &self.payload {
            Some(payload) => {
                check_positive("quadrotor.payload.rope_length", payload.rope_length)?;
                Some(PayloadParams2D {
                    rope_length: payload.rope_length,
                    hook_offset: Vector2::from(payload.hook_offset),
                })
            }
            None => None,
        };
        Ok(Params2D {
            max_bodyrate: self.max_bodyrate,
            max_thrust: self.max_thrust,
            dt: simulation.dt,
            gravity: simulation.gravity,
            mass: self.mass,
            payload,
            traj_obs_len: self.traj_obs_len,
            traj_obs_gap: self.traj_obs_gap,
            max_steps_in_episode: simulation.max_steps_in_episode,
        })
    }
}

impl Quad3DConfig {
    /// Builds the physical parameters of the 3D quadrotor
    /// # Errors
    /// * If the mass, the thrust bound or the rope length is not positive, or the inertia
    ///   matrix is singular
    pub fn params(&self, simulation: &SimulationConfig) -> Result<Params3D, SimulationError> {
        simulation.validate()?;
        check_positive("quadrotor.mass", self.mass)?;
        check_positive("quadrotor.max_thrust", self.max_thrust)?;
        let payload = match &self.payload {
            Some(payload) => {
                check_positive("quadrotor.payload.rope_length", payload.rope_length)?;
                Some(PayloadParams {
                    rope_length: payload.rope_length,
                    hook_offset: Vector3::from(payload.hook_offset),
                })
            }
            None => None,
        };
        Params3D {
            max_torque: Vector3::from(self.max_torque),
            max_thrust: self.max_thrust,
            dt: simulation.dt,
            gravity: simulation.gravity,
            mass: self.mass,
            payload,
            traj_obs_len: self.traj_obs_len,
            traj_obs_gap: self.traj_obs_gap,
            max_steps_in_episode: simulation.max_steps_in_episode,
            ..Default::default()
        }
        .with_inertia(self.inertia_matrix)
    }
}

impl ReferenceConfig {
    /// Builds the planner for a `D`-dimensional vehicle
    /// # Errors
    /// * If a vector has neither zero nor `D` components, or a duration is not positive
    pub fn planner<const D: usize>(&self) -> Result<PlannerType<D>, SimulationError> {
        match self {
            ReferenceConfig::Hover { target_position } => Ok(PlannerType::Hover(HoverPlanner {
                target_position: to_vector("reference.target_position", target_position)?,
            })),
            ReferenceConfig::Lissajous {
                start_position,
                center,
                amplitude,
                frequency,
                phase,
                duration,
                ramp_time,
            } => {
                check_positive("reference.duration", *duration)?;
                if !(ramp_time.is_finite() && *ramp_time >= 0.0) {
                    return Err(SimulationError::InvalidConfig(format!(
                        "reference.ramp_time must be non-negative, got {ramp_time}"
                    )));
                }
                Ok(PlannerType::Lissajous(LissajousPlanner {
                    start_position: to_vector("reference.start_position", start_position)?,
                    center: to_vector("reference.center", center)?,
                    amplitude: to_vector("reference.amplitude", amplitude)?,
                    frequency: to_vector("reference.frequency", frequency)?,
                    phase: to_vector("reference.phase", phase)?,
                    duration: *duration,
                    ramp_time: *ramp_time,
                }))
            }
        }
    }
}

impl MppiConfig {
    /// Builds a controller for `env`
    pub fn controller<E: Environment>(&self, env: E) -> Result<MppiController<E>, SimulationError> {
        MppiController::new(env, self.num_samples, self.horizon, self.lambda)
    }

    /// Builds the distribution of the first tick; `nominal` is used when no initial
    /// mean is configured
    pub fn initial_distribution<E: Environment>(
        &self,
        controller: &MppiController<E>,
        nominal: DVector<f32>,
    ) -> Result<ControlDistribution, SimulationError> {
        let mean = match &self.initial_mean {
            Some(values) => DVector::from_column_slice(values),
            None => nominal,
        };
        controller.initial_distribution(
            &mean,
            self.sample_sigma,
            self.gamma_mean,
            self.gamma_sigma,
            self.discount,
        )
    }
}

/// Implementation of the Config struct
impl Config {
    /// Load configuration from a YAML file.
    /// # Arguments
    /// * `filename` - The name of the file to load.
    /// # Returns
    /// * The configuration object.
    /// # Errors
    /// * If the file cannot be read or the YAML cannot be parsed.
    pub fn from_yaml(filename: &str) -> Result<Self, SimulationError> {
        let contents = std::fs::read_to_string(filename)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Builds the planar environment and its parameters
    pub fn quad2d(&self, config: &Quad2DConfig) -> Result<(Quad2DEnv, Params2D), SimulationError> {
        let params = config.params(&self.simulation)?;
        let env = Quad2DEnv::new(self.reference.planner()?, self.simulation.randomize_reference);
        Ok((env, params))
    }

    /// Builds the 3D environment and its parameters
    pub fn quad3d(&self, config: &Quad3DConfig) -> Result<(Quad3DEnv, Params3D), SimulationError> {
        let params = config.params(&self.simulation)?;
        let env = Quad3DEnv::new(self.reference.planner()?, self.simulation.randomize_reference);
        Ok((env, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_quad2d_config() {
        let config = Config::from_yaml("tests/testdata/test_config_quad2d.yaml").unwrap();
        let quad_config = match &config.quadrotor {
            QuadrotorConfigurations::Quad2D(quad_config) => quad_config,
            _ => panic!("Failed to load Quad2D configuration"),
        };
        assert_eq!(config.simulation.dt, 0.02);
        assert_eq!(config.simulation.max_steps_in_episode, 200);
        assert_eq!(config.simulation.seed, 3);
        assert_eq!(config.mppi.num_samples, 128);
        assert_eq!(config.mppi.horizon, 20);
        assert_eq!(config.mppi.gamma_sigma, 0.0);
        assert_eq!(config.log_level, "debug");
        assert_eq!(quad_config.mass, 0.03);
        let (env, params) = config.quad2d(quad_config).unwrap();
        assert_eq!(params.max_steps_in_episode, 200);
        assert!(matches!(env.planner, PlannerType::Lissajous(_)));
        let controller = config.mppi.controller(env).unwrap();
        let nominal = controller.env().nominal_action(&params);
        let distribution = config.mppi.initial_distribution(&controller, nominal).unwrap();
        assert_eq!(distribution.horizon(), 20);
        assert_eq!(distribution.action_covariance[0][(1, 1)], 0.25 * 0.25);
    }

    #[test]
    fn test_quad3d_payload_config() {
        let config = Config::from_yaml("tests/testdata/test_config_quad3d_payload.yaml").unwrap();
        let quad_config = match &config.quadrotor {
            QuadrotorConfigurations::Quad3D(quad_config) => quad_config,
            _ => panic!("Failed to load Quad3D configuration"),
        };
        let (env, params) = config.quad3d(quad_config).unwrap();
        let payload = params.payload.as_ref().unwrap();
        assert_eq!(payload.rope_length, 0.25);
        assert_eq!(payload.hook_offset, PayloadParams::default().hook_offset);
        assert_eq!(params.inertia_matrix[(2, 2)], 3.0e-5);
        match env.planner {
            PlannerType::Hover(planner) => {
                assert_eq!(planner.target_position, Vector3::new(0.0, 0.0, 0.5))
            }
            _ => panic!("Expected a hover reference"),
        }
        assert_eq!(config.mppi.initial_mean, Some(vec![0.0, 0.0, 0.0, 0.0]));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_quad2d_payload_config() {
        let config = Config::from_yaml("tests/testdata/test_config_quad2d_payload.yaml").unwrap();
        let quad_config = match &config.quadrotor {
            QuadrotorConfigurations::Quad2D(quad_config) => quad_config,
            _ => panic!("Failed to load Quad2D configuration"),
        };
        let (env, params) = config.quad2d(quad_config).unwrap();
        let payload = params.payload.as_ref().unwrap();
        assert_eq!(payload.rope_length, 0.2);
        assert_eq!(payload.hook_offset, Vector2::new(0.0, -0.05));
        assert_eq!(params.mass, Params2D::default().mass);
        assert_eq!(params.max_steps_in_episode, 50);
        let (obs, state) = env.reset(0, &params);
        assert!(state.payload.is_some());
        assert_eq!(obs.len(), 17 + 4 * params.traj_obs_len);
    }

    #[test]
    fn test_non_positive_rope_length_is_rejected() {
        let config = Quad2DConfig {
            payload: Some(Payload2DConfig {
                rope_length: 0.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            config.params(&SimulationConfig::default()),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "quadrotor:\n  type: Quad3D\n  inertia_matrix: [0, 0, 0, 0, 0, 0, 0, 0, 0]\nmppi:\n  num_samples: 0\n  horizon: 4\n  lambda: 0.1\nreference:\n  type: Hover\n  target_position: [1.0, 2.0]\n"
        )
        .unwrap();
        let config = Config::from_yaml(file.path().to_str().unwrap()).unwrap();
        let quad_config = match &config.quadrotor {
            QuadrotorConfigurations::Quad3D(quad_config) => quad_config,
            _ => panic!("Failed to load Quad3D configuration"),
        };
        assert!(matches!(
            quad_config.params(&config.simulation),
            Err(SimulationError::NalgebraError(_))
        ));
        assert!(matches!(
            config.reference.planner::<3>(),
            Err(SimulationError::DimensionMismatch(_))
        ));
        assert!(config.reference.planner::<2>().is_ok());
        assert!(config.mppi.controller(Quad3DEnv::hover()).is_err());
    }

    #[test]
    fn test_missing_file_and_bad_yaml() {
        assert!(matches!(
            Config::from_yaml("tests/testdata/does_not_exist.yaml"),
            Err(SimulationError::IoError(_))
        ));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "quadrotor:\n  type: Hexacopter\n").unwrap();
        assert!(matches!(
            Config::from_yaml(file.path().to_str().unwrap()),
            Err(SimulationError::YamlError(_))
        ));
    }

    #[test]
    fn test_legacy_vehicle_keys_are_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "quadrotor:\n  type: Quad2D\n  inertia: 2.0e-5\n  max_speed: 8.0\nmppi:\n  num_samples: 4\n  horizon: 2\n  lambda: 0.1\n"
        )
        .unwrap();
        let config = Config::from_yaml(file.path().to_str().unwrap()).unwrap();
        let quad_config = match &config.quadrotor {
            QuadrotorConfigurations::Quad2D(quad_config) => quad_config,
            _ => panic!("Failed to load Quad2D configuration"),
        };
        let params = quad_config.params(&config.simulation).unwrap();
        assert_eq!(params, Params2D::default());
    }

    #[test]
    fn test_defaults_match_reference_vehicle() {
        let simulation = SimulationConfig::default();
        let params = Quad2DConfig::default().params(&simulation).unwrap();
        assert_eq!(params, Params2D::default());
        let params = Quad3DConfig::default().params(&simulation).unwrap();
        assert_eq!(params.inertia_matrix, Params3D::default().inertia_matrix);
        assert_eq!(params.mass, Params3D::default().mass);
    }
}
