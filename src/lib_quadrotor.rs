//! Quadrotor dynamics.
//!
//! Every step function here is pure: it takes the parameters, the current state and a
//! physical action, and returns the next state. Nothing in this module knows about
//! sampling or control.
use crate::planners::ReferenceTrajectory;
use crate::{angle_normalize, SimulationError};

use nalgebra::{Matrix3, Quaternion, Rotation2, UnitQuaternion, Vector2, Vector3};
use std::sync::Arc;

/// Rope lengths below this are floored before dividing by them
pub const MIN_ROPE_LENGTH: f32 = 1e-4;

/// Physical parameters of the planar body-rate quadrotor
/// # Example
/// ```
/// use quad_mppi::Params2D;
/// let params = Params2D { mass: 0.05, ..Default::default() };
/// assert_eq!(params.dt, 0.02);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Params2D {
    /// Maximum roll rate in rad/s
    pub max_bodyrate: f32,
    /// Maximum collective thrust in N
    pub max_thrust: f32,
    /// Integration step in seconds
    pub dt: f32,
    /// Gravitational acceleration in m/s^2
    pub gravity: f32,
    /// Mass in kg
    pub mass: f32,
    /// Suspended payload, if any
    pub payload: Option<PayloadParams2D>,
    /// Number of future reference points in the observation
    pub traj_obs_len: usize,
    /// Stride between observed reference points
    pub traj_obs_gap: usize,
    /// Episode length bound in steps
    pub max_steps_in_episode: usize,
}

impl Default for Params2D {
    fn default() -> Self {
        Self {
            max_bodyrate: 60.0,
            max_thrust: 0.8,
            dt: 0.02,
            gravity: 9.81,
            mass: 0.03,
            payload: None,
            traj_obs_len: 8,
            traj_obs_gap: 2,
            max_steps_in_episode: 300,
        }
    }
}

/// Parameters of a rope-suspended payload in the plane
#[derive(Clone, Debug, PartialEq)]
pub struct PayloadParams2D {
    /// Nominal rope length in m
    pub rope_length: f32,
    /// Hook position (y, z) relative to the quadrotor center, body frame
    pub hook_offset: Vector2<f32>,
}

impl Default for PayloadParams2D {
    fn default() -> Self {
        Self {
            rope_length: 0.3,
            hook_offset: Vector2::new(0.02, -0.06),
        }
    }
}

/// Planar payload, hook and rope state in the world frame
#[derive(Clone, Debug, PartialEq)]
pub struct PayloadState2D {
    /// Hook position (y, z)
    pub hook_position: Vector2<f32>,
    /// Hook velocity
    pub hook_velocity: Vector2<f32>,
    /// Payload position (y, z)
    pub position: Vector2<f32>,
    /// Payload velocity
    pub velocity: Vector2<f32>,
    /// Hook-to-payload distance, recomputed every step
    pub rope_length: f32,
    /// Rope angle relative to the body, zero when hanging straight below a level vehicle
    pub rope_angle: f32,
    /// Time derivative of `rope_angle`
    pub rope_angle_rate: f32,
    /// Rope tension magnitude in N
    pub rope_tension: f32,
}

impl PayloadState2D {
    /// Payload hanging straight below the hook of a level quadrotor at rest at `position`
    pub fn hanging(position: &Vector2<f32>, params: &PayloadParams2D) -> Self {
        let hook_position = position + params.hook_offset;
        Self {
            hook_position,
            hook_velocity: Vector2::zeros(),
            position: hook_position - Vector2::new(0.0, params.rope_length),
            velocity: Vector2::zeros(),
            rope_length: params.rope_length,
            rope_angle: 0.0,
            rope_angle_rate: 0.0,
            rope_tension: 0.0,
        }
    }
}

/// State of the planar quadrotor
#[derive(Clone, Debug)]
pub struct State2D {
    /// Position (y, z) in m
    pub position: Vector2<f32>,
    /// Velocity (y, z) in m/s
    pub velocity: Vector2<f32>,
    /// Roll angle in rad
    pub roll: f32,
    /// Roll rate in rad/s
    pub roll_rate: f32,
    /// Suspended payload, present when the parameters carry one
    pub payload: Option<PayloadState2D>,
    /// Last applied thrust, kept for diagnostics
    pub last_thrust: f32,
    /// Last applied roll rate command, kept for diagnostics
    pub last_roll_rate: f32,
    /// Shared, read-only reference for the episode
    pub reference: Arc<ReferenceTrajectory<2>>,
    /// Current target position
    pub position_target: Vector2<f32>,
    /// Current target velocity
    pub velocity_target: Vector2<f32>,
    /// Step index within the episode
    pub time: usize,
}

impl State2D {
    /// Creates a level state at rest at the origin with targets taken from step 0 of
    /// `reference`, and a hanging payload if `params` has one
    pub fn new(reference: Arc<ReferenceTrajectory<2>>, params: &Params2D) -> Self {
        let position = Vector2::zeros();
        Self {
            position,
            velocity: Vector2::zeros(),
            roll: 0.0,
            roll_rate: 0.0,
            payload: params
                .payload
                .as_ref()
                .map(|payload| PayloadState2D::hanging(&position, payload)),
            last_thrust: 0.0,
            last_roll_rate: 0.0,
            position_target: reference.position(0),
            velocity_target: reference.velocity(0),
            reference,
            time: 0,
        }
    }
}

/// Physical action for the planar quadrotor
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Action2D {
    /// Collective thrust in N
    pub thrust: f32,
    /// Commanded roll rate in rad/s
    pub roll_rate: f32,
}

/// Advances the planar body-rate quadrotor, and its payload if present, by one
/// semi-implicit Euler step. The roll rate is tracked instantly; the translational
/// acceleration uses the attitude at the start of the step.
/// # Example
/// ```
/// use std::sync::Arc;
/// use nalgebra::Vector2;
/// use quad_mppi::planners::{HoverPlanner, ReferenceTrajectory};
/// use quad_mppi::{step_bodyrate_2d, Action2D, Params2D, State2D};
/// let params = Params2D::default();
/// let hover = HoverPlanner { target_position: Vector2::zeros() };
/// let reference = Arc::new(ReferenceTrajectory::from_planner(&hover, params.dt, 10));
/// let state = State2D::new(reference, &params);
/// let action = Action2D { thrust: params.mass * params.gravity, roll_rate: 0.0 };
/// let next = step_bodyrate_2d(&params, &state, &action, params.dt);
/// assert!(next.velocity.norm() < 1e-6);
/// ```
pub fn step_bodyrate_2d(params: &Params2D, state: &State2D, action: &Action2D, dt: f32) -> State2D {
    let acceleration = Vector2::new(
        -action.thrust * state.roll.sin() / params.mass,
        action.thrust * state.roll.cos() / params.mass - params.gravity,
    );
    let velocity = state.velocity + acceleration * dt;
    let position = state.position + velocity * dt;
    let roll_rate = action.roll_rate;
    let roll = angle_normalize(state.roll + roll_rate * dt);
    let payload = match (&state.payload, &params.payload) {
        (Some(payload), Some(payload_params)) => Some(step_loose_payload_2d(
            payload,
            payload_params,
            &position,
            &velocity,
            roll,
            roll_rate,
            params.gravity,
            dt,
        )),
        _ => None,
    };
    State2D {
        position,
        velocity,
        roll,
        roll_rate,
        payload,
        last_thrust: action.thrust,
        last_roll_rate: action.roll_rate,
        ..state.clone()
    }
}

/// Loose-rope payload update in the plane. The rope angle is measured from the body
/// z axis, so it stays zero for a payload hanging below a level vehicle.
#[allow(clippy::too_many_arguments)]
fn step_loose_payload_2d(
    payload: &PayloadState2D,
    params: &PayloadParams2D,
    position: &Vector2<f32>,
    velocity: &Vector2<f32>,
    roll: f32,
    roll_rate: f32,
    gravity: f32,
    dt: f32,
) -> PayloadState2D {
    let payload_velocity = payload.velocity + Vector2::new(0.0, -gravity) * dt;
    let payload_position = payload.position + payload_velocity * dt;

    let hook_offset_world = Rotation2::new(roll) * params.hook_offset;
    let hook_position = position + hook_offset_world;
    let hook_velocity =
        velocity + Vector2::new(-hook_offset_world.y, hook_offset_world.x) * roll_rate;

    let payload_to_hook = hook_position - payload_position;
    let rope_length = payload_to_hook.norm();
    let safe_length = rope_length.max(MIN_ROPE_LENGTH);
    let world_angle = -payload_to_hook.x.atan2(payload_to_hook.y);
    let relative_velocity = hook_velocity - payload_velocity;
    let world_angle_rate = -(payload_to_hook.y * relative_velocity.x
        - payload_to_hook.x * relative_velocity.y)
        / (safe_length * safe_length);

    PayloadState2D {
        hook_position,
        hook_velocity,
        position: payload_position,
        velocity: payload_velocity,
        rope_length,
        rope_angle: angle_normalize(world_angle - roll),
        rope_angle_rate: world_angle_rate - roll_rate,
        rope_tension: 0.0,
    }
}

/// Parameters of a rope-suspended payload
#[derive(Clone, Debug, PartialEq)]
pub struct PayloadParams {
    /// Nominal rope length in m
    pub rope_length: f32,
    /// Hook position relative to the quadrotor center, body frame
    pub hook_offset: Vector3<f32>,
}

impl Default for PayloadParams {
    fn default() -> Self {
        Self {
            rope_length: 0.3,
            hook_offset: Vector3::new(0.03, 0.02, -0.06),
        }
    }
}

/// Physical parameters of the 3D quadrotor
/// # Example
/// ```
/// use quad_mppi::Params3D;
/// let params = Params3D::default()
///     .with_inertia([1.7e-5, 0.0, 0.0, 0.0, 1.7e-5, 0.0, 0.0, 0.0, 3.0e-5])
///     .unwrap();
/// assert!(params.payload.is_none());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Params3D {
    /// Maximum body torque per axis in N*m
    pub max_torque: Vector3<f32>,
    /// Maximum collective thrust in N
    pub max_thrust: f32,
    /// Integration step in seconds
    pub dt: f32,
    /// Gravitational acceleration in m/s^2
    pub gravity: f32,
    /// Mass in kg
    pub mass: f32,
    /// Inertia matrix in kg*m^2
    pub inertia_matrix: Matrix3<f32>,
    /// Inverse of the inertia matrix
    pub inertia_matrix_inv: Matrix3<f32>,
    /// Suspended payload, if any
    pub payload: Option<PayloadParams>,
    /// Number of future reference points in the observation
    pub traj_obs_len: usize,
    /// Stride between observed reference points
    pub traj_obs_gap: usize,
    /// Episode length bound in steps
    pub max_steps_in_episode: usize,
}

impl Default for Params3D {
    fn default() -> Self {
        let diagonal = Vector3::new(1.7e-5, 1.7e-5, 3.0e-5);
        Self {
            max_torque: Vector3::new(9e-3, 9e-3, 2e-3),
            max_thrust: 0.8,
            dt: 0.02,
            gravity: 9.81,
            mass: 0.03,
            inertia_matrix: Matrix3::from_diagonal(&diagonal),
            inertia_matrix_inv: Matrix3::from_diagonal(&diagonal.map(|i| 1.0 / i)),
            payload: None,
            traj_obs_len: 5,
            traj_obs_gap: 5,
            max_steps_in_episode: 300,
        }
    }
}

impl Params3D {
    /// Replaces the inertia matrix, given in row-major order
    /// # Errors
    /// * Returns a SimulationError if the inertia matrix cannot be inverted
    pub fn with_inertia(mut self, inertia_matrix: [f32; 9]) -> Result<Self, SimulationError> {
        let inertia_matrix = Matrix3::from_row_slice(&inertia_matrix);
        self.inertia_matrix_inv =
            inertia_matrix
                .try_inverse()
                .ok_or(SimulationError::NalgebraError(
                    "Failed to invert inertia matrix".to_string(),
                ))?;
        self.inertia_matrix = inertia_matrix;
        Ok(self)
    }
}

/// Payload, hook and rope state in the world frame
#[derive(Clone, Debug, PartialEq)]
pub struct PayloadState {
    /// Hook position
    pub hook_position: Vector3<f32>,
    /// Hook velocity
    pub hook_velocity: Vector3<f32>,
    /// Payload position
    pub position: Vector3<f32>,
    /// Payload velocity
    pub velocity: Vector3<f32>,
    /// Hook-to-payload distance, recomputed every step
    pub rope_length: f32,
    /// Unit vector from hook to payload
    pub rope_direction: Vector3<f32>,
    /// Time derivative of `rope_direction`
    pub rope_direction_rate: Vector3<f32>,
    /// Rope tension magnitude in N
    pub rope_tension: f32,
    /// Rope force on the quadrotor in N
    pub rope_force: Vector3<f32>,
}

impl PayloadState {
    /// Payload hanging straight below the hook of a level quadrotor at rest at `position`
    pub fn hanging(position: &Vector3<f32>, params: &PayloadParams) -> Self {
        let hook_position = position + params.hook_offset;
        Self {
            hook_position,
            hook_velocity: Vector3::zeros(),
            position: hook_position - Vector3::new(0.0, 0.0, params.rope_length),
            velocity: Vector3::zeros(),
            rope_length: params.rope_length,
            rope_direction: Vector3::new(0.0, 0.0, -1.0),
            rope_direction_rate: Vector3::zeros(),
            rope_tension: 0.0,
            rope_force: Vector3::zeros(),
        }
    }
}

/// State of the 3D quadrotor
#[derive(Clone, Debug)]
pub struct State3D {
    /// Position in m
    pub position: Vector3<f32>,
    /// Velocity in m/s
    pub velocity: Vector3<f32>,
    /// Attitude, body to world
    pub orientation: UnitQuaternion<f32>,
    /// Body angular velocity in rad/s
    pub angular_velocity: Vector3<f32>,
    /// Suspended payload, present when the parameters carry one
    pub payload: Option<PayloadState>,
    /// Last applied thrust, kept for diagnostics
    pub last_thrust: f32,
    /// Last applied body torque, kept for diagnostics
    pub last_torque: Vector3<f32>,
    /// Shared, read-only reference for the episode
    pub reference: Arc<ReferenceTrajectory<3>>,
    /// Current target position
    pub position_target: Vector3<f32>,
    /// Current target velocity
    pub velocity_target: Vector3<f32>,
    /// Step index within the episode
    pub time: usize,
}

impl State3D {
    /// Creates a level state at rest at the origin, with a hanging payload if `params` has one
    pub fn new(reference: Arc<ReferenceTrajectory<3>>, params: &Params3D) -> Self {
        let position = Vector3::zeros();
        Self {
            position,
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
            payload: params
                .payload
                .as_ref()
                .map(|payload| PayloadState::hanging(&position, payload)),
            last_thrust: 0.0,
            last_torque: Vector3::zeros(),
            position_target: reference.position(0),
            velocity_target: reference.velocity(0),
            reference,
            time: 0,
        }
    }
}

/// Physical action for the 3D quadrotor
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Action3D {
    /// Collective thrust along body z in N
    pub thrust: f32,
    /// Body torque in N*m
    pub torque: Vector3<f32>,
}

/// Integrates a body angular velocity into the attitude and re-normalizes
/// # Example
/// ```
/// use nalgebra::{UnitQuaternion, Vector3};
/// use quad_mppi::integrate_quaternion;
/// let q = integrate_quaternion(&UnitQuaternion::identity(), &Vector3::new(0.0, 0.0, 1.0), 0.01);
/// assert!((q.norm() - 1.0).abs() < 1e-6);
/// ```
pub fn integrate_quaternion(
    orientation: &UnitQuaternion<f32>,
    angular_velocity: &Vector3<f32>,
    dt: f32,
) -> UnitQuaternion<f32> {
    let omega_quat = Quaternion::new(
        0.0,
        angular_velocity.x,
        angular_velocity.y,
        angular_velocity.z,
    );
    let q_dot = orientation.into_inner() * omega_quat * 0.5;
    UnitQuaternion::new_normalize(orientation.into_inner() + q_dot * dt)
}

/// Advances the 3D quadrotor, and its payload if present, by one semi-implicit Euler step.
/// The payload is modeled in the loose regime: it falls freely and the rope exerts no force.
pub fn step_rigid_body_3d(
    params: &Params3D,
    state: &State3D,
    action: &Action3D,
    dt: f32,
) -> State3D {
    let gravity = Vector3::new(0.0, 0.0, -params.gravity);
    let thrust_world = state.orientation * Vector3::new(0.0, 0.0, action.thrust);
    let acceleration = thrust_world / params.mass + gravity;
    let velocity = state.velocity + acceleration * dt;
    let position = state.position + velocity * dt;

    let inertia_angular_velocity = params.inertia_matrix * state.angular_velocity;
    let gyroscopic_torque = state.angular_velocity.cross(&inertia_angular_velocity);
    let angular_acceleration = params.inertia_matrix_inv * (action.torque - gyroscopic_torque);
    let angular_velocity = state.angular_velocity + angular_acceleration * dt;
    let orientation = integrate_quaternion(&state.orientation, &angular_velocity, dt);

    let payload = match (&state.payload, &params.payload) {
        (Some(payload), Some(payload_params)) => Some(step_loose_payload(
            payload,
            payload_params,
            &position,
            &velocity,
            &orientation,
            &angular_velocity,
            params.gravity,
            dt,
        )),
        _ => None,
    };

    State3D {
        position,
        velocity,
        orientation,
        angular_velocity,
        payload,
        last_thrust: action.thrust,
        last_torque: action.torque,
        ..state.clone()
    }
}

/// Loose-rope payload update. The hook follows the already-updated quadrotor, the
/// payload falls freely and the rope geometry is derived from their displacement.
#[allow(clippy::too_many_arguments)]
fn step_loose_payload(
    payload: &PayloadState,
    params: &PayloadParams,
    position: &Vector3<f32>,
    velocity: &Vector3<f32>,
    orientation: &UnitQuaternion<f32>,
    angular_velocity: &Vector3<f32>,
    gravity: f32,
    dt: f32,
) -> PayloadState {
    let payload_velocity = payload.velocity + Vector3::new(0.0, 0.0, -gravity) * dt;
    let payload_position = payload.position + payload_velocity * dt;

    let hook_offset_world = orientation * params.hook_offset;
    let hook_position = position + hook_offset_world;
    let hook_velocity = velocity + (orientation * angular_velocity).cross(&hook_offset_world);

    let hook_to_payload = payload_position - hook_position;
    let rope_length = hook_to_payload.norm();
    let safe_length = rope_length.max(MIN_ROPE_LENGTH);
    let rope_direction = hook_to_payload / safe_length;
    let relative_velocity = payload_velocity - hook_velocity;
    let rope_direction_rate =
        (relative_velocity - rope_direction * rope_direction.dot(&relative_velocity)) / safe_length;

    PayloadState {
        hook_position,
        hook_velocity,
        position: payload_position,
        velocity: payload_velocity,
        rope_length,
        rope_direction,
        rope_direction_rate,
        rope_tension: 0.0,
        rope_force: Vector3::zeros(),
    }
}

/// Advances the time index of a planar state and pulls the next target from its reference
pub fn update_time_2d(state: State2D) -> State2D {
    let time = state.time + 1;
    State2D {
        time,
        position_target: state.reference.position(time),
        velocity_target: state.reference.velocity(time),
        ..state
    }
}

/// Advances the time index of a 3D state and pulls the next target from its reference
pub fn update_time_3d(state: State3D) -> State3D {
    let time = state.time + 1;
    State3D {
        time,
        position_target: state.reference.position(time),
        velocity_target: state.reference.velocity(time),
        ..state
    }
}
