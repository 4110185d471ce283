//! Tracking environments the controller rolls out against.
//!
//! An [`Environment`] owns the task (reference generation, reward, termination and the
//! mapping from normalized actions to physical units); the physics lives in
//! [`crate::lib_quadrotor`]. The controller only ever calls
//! [`Environment::step_without_controller`], once per sample and horizon step.
use crate::lib_quadrotor::{
    step_bodyrate_2d, step_rigid_body_3d, update_time_2d, update_time_3d, Action2D, Action3D,
    Params2D, Params3D, State2D, State3D,
};
use crate::planners::{HoverPlanner, PlannerType, ReferenceTrajectory};

use nalgebra::{DVector, Vector2, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Positions beyond this magnitude on any axis end the episode
pub const POSITION_BOUND: f32 = 3.0;

/// Diagnostic values reported by a transition
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepInfo {
    /// Distance between the tracked point and its target
    pub err_pos: f32,
    /// Velocity error of the tracked point
    pub err_vel: f32,
}

/// Result of a single environment step
#[derive(Clone, Debug)]
pub struct Transition<S> {
    /// Observation of the next state
    pub observation: DVector<f32>,
    /// The next state
    pub state: S,
    /// Reward of the state the step started from
    pub reward: f32,
    /// Whether the state the step started from is terminal
    pub done: bool,
    /// Tracking errors of the state the step started from
    pub info: StepInfo,
}

/// Types implementing this trait can be controlled by the MPPI controller.
/// Implementations must be pure with respect to `state`: the controller steps many
/// cloned states concurrently from several threads.
pub trait Environment: Sync {
    /// Full simulation state, cloned once per sample at the start of every rollout
    type State: Clone + Send + Sync;
    /// Immutable physical parameters
    type Params: Sync;

    /// Dimension of the normalized action
    fn action_dim(&self) -> usize;

    /// Dimension of the position reported by [`Environment::position`]
    fn position_dim(&self) -> usize;

    /// Normalized action that holds the vehicle in hover
    fn nominal_action(&self, params: &Self::Params) -> DVector<f32>;

    /// Starts an episode, generating its reference from `seed`
    fn reset(&self, seed: u64, params: &Self::Params) -> (DVector<f32>, Self::State);

    /// Advances `state` by one step under the normalized `action`. `seed` feeds any
    /// stochastic part of the transition; the built-in environments are deterministic.
    fn step_without_controller(
        &self,
        seed: u64,
        state: &Self::State,
        action: &DVector<f32>,
        params: &Self::Params,
    ) -> Transition<Self::State>;

    /// Steps the real system; identical to [`Environment::step_without_controller`]
    fn step(
        &self,
        seed: u64,
        state: &Self::State,
        action: &DVector<f32>,
        params: &Self::Params,
    ) -> Transition<Self::State> {
        self.step_without_controller(seed, state, action, params)
    }

    fn observation(&self, state: &Self::State, params: &Self::Params) -> DVector<f32>;

    fn is_terminal(&self, state: &Self::State, params: &Self::Params) -> bool;

    /// Position of the tracked point, used for diagnostics
    fn position(&self, state: &Self::State) -> DVector<f32>;

    /// Current target of the tracked point
    fn target(&self, state: &Self::State) -> DVector<f32>;
}

/// Shaped tracking reward: a linear position and velocity penalty plus saturating
/// logarithmic terms that sharpen the reward close to the target.
/// # Example
/// ```
/// use quad_mppi::environment::tracking_reward;
/// assert!(tracking_reward(0.0, 0.0) > tracking_reward(0.1, 0.0));
/// assert!(tracking_reward(0.1, 0.0) > tracking_reward(0.1, 1.0));
/// ```
pub fn tracking_reward(err_pos: f32, err_vel: f32) -> f32 {
    let log_err = (err_pos + 1.0).ln();
    0.9 - 0.05 * err_vel
        - 0.4 * err_pos
        - 0.4 * (log_err * 4.0).clamp(0.0, 1.0)
        - 0.2 * (log_err * 8.0).clamp(0.0, 1.0)
        - 0.1 * (log_err * 16.0).clamp(0.0, 1.0)
        - 0.1 * (log_err * 32.0).clamp(0.0, 1.0)
}

/// Maps a normalized thrust command in [-1, 1] to [0, max_thrust]
#[inline]
fn thrust_from_normalized(action: f32, max_thrust: f32) -> f32 {
    (action + 1.0) / 2.0 * max_thrust
}

/// Inverse of [`thrust_from_normalized`]
#[inline]
fn normalized_from_thrust(thrust: f32, max_thrust: f32) -> f32 {
    2.0 * thrust / max_thrust - 1.0
}

/// Indices of the reference points included in the observation
fn lookahead_indices(time: usize, len: usize, gap: usize) -> impl Iterator<Item = usize> {
    (0..len).map(move |k| time + 1 + k * gap)
}

fn reference_len(max_steps_in_episode: usize, traj_obs_len: usize, traj_obs_gap: usize) -> usize {
    max_steps_in_episode + 2 + traj_obs_len * traj_obs_gap
}

/// Planar tracking task with a body-rate quadrotor. When the parameters carry a
/// payload, the payload is the tracked point.
/// # Example
/// ```
/// use quad_mppi::{Environment, Params2D, Quad2DEnv};
/// let env = Quad2DEnv::hover();
/// let params = Params2D::default();
/// let (obs, state) = env.reset(0, &params);
/// let transition = env.step(0, &state, &env.nominal_action(&params), &params);
/// assert_eq!(obs.len(), transition.observation.len());
/// assert_eq!(transition.state.time, 1);
/// ```
#[derive(Clone, Debug)]
pub struct Quad2DEnv {
    /// Reference generator used at reset
    pub planner: PlannerType<2>,
    /// Re-draw the planner's free parameters from the reset seed
    pub randomize_reference: bool,
}

impl Quad2DEnv {
    pub fn new(planner: PlannerType<2>, randomize_reference: bool) -> Self {
        Self {
            planner,
            randomize_reference,
        }
    }

    /// Hover at the origin
    pub fn hover() -> Self {
        Self::new(
            PlannerType::Hover(HoverPlanner {
                target_position: Vector2::zeros(),
            }),
            false,
        )
    }

    /// Converts a normalized action into physical units
    pub fn physical_action(action: &DVector<f32>, params: &Params2D) -> Action2D {
        Action2D {
            thrust: thrust_from_normalized(action[0], params.max_thrust),
            roll_rate: action[1] * params.max_bodyrate,
        }
    }

    fn tracked(state: &State2D) -> (Vector2<f32>, Vector2<f32>) {
        match &state.payload {
            Some(payload) => (payload.position, payload.velocity),
            None => (state.position, state.velocity),
        }
    }

    fn errors(state: &State2D) -> StepInfo {
        let (position, velocity) = Self::tracked(state);
        StepInfo {
            err_pos: (state.position_target - position).norm(),
            err_vel: (state.velocity_target - velocity).norm(),
        }
    }
}

impl Environment for Quad2DEnv {
    type State = State2D;
    type Params = Params2D;

    fn action_dim(&self) -> usize {
        2
    }

    fn position_dim(&self) -> usize {
        2
    }

    fn nominal_action(&self, params: &Params2D) -> DVector<f32> {
        DVector::from_vec(vec![
            normalized_from_thrust(params.mass * params.gravity, params.max_thrust),
            0.0,
        ])
    }

    fn reset(&self, seed: u64, params: &Params2D) -> (DVector<f32>, State2D) {
        let planner = if self.randomize_reference {
            self.planner.randomized(&mut ChaCha8Rng::seed_from_u64(seed))
        } else {
            self.planner.clone()
        };
        let len = reference_len(
            params.max_steps_in_episode,
            params.traj_obs_len,
            params.traj_obs_gap,
        );
        let reference = ReferenceTrajectory::from_planner(&planner, params.dt, len);
        let state = State2D::new(Arc::new(reference), params);
        (self.observation(&state, params), state)
    }

    fn step_without_controller(
        &self,
        _seed: u64,
        state: &State2D,
        action: &DVector<f32>,
        params: &Params2D,
    ) -> Transition<State2D> {
        let info = Self::errors(state);
        let reward = tracking_reward(info.err_pos, info.err_vel);
        let done = self.is_terminal(state, params);
        let physical = Self::physical_action(action, params);
        let next = update_time_2d(step_bodyrate_2d(params, state, &physical, params.dt));
        Transition {
            observation: self.observation(&next, params),
            state: next,
            reward,
            done,
            info,
        }
    }

    fn observation(&self, state: &State2D, params: &Params2D) -> DVector<f32> {
        let mut obs = Vec::with_capacity(17 + 4 * params.traj_obs_len);
        obs.extend(state.position.iter());
        obs.extend((state.velocity / 4.0).iter());
        obs.push(state.roll);
        obs.push(state.roll_rate / 40.0);
        if let Some(payload) = &state.payload {
            obs.extend((payload.position - state.position).iter());
            obs.extend((payload.velocity / 4.0).iter());
            obs.push(payload.rope_angle);
            obs.push(payload.rope_angle_rate / 10.0);
            obs.push(payload.rope_length);
        }
        obs.extend(state.position_target.iter());
        obs.extend((state.velocity_target / 4.0).iter());
        let indices: Vec<usize> =
            lookahead_indices(state.time, params.traj_obs_len, params.traj_obs_gap).collect();
        for &i in &indices {
            obs.extend(state.reference.position(i).iter());
        }
        for &i in &indices {
            obs.extend((state.reference.velocity(i) / 4.0).iter());
        }
        DVector::from_vec(obs)
    }

    fn is_terminal(&self, state: &State2D, params: &Params2D) -> bool {
        let (tracked, _) = Self::tracked(state);
        state.time >= params.max_steps_in_episode
            || state.position.iter().any(|p| p.abs() > POSITION_BOUND)
            || tracked.iter().any(|p| p.abs() > POSITION_BOUND)
    }

    fn position(&self, state: &State2D) -> DVector<f32> {
        let (position, _) = Self::tracked(state);
        DVector::from_column_slice(position.as_slice())
    }

    fn target(&self, state: &State2D) -> DVector<f32> {
        DVector::from_column_slice(state.position_target.as_slice())
    }
}

/// 3D tracking task with a torque-controlled quadrotor. When the parameters carry a
/// payload, the payload is the tracked point.
#[derive(Clone, Debug)]
pub struct Quad3DEnv {
    /// Reference generator used at reset
    pub planner: PlannerType<3>,
    /// Re-draw the planner's free parameters from the reset seed
    pub randomize_reference: bool,
}

impl Quad3DEnv {
    pub fn new(planner: PlannerType<3>, randomize_reference: bool) -> Self {
        Self {
            planner,
            randomize_reference,
        }
    }

    /// Hover at the origin
    pub fn hover() -> Self {
        Self::new(
            PlannerType::Hover(HoverPlanner {
                target_position: Vector3::zeros(),
            }),
            false,
        )
    }

    /// Converts a normalized action into physical units
    pub fn physical_action(action: &DVector<f32>, params: &Params3D) -> Action3D {
        Action3D {
            thrust: thrust_from_normalized(action[0], params.max_thrust),
            torque: Vector3::new(action[1], action[2], action[3]).component_mul(&params.max_torque),
        }
    }

    fn tracked(state: &State3D) -> (Vector3<f32>, Vector3<f32>) {
        match &state.payload {
            Some(payload) => (payload.position, payload.velocity),
            None => (state.position, state.velocity),
        }
    }

    fn errors(state: &State3D) -> StepInfo {
        let (position, velocity) = Self::tracked(state);
        StepInfo {
            err_pos: (state.position_target - position).norm(),
            err_vel: (state.velocity_target - velocity).norm(),
        }
    }
}

impl Environment for Quad3DEnv {
    type State = State3D;
    type Params = Params3D;

    fn action_dim(&self) -> usize {
        4
    }

    fn position_dim(&self) -> usize {
        3
    }

    fn nominal_action(&self, params: &Params3D) -> DVector<f32> {
        DVector::from_vec(vec![
            normalized_from_thrust(params.mass * params.gravity, params.max_thrust),
            0.0,
            0.0,
            0.0,
        ])
    }

    fn reset(&self, seed: u64, params: &Params3D) -> (DVector<f32>, State3D) {
        let planner = if self.randomize_reference {
            self.planner.randomized(&mut ChaCha8Rng::seed_from_u64(seed))
        } else {
            self.planner.clone()
        };
        let len = reference_len(
            params.max_steps_in_episode,
            params.traj_obs_len,
            params.traj_obs_gap,
        );
        let reference = ReferenceTrajectory::from_planner(&planner, params.dt, len);
        let state = State3D::new(Arc::new(reference), params);
        (self.observation(&state, params), state)
    }

    fn step_without_controller(
        &self,
        _seed: u64,
        state: &State3D,
        action: &DVector<f32>,
        params: &Params3D,
    ) -> Transition<State3D> {
        let info = Self::errors(state);
        let reward = tracking_reward(info.err_pos, info.err_vel);
        let done = self.is_terminal(state, params);
        let physical = Self::physical_action(action, params);
        let next = update_time_3d(step_rigid_body_3d(params, state, &physical, params.dt));
        Transition {
            observation: self.observation(&next, params),
            state: next,
            reward,
            done,
            info,
        }
    }

    fn observation(&self, state: &State3D, params: &Params3D) -> DVector<f32> {
        let mut obs = Vec::with_capacity(32 + 6 * params.traj_obs_len);
        obs.extend(state.position.iter());
        obs.extend((state.velocity / 4.0).iter());
        obs.extend(state.orientation.coords.iter());
        obs.extend((state.angular_velocity / 40.0).iter());
        if let Some(payload) = &state.payload {
            obs.extend((payload.position - state.position).iter());
            obs.extend((payload.velocity / 4.0).iter());
            obs.extend(payload.rope_direction.iter());
            obs.extend((payload.rope_direction_rate / 10.0).iter());
            obs.push(payload.rope_length);
        }
        obs.extend(state.position_target.iter());
        obs.extend((state.velocity_target / 4.0).iter());
        let indices: Vec<usize> =
            lookahead_indices(state.time, params.traj_obs_len, params.traj_obs_gap).collect();
        for &i in &indices {
            obs.extend(state.reference.position(i).iter());
        }
        for &i in &indices {
            obs.extend((state.reference.velocity(i) / 4.0).iter());
        }
        DVector::from_vec(obs)
    }

    fn is_terminal(&self, state: &State3D, params: &Params3D) -> bool {
        let (tracked, _) = Self::tracked(state);
        state.time >= params.max_steps_in_episode
            || state.position.iter().any(|p| p.abs() > POSITION_BOUND)
            || tracked.iter().any(|p| p.abs() > POSITION_BOUND)
    }

    fn position(&self, state: &State3D) -> DVector<f32> {
        let (position, _) = Self::tracked(state);
        DVector::from_column_slice(position.as_slice())
    }

    fn target(&self, state: &State3D) -> DVector<f32> {
        DVector::from_column_slice(state.position_target.as_slice())
    }
}
