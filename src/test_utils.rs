//! Lightweight environments for controller and rollout tests.
use crate::environment::{Environment, StepInfo, Transition};

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic generator for test inputs
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Deterministic vector with entries in [-1, 1)
pub fn deterministic_action(dim: usize, seed: u64) -> DVector<f32> {
    let mut rng = seeded_rng(seed);
    DVector::from_fn(dim, |_, _| rng.gen_range(-1.0..1.0))
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointState {
    pub position: DVector<f32>,
    pub time: usize,
}

#[derive(Clone, Debug)]
pub struct PointParams {
    pub target: DVector<f32>,
    pub dt: f32,
    pub max_steps_in_episode: usize,
}

/// Single integrator `x += a * dt` rewarded for staying near `params.target`.
/// With `constant_reward` set every step returns that reward instead.
pub struct PointEnv {
    pub dim: usize,
    pub constant_reward: Option<f32>,
}

impl PointEnv {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            constant_reward: None,
        }
    }

    pub fn constant(dim: usize, reward: f32) -> Self {
        Self {
            dim,
            constant_reward: Some(reward),
        }
    }

    pub fn params(&self, target: &[f32]) -> PointParams {
        PointParams {
            target: DVector::from_column_slice(target),
            dt: 0.1,
            max_steps_in_episode: 50,
        }
    }
}

impl Environment for PointEnv {
    type State = PointState;
    type Params = PointParams;

    fn action_dim(&self) -> usize {
        self.dim
    }

    fn position_dim(&self) -> usize {
        self.dim
    }

    fn nominal_action(&self, _params: &PointParams) -> DVector<f32> {
        DVector::zeros(self.dim)
    }

    fn reset(&self, _seed: u64, params: &PointParams) -> (DVector<f32>, PointState) {
        let state = PointState {
            position: DVector::zeros(self.dim),
            time: 0,
        };
        (self.observation(&state, params), state)
    }

    fn step_without_controller(
        &self,
        _seed: u64,
        state: &PointState,
        action: &DVector<f32>,
        params: &PointParams,
    ) -> Transition<PointState> {
        let err_pos = (&state.position - &params.target).norm();
        let reward = self.constant_reward.unwrap_or(-err_pos * err_pos);
        let done = self.is_terminal(state, params);
        let next = PointState {
            position: &state.position + action * params.dt,
            time: state.time + 1,
        };
        Transition {
            observation: self.observation(&next, params),
            state: next,
            reward,
            done,
            info: StepInfo {
                err_pos,
                err_vel: 0.0,
            },
        }
    }

    fn observation(&self, state: &PointState, _params: &PointParams) -> DVector<f32> {
        state.position.clone()
    }

    fn is_terminal(&self, state: &PointState, params: &PointParams) -> bool {
        state.time >= params.max_steps_in_episode
    }

    fn position(&self, state: &PointState) -> DVector<f32> {
        state.position.clone()
    }

    fn target(&self, _state: &PointState) -> DVector<f32> {
        DVector::zeros(self.dim)
    }
}

/// Scalar accumulator `value += a[0]` whose reward is the accumulated value and which
/// reports `done` once the value reaches `threshold` before a step.
pub struct RampEnv {
    pub threshold: f32,
}

impl Environment for RampEnv {
    type State = PointState;
    type Params = ();

    fn action_dim(&self) -> usize {
        1
    }

    fn position_dim(&self) -> usize {
        1
    }

    fn nominal_action(&self, _params: &()) -> DVector<f32> {
        DVector::zeros(1)
    }

    fn reset(&self, _seed: u64, params: &()) -> (DVector<f32>, PointState) {
        let state = PointState {
            position: DVector::zeros(1),
            time: 0,
        };
        (self.observation(&state, params), state)
    }

    fn step_without_controller(
        &self,
        _seed: u64,
        state: &PointState,
        action: &DVector<f32>,
        params: &(),
    ) -> Transition<PointState> {
        let done = self.is_terminal(state, params);
        let next = PointState {
            position: &state.position + action,
            time: state.time + 1,
        };
        Transition {
            observation: self.observation(&next, params),
            reward: next.position[0],
            state: next,
            done,
            info: StepInfo::default(),
        }
    }

    fn observation(&self, state: &PointState, _params: &()) -> DVector<f32> {
        state.position.clone()
    }

    fn is_terminal(&self, state: &PointState, _params: &()) -> bool {
        state.position[0] >= self.threshold
    }

    fn position(&self, state: &PointState) -> DVector<f32> {
        state.position.clone()
    }

    fn target(&self, _state: &PointState) -> DVector<f32> {
        DVector::zeros(1)
    }
}
