//! Lock-step batch rollout of sampled action sequences.
//!
//! Every sample advances one horizon step at a time from its own clone of the current
//! state. The samples of a step run in parallel and the loop over steps is the barrier:
//! step `h + 1` starts only after every sample has finished step `h`.
use crate::environment::Environment;
use crate::sampler::ActionSequence;

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Rewards and positions of a rolled-out batch
#[derive(Clone, Debug, PartialEq)]
pub struct RolloutOutput {
    /// N x H rewards, held at their last value after a sample terminates
    pub rewards: DMatrix<f32>,
    /// For every horizon step, the N x P positions reached after that step
    pub positions: Vec<DMatrix<f32>>,
    /// Whether each sample terminated within the horizon
    pub dones: Vec<bool>,
}

impl RolloutOutput {
    pub fn num_terminated(&self) -> usize {
        self.dones.iter().filter(|&&done| done).count()
    }
}

/// Per-sample carry across horizon steps
struct Carry<S> {
    state: S,
    reward: f32,
    done: bool,
}

/// Seeds handed to the environment at every horizon step, shared by the whole batch
pub fn step_seeds(seed: u64, horizon: usize) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..horizon).map(|_| rng.gen()).collect()
}

/// Rolls every action sequence out from `state` for the full horizon.
///
/// Once a sample reports `done`, its reward for all later steps is held at the last
/// reward it produced and its `done` flag stays set. The state keeps evolving.
/// # Arguments
/// * `env` - Environment providing the transition
/// * `state` - Current state, cloned once per sample
/// * `params` - Physical parameters shared by all samples
/// * `samples` - N action sequences of equal length H
/// * `seed` - Seed of the stochastic part of the transitions
pub fn rollout<E: Environment>(
    env: &E,
    state: &E::State,
    params: &E::Params,
    samples: &[ActionSequence],
    seed: u64,
) -> RolloutOutput {
    let num_samples = samples.len();
    let horizon = samples.first().map_or(0, |sequence| sequence.len());
    let position_dim = env.position_dim();
    let mut carries: Vec<Carry<E::State>> = (0..num_samples)
        .map(|_| Carry {
            state: state.clone(),
            reward: 0.0,
            done: false,
        })
        .collect();
    let mut rewards = DMatrix::zeros(num_samples, horizon);
    let mut positions = Vec::with_capacity(horizon);
    for (step, step_seed) in step_seeds(seed, horizon).into_iter().enumerate() {
        carries
            .par_iter_mut()
            .zip(samples.par_iter())
            .for_each(|(carry, sequence)| {
                let transition =
                    env.step_without_controller(step_seed, &carry.state, &sequence[step], params);
                if !carry.done {
                    carry.reward = transition.reward;
                }
                carry.done |= transition.done;
                carry.state = transition.state;
            });
        let step_positions: Vec<DVector<f32>> = carries
            .par_iter()
            .map(|carry| env.position(&carry.state))
            .collect();
        for (sample, carry) in carries.iter().enumerate() {
            rewards[(sample, step)] = carry.reward;
        }
        positions.push(DMatrix::from_fn(num_samples, position_dim, |i, j| {
            step_positions[i][j]
        }));
    }
    RolloutOutput {
        rewards,
        positions,
        dones: carries.iter().map(|carry| carry.done).collect(),
    }
}
