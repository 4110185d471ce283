use crate::distribution::{BatchStatistics, ControlDistribution};
use crate::environment::Environment;
use crate::rollout::{rollout, RolloutOutput};
use crate::sampler::sample_batch;
use crate::weighting::{discounted_returns, effective_sample_size, importance_weights};
use crate::SimulationError;

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Model Predictive Path Integral controller
///
/// The number of samples N, the horizon H and the temperature lambda are fixed at
/// construction. Everything that changes between ticks lives in the
/// [`ControlDistribution`] passed to and returned from [`MppiController::control_tick`].
/// # Example
/// ```
/// use quad_mppi::{MppiController, Quad3DEnv};
/// let controller = MppiController::new(Quad3DEnv::hover(), 256, 30, 0.05).unwrap();
/// assert_eq!(controller.horizon(), 30);
/// assert!(MppiController::new(Quad3DEnv::hover(), 0, 30, 0.05).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct MppiController<E: Environment> {
    env: E,
    num_samples: usize,
    horizon: usize,
    lambda: f32,
}

/// Result of one control tick
#[derive(Clone, Debug, PartialEq)]
pub struct ControlOutput {
    /// Normalized action to apply, the first step of the updated mean
    pub action: DVector<f32>,
    /// Updated distribution, to be passed to the next tick
    pub distribution: ControlDistribution,
    pub diagnostics: Diagnostics,
}

/// Batch statistics reported by a tick
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostics {
    /// Mean position across the batch after every horizon step
    pub position_mean: Vec<DVector<f32>>,
    /// Standard deviation of the position across the batch after every horizon step
    pub position_std: Vec<DVector<f32>>,
    /// Importance weight of every sample
    pub weights: Vec<f32>,
    /// Smallest finite cost of the batch, `+inf` if there is none
    pub min_cost: f32,
    pub effective_sample_size: f32,
    /// Samples that reached a terminal state within the horizon
    pub num_terminated: usize,
}

/// Per-step mean and population standard deviation of N x P positions
fn position_statistics(positions: &DMatrix<f32>) -> (DVector<f32>, DVector<f32>) {
    let n = positions.nrows().max(1) as f32;
    let mean = DVector::from_fn(positions.ncols(), |j, _| positions.column(j).sum() / n);
    let std = DVector::from_fn(positions.ncols(), |j, _| {
        let variance = positions
            .column(j)
            .iter()
            .map(|p| (p - mean[j]).powi(2))
            .sum::<f32>()
            / n;
        variance.sqrt()
    });
    (mean, std)
}

impl Diagnostics {
    fn new(rollout: &RolloutOutput, costs: &[f32], weights: Vec<f32>) -> Self {
        let (position_mean, position_std): (Vec<_>, Vec<_>) =
            rollout.positions.iter().map(position_statistics).unzip();
        Self {
            position_mean,
            position_std,
            min_cost: costs
                .iter()
                .copied()
                .filter(|c| c.is_finite())
                .fold(f32::INFINITY, f32::min),
            effective_sample_size: effective_sample_size(&weights),
            weights,
            num_terminated: rollout.num_terminated(),
        }
    }
}

impl<E: Environment> MppiController<E> {
    /// Creates a new controller
    /// # Arguments
    /// * `env` - Environment the samples are rolled out against
    /// * `num_samples` - Number of sampled sequences N per tick
    /// * `horizon` - Planning horizon H in environment steps
    /// * `lambda` - Temperature of the importance weights
    /// # Errors
    /// * If N or H is zero, or lambda is not a positive finite number
    pub fn new(
        env: E,
        num_samples: usize,
        horizon: usize,
        lambda: f32,
    ) -> Result<Self, SimulationError> {
        if num_samples == 0 {
            return Err(SimulationError::InvalidConfig(
                "num_samples must be at least one".to_string(),
            ));
        }
        if horizon == 0 {
            return Err(SimulationError::InvalidConfig(
                "horizon must be at least one step".to_string(),
            ));
        }
        if !(lambda.is_finite() && lambda > 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "lambda must be positive, got {lambda}"
            )));
        }
        Ok(Self {
            env,
            num_samples,
            horizon,
            lambda,
        })
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    /// Distribution with `mean` at every horizon step and an isotropic covariance
    /// # Arguments
    /// * `mean` - Normalized action repeated over the horizon
    /// * `sigma` - Standard deviation of every action component
    /// * `gamma_mean` - Blend factor of the batch mean
    /// * `gamma_sigma` - Blend factor of the batch covariance
    /// * `discount` - Per-step reward discount
    pub fn initial_distribution(
        &self,
        mean: &DVector<f32>,
        sigma: f32,
        gamma_mean: f32,
        gamma_sigma: f32,
        discount: f32,
    ) -> Result<ControlDistribution, SimulationError> {
        let action_dim = self.env.action_dim();
        if mean.len() != action_dim {
            return Err(SimulationError::DimensionMismatch(format!(
                "initial mean has {} components, the environment expects {action_dim}",
                mean.len()
            )));
        }
        if !(sigma.is_finite() && sigma >= 0.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "sample sigma must be non-negative, got {sigma}"
            )));
        }
        ControlDistribution::constant(
            self.horizon,
            mean,
            &DMatrix::from_diagonal_element(action_dim, action_dim, sigma * sigma),
            gamma_mean,
            gamma_sigma,
            discount,
        )
    }

    /// Runs one MPPI iteration: shift the plan, sample N sequences, roll them out,
    /// weight them by their discounted cost and blend the weighted statistics back
    /// into the distribution.
    /// # Arguments
    /// * `observation` - Current observation; planning uses `state` and ignores it
    /// * `state` - Current state, cloned for every sample
    /// * `params` - Physical parameters
    /// * `seed` - Seed of this tick, the same seed reproduces the tick exactly
    /// * `distribution` - Distribution returned by the previous tick
    /// # Errors
    /// * If the distribution fails [`ControlDistribution::validate`], or does not match
    ///   the controller's horizon or the environment's action dimension
    pub fn control_tick(
        &self,
        _observation: &DVector<f32>,
        state: &E::State,
        params: &E::Params,
        seed: u64,
        mut distribution: ControlDistribution,
    ) -> Result<ControlOutput, SimulationError> {
        distribution.validate()?;
        if distribution.horizon() != self.horizon
            || distribution.action_dim() != self.env.action_dim()
        {
            return Err(SimulationError::DimensionMismatch(format!(
                "distribution has horizon {} and action dimension {}, expected {} and {}",
                distribution.horizon(),
                distribution.action_dim(),
                self.horizon,
                self.env.action_dim()
            )));
        }
        distribution.shift();
        distribution.sanitize();

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sample_seed: u64 = rng.gen();
        let step_seed: u64 = rng.gen();

        let samples = sample_batch(&distribution, self.num_samples, sample_seed);
        let output = rollout(&self.env, state, params, &samples, step_seed);
        let costs: Vec<f32> = discounted_returns(&output.rewards, distribution.discount)
            .into_iter()
            .map(|r| -r)
            .collect();
        let weights = importance_weights(&costs, self.lambda);
        distribution.blend(&BatchStatistics::weighted(&samples, &weights));

        let diagnostics = Diagnostics::new(&output, &costs, weights);
        log::debug!(
            "tick seed {seed}: min cost {:.4}, effective samples {:.1}/{}, terminated {}",
            diagnostics.min_cost,
            diagnostics.effective_sample_size,
            self.num_samples,
            diagnostics.num_terminated
        );
        Ok(ControlOutput {
            action: distribution.mean_at(0).clone(),
            distribution,
            diagnostics,
        })
    }
}

/// Seed of tick `tick` of a policy seeded with `seed`
pub fn tick_seed(seed: u64, tick: u64) -> u64 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(tick);
    rng.gen()
}

/// Closed-loop wrapper that owns the distribution between ticks
/// # Example
/// ```
/// use quad_mppi::{Environment, MppiController, MppiPolicy, Params2D, Quad2DEnv};
/// let params = Params2D::default();
/// let controller = MppiController::new(Quad2DEnv::hover(), 8, 3, 0.1).unwrap();
/// let initial = controller
///     .initial_distribution(&controller.env().nominal_action(&params), 0.1, 0.5, 0.5, 1.0)
///     .unwrap();
/// let mut policy = MppiPolicy::new(controller, initial, 1);
/// let (obs, state) = policy.controller().env().reset(0, &params);
/// let (action, _) = policy.act(&obs, &state, &params).unwrap();
/// assert_eq!(action.len(), 2);
/// assert_eq!(policy.tick(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct MppiPolicy<E: Environment> {
    controller: MppiController<E>,
    initial: ControlDistribution,
    distribution: ControlDistribution,
    seed: u64,
    tick: u64,
}

impl<E: Environment> MppiPolicy<E> {
    pub fn new(controller: MppiController<E>, initial: ControlDistribution, seed: u64) -> Self {
        Self {
            controller,
            distribution: initial.clone(),
            initial,
            seed,
            tick: 0,
        }
    }

    pub fn controller(&self) -> &MppiController<E> {
        &self.controller
    }

    pub fn distribution(&self) -> &ControlDistribution {
        &self.distribution
    }

    /// Number of ticks since the last reset
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Runs one tick and keeps the updated distribution for the next one.
    /// On error the distribution and the tick counter are left unchanged.
    pub fn act(
        &mut self,
        observation: &DVector<f32>,
        state: &E::State,
        params: &E::Params,
    ) -> Result<(DVector<f32>, Diagnostics), SimulationError> {
        let output = self.controller.control_tick(
            observation,
            state,
            params,
            tick_seed(self.seed, self.tick),
            self.distribution.clone(),
        )?;
        self.distribution = output.distribution;
        self.tick += 1;
        Ok((output.action, output.diagnostics))
    }

    /// Restores the initial distribution for a new episode seeded with `seed`
    pub fn reset(&mut self, seed: u64) {
        self.distribution = self.initial.clone();
        self.seed = seed;
        self.tick = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{deterministic_action, PointEnv};
    use approx::assert_relative_eq;

    #[test]
    fn test_single_sample_zero_covariance() {
        let env = PointEnv::new(2);
        let params = env.params(&[1.0, 1.0]);
        let controller = MppiController::new(env, 1, 1, 0.1).unwrap();
        let mean = DVector::from_vec(vec![0.5, 0.0]);
        let distribution = controller
            .initial_distribution(&mean, 0.0, 0.5, 0.5, 1.0)
            .unwrap();
        let old_mean = distribution.mean_at(0).clone();
        let (obs, state) = controller.env().reset(0, &params);
        let output = controller
            .control_tick(&obs, &state, &params, 4, distribution)
            .unwrap();
        assert_eq!(output.diagnostics.weights, vec![1.0]);
        let expected = &mean * 0.5 + old_mean * 0.5;
        assert_relative_eq!(output.action, expected, epsilon = 1e-6);
        assert_eq!(output.distribution.action_covariance[0], DMatrix::zeros(2, 2));
    }

    #[test]
    fn test_equal_rewards_give_uniform_weights() {
        let env = PointEnv::constant(2, 0.3);
        let params = env.params(&[0.0, 0.0]);
        let controller = MppiController::new(env, 4, 5, 0.01).unwrap();
        let distribution = controller
            .initial_distribution(&DVector::zeros(2), 0.3, 0.5, 0.5, 0.9)
            .unwrap();
        let (obs, state) = controller.env().reset(0, &params);
        let output = controller
            .control_tick(&obs, &state, &params, 8, distribution)
            .unwrap();
        assert_eq!(output.diagnostics.weights, vec![0.25; 4]);
        assert_eq!(output.diagnostics.effective_sample_size, 4.0);
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let env = PointEnv::new(3);
        let params = env.params(&[0.5, -0.2, 0.1]);
        let controller = MppiController::new(env, 64, 8, 0.05).unwrap();
        let distribution = controller
            .initial_distribution(&deterministic_action(3, 2), 0.2, 0.8, 0.2, 0.99)
            .unwrap();
        let (obs, state) = controller.env().reset(0, &params);
        let first = controller
            .control_tick(&obs, &state, &params, 21, distribution.clone())
            .unwrap();
        let second = controller
            .control_tick(&obs, &state, &params, 21, distribution.clone())
            .unwrap();
        let other = controller
            .control_tick(&obs, &state, &params, 22, distribution)
            .unwrap();
        assert_eq!(first, second);
        assert_ne!(first.action, other.action);
    }

    #[test]
    fn test_tick_moves_mean_towards_target() {
        let env = PointEnv::new(1);
        let params = env.params(&[1.0]);
        let controller = MppiController::new(env, 256, 10, 0.1).unwrap();
        let distribution = controller
            .initial_distribution(&DVector::zeros(1), 0.5, 1.0, 0.5, 1.0)
            .unwrap();
        let (obs, state) = controller.env().reset(0, &params);
        let output = controller
            .control_tick(&obs, &state, &params, 5, distribution)
            .unwrap();
        assert!(output.action[0] > 0.0);
        assert!(output.action.iter().all(|a| a.abs() <= 1.0));
        assert_eq!(output.diagnostics.position_mean.len(), 10);
        assert!(output.diagnostics.position_std[9][0] > 0.0);
        assert!(output.diagnostics.min_cost.is_finite());
    }

    #[test]
    fn test_construction_errors() {
        assert!(MppiController::new(PointEnv::new(1), 0, 5, 0.1).is_err());
        assert!(MppiController::new(PointEnv::new(1), 5, 0, 0.1).is_err());
        assert!(MppiController::new(PointEnv::new(1), 5, 5, 0.0).is_err());
        assert!(MppiController::new(PointEnv::new(1), 5, 5, f32::NAN).is_err());
        let controller = MppiController::new(PointEnv::new(2), 5, 5, 0.1).unwrap();
        assert!(controller
            .initial_distribution(&DVector::zeros(3), 0.1, 0.5, 0.5, 1.0)
            .is_err());
        assert!(controller
            .initial_distribution(&DVector::zeros(2), -0.1, 0.5, 0.5, 1.0)
            .is_err());
    }

    #[test]
    fn test_tick_rejects_mismatched_distribution() {
        let env = PointEnv::new(2);
        let params = env.params(&[0.0, 0.0]);
        let short = MppiController::new(PointEnv::new(2), 4, 3, 0.1).unwrap();
        let controller = MppiController::new(env, 4, 5, 0.1).unwrap();
        let distribution = short
            .initial_distribution(&DVector::zeros(2), 0.1, 0.5, 0.5, 1.0)
            .unwrap();
        let (obs, state) = controller.env().reset(0, &params);
        assert!(matches!(
            controller.control_tick(&obs, &state, &params, 0, distribution),
            Err(SimulationError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_tick_rejects_edited_distribution() {
        let env = PointEnv::new(2);
        let params = env.params(&[0.0, 0.0]);
        let controller = MppiController::new(env, 4, 3, 0.1).unwrap();
        let valid = controller
            .initial_distribution(&DVector::zeros(2), 0.1, 0.5, 0.5, 1.0)
            .unwrap();
        let (obs, state) = controller.env().reset(0, &params);

        let mut distribution = valid.clone();
        distribution.gamma_sigma = 3.0;
        assert!(matches!(
            controller.control_tick(&obs, &state, &params, 0, distribution),
            Err(SimulationError::InvalidConfig(_))
        ));

        let mut distribution = valid.clone();
        distribution.mean_actions[1][0] = f32::NAN;
        assert!(controller
            .control_tick(&obs, &state, &params, 0, distribution)
            .is_err());

        let mut distribution = valid;
        distribution.mean_actions.clear();
        distribution.action_covariance.clear();
        assert!(controller
            .control_tick(&obs, &state, &params, 0, distribution)
            .is_err());
    }

    #[test]
    fn test_tick_repairs_non_finite_covariance() {
        let env = PointEnv::new(2);
        let params = env.params(&[1.0, -1.0]);
        let controller = MppiController::new(env, 8, 4, 0.1).unwrap();
        let mut distribution = controller
            .initial_distribution(&DVector::zeros(2), 0.2, 0.5, 0.5, 1.0)
            .unwrap();
        distribution.action_covariance[2] = DMatrix::from_element(2, 2, f32::NAN);
        let (obs, state) = controller.env().reset(0, &params);
        let output = controller
            .control_tick(&obs, &state, &params, 3, distribution)
            .unwrap();
        assert!(output.action.iter().all(|a| a.is_finite()));
        assert!(output.distribution.validate().is_ok());
        for covariance in &output.distribution.action_covariance {
            assert!(covariance.iter().all(|c| c.is_finite()));
        }
        assert!(output.diagnostics.weights.iter().all(|w| w.is_finite()));
    }

    #[test]
    fn test_position_statistics() {
        let positions = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 3.0, 0.0]);
        let (mean, std) = position_statistics(&positions);
        assert_eq!(mean, DVector::from_vec(vec![2.0, 0.0]));
        assert_eq!(std, DVector::from_vec(vec![1.0, 0.0]));
    }

    #[test]
    fn test_policy_tracks_ticks_and_resets() {
        let env = PointEnv::new(2);
        let params = env.params(&[1.0, 0.0]);
        let controller = MppiController::new(env, 16, 4, 0.1).unwrap();
        let initial = controller
            .initial_distribution(&DVector::zeros(2), 0.3, 0.5, 0.5, 1.0)
            .unwrap();
        let mut policy = MppiPolicy::new(controller, initial.clone(), 3);
        let (obs, state) = policy.controller().env().reset(0, &params);
        let (first, _) = policy.act(&obs, &state, &params).unwrap();
        policy.act(&obs, &state, &params).unwrap();
        assert_eq!(policy.tick(), 2);
        assert_ne!(policy.distribution(), &initial);
        policy.reset(3);
        assert_eq!(policy.tick(), 0);
        assert_eq!(policy.distribution(), &initial);
        let (replayed, _) = policy.act(&obs, &state, &params).unwrap();
        assert_eq!(first, replayed);
    }

    #[test]
    fn test_tick_seeds_differ_per_tick() {
        assert_eq!(tick_seed(1, 0), tick_seed(1, 0));
        assert_ne!(tick_seed(1, 0), tick_seed(1, 1));
        assert_ne!(tick_seed(1, 0), tick_seed(2, 0));
    }
}
