//! Time-indexed Gaussian distribution over action sequences.
//!
//! The distribution keeps one mean vector and one covariance matrix per horizon step.
//! It is the only state the controller carries from one tick to the next.
use crate::sampler::{is_diagonal, ActionSequence};
use crate::SimulationError;

use nalgebra::{DMatrix, DVector};

/// Per-step Gaussian over the planned action sequence
/// # Example
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use quad_mppi::ControlDistribution;
/// let mean = DVector::from_vec(vec![0.5, 0.0]);
/// let covariance = DMatrix::from_diagonal_element(2, 2, 0.01);
/// let mut distribution = ControlDistribution::constant(8, &mean, &covariance, 0.5, 0.1, 1.0).unwrap();
/// distribution.shift();
/// assert_eq!(distribution.mean_at(0), &mean);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ControlDistribution {
    /// Mean action of every horizon step
    pub mean_actions: Vec<DVector<f32>>,
    /// Action covariance of every horizon step, symmetric positive semi-definite
    pub action_covariance: Vec<DMatrix<f32>>,
    /// Blend factor of the batch mean into the mean
    pub gamma_mean: f32,
    /// Blend factor of the batch covariance into the covariance
    pub gamma_sigma: f32,
    /// Per-step reward discount
    pub discount: f32,
}

/// Importance-weighted statistics of one sampled batch
#[derive(Clone, Debug, PartialEq)]
pub struct BatchStatistics {
    /// Weighted mean action of every horizon step
    pub mean_actions: Vec<DVector<f32>>,
    /// Weighted covariance around `mean_actions` of every horizon step
    pub action_covariance: Vec<DMatrix<f32>>,
}

fn check_unit_interval(name: &str, value: f32) -> Result<(), SimulationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimulationError::InvalidConfig(format!(
            "{name} must lie in [0, 1], got {value}"
        )))
    }
}

/// Eigenvalues above `-EIGEN_TOLERANCE * max |eigenvalue|` count as round-off, not as a repair
const EIGEN_TOLERANCE: f32 = 1e-5;

impl ControlDistribution {
    /// Creates a distribution from explicit per-step means and covariances
    /// # Errors
    /// * If the horizon is empty, the sequences differ in length, a covariance is not
    ///   square of the action dimension, a value is not finite, or a blend factor or the
    ///   discount lies outside [0, 1]
    pub fn new(
        mean_actions: Vec<DVector<f32>>,
        action_covariance: Vec<DMatrix<f32>>,
        gamma_mean: f32,
        gamma_sigma: f32,
        discount: f32,
    ) -> Result<Self, SimulationError> {
        let mut distribution = Self {
            mean_actions,
            action_covariance,
            gamma_mean,
            gamma_sigma,
            discount,
        };
        distribution.validate()?;
        if let Some(step) = distribution
            .action_covariance
            .iter()
            .position(|covariance| !covariance.iter().all(|x| x.is_finite()))
        {
            return Err(SimulationError::InvalidConfig(format!(
                "step {step} covariance contains non-finite values"
            )));
        }
        distribution.sanitize();
        Ok(distribution)
    }

    /// Checks the structure of a distribution whose fields may have been edited directly:
    /// blend factors and discount in [0, 1], a non-empty horizon, matching shapes and
    /// finite means. Non-finite covariances are left to [`ControlDistribution::sanitize`].
    /// # Errors
    /// * `InvalidConfig` for out-of-range factors, an empty horizon or non-finite means
    /// * `DimensionMismatch` for inconsistent lengths or shapes
    pub fn validate(&self) -> Result<(), SimulationError> {
        check_unit_interval("gamma_mean", self.gamma_mean)?;
        check_unit_interval("gamma_sigma", self.gamma_sigma)?;
        check_unit_interval("discount", self.discount)?;
        let Some(first) = self.mean_actions.first() else {
            return Err(SimulationError::InvalidConfig(
                "horizon must be at least one step".to_string(),
            ));
        };
        if self.mean_actions.len() != self.action_covariance.len() {
            return Err(SimulationError::DimensionMismatch(format!(
                "{} mean steps but {} covariance steps",
                self.mean_actions.len(),
                self.action_covariance.len()
            )));
        }
        let action_dim = first.len();
        if action_dim == 0 {
            return Err(SimulationError::InvalidConfig(
                "action dimension must be at least one".to_string(),
            ));
        }
        let steps = self.mean_actions.iter().zip(&self.action_covariance);
        for (step, (mean, covariance)) in steps.enumerate() {
            if mean.len() != action_dim || covariance.shape() != (action_dim, action_dim) {
                return Err(SimulationError::DimensionMismatch(format!(
                    "step {step}: expected mean of {action_dim} and {action_dim}x{action_dim} covariance, got {} and {:?}",
                    mean.len(),
                    covariance.shape()
                )));
            }
            if !mean.iter().all(|x| x.is_finite()) {
                return Err(SimulationError::InvalidConfig(format!(
                    "step {step} mean contains non-finite values"
                )));
            }
        }
        Ok(())
    }

    /// Creates a distribution with the same mean and covariance at every step
    pub fn constant(
        horizon: usize,
        mean: &DVector<f32>,
        covariance: &DMatrix<f32>,
        gamma_mean: f32,
        gamma_sigma: f32,
        discount: f32,
    ) -> Result<Self, SimulationError> {
        Self::new(
            vec![mean.clone(); horizon],
            vec![covariance.clone(); horizon],
            gamma_mean,
            gamma_sigma,
            discount,
        )
    }

    pub fn horizon(&self) -> usize {
        self.mean_actions.len()
    }

    pub fn action_dim(&self) -> usize {
        self.mean_actions[0].len()
    }

    /// Mean action of horizon step `step`
    pub fn mean_at(&self, step: usize) -> &DVector<f32> {
        &self.mean_actions[step]
    }

    /// Advances the plan by one step: drops step 0 and repeats the last step at the end
    pub fn shift(&mut self) {
        let horizon = self.horizon();
        if horizon < 2 {
            return;
        }
        self.mean_actions.rotate_left(1);
        self.mean_actions[horizon - 1] = self.mean_actions[horizon - 2].clone();
        self.action_covariance.rotate_left(1);
        self.action_covariance[horizon - 1] = self.action_covariance[horizon - 2].clone();
    }

    /// Blends batch statistics into the distribution:
    /// `new = gamma * batch + (1 - gamma) * old` for the mean and the covariance.
    /// A step whose blended value is not finite keeps its previous value.
    pub fn blend(&mut self, batch: &BatchStatistics) {
        let (gamma_mean, gamma_sigma) = (self.gamma_mean, self.gamma_sigma);
        let steps = self
            .mean_actions
            .iter_mut()
            .zip(self.action_covariance.iter_mut())
            .zip(batch.mean_actions.iter().zip(&batch.action_covariance));
        for (step, ((mean, covariance), (batch_mean, batch_covariance))) in steps.enumerate() {
            let blended_mean = batch_mean * gamma_mean + &*mean * (1.0 - gamma_mean);
            if blended_mean.iter().all(|x| x.is_finite()) {
                *mean = blended_mean;
            } else {
                log::warn!("rejected non-finite mean update at horizon step {step}");
            }
            let blended_covariance =
                batch_covariance * gamma_sigma + &*covariance * (1.0 - gamma_sigma);
            if blended_covariance.iter().all(|x| x.is_finite()) {
                *covariance = blended_covariance;
            } else {
                log::warn!("rejected non-finite covariance update at horizon step {step}");
            }
        }
    }

    /// Restores symmetry and positive semi-definiteness of every covariance.
    /// Negative eigenvalues are clamped to zero and a non-finite covariance is reset to zero.
    /// Returns the number of repaired steps; clamping round-off does not count.
    pub fn sanitize(&mut self) -> usize {
        let mut repaired = 0;
        for (step, covariance) in self.action_covariance.iter_mut().enumerate() {
            if !covariance.iter().all(|x| x.is_finite()) {
                covariance.fill(0.0);
                log::warn!("reset non-finite covariance at horizon step {step}");
                repaired += 1;
                continue;
            }
            let symmetric = (&*covariance + covariance.transpose()) * 0.5;
            if is_diagonal(&symmetric) && symmetric.diagonal().iter().all(|&v| v >= 0.0) {
                *covariance = symmetric;
                continue;
            }
            let eigen = symmetric.clone().symmetric_eigen();
            if eigen.eigenvalues.iter().any(|&l| l < 0.0) {
                let scale = eigen.eigenvalues.amax();
                let clamped = eigen.eigenvalues.map(|l| l.max(0.0));
                *covariance = &eigen.eigenvectors
                    * DMatrix::from_diagonal(&clamped)
                    * eigen.eigenvectors.transpose();
                if eigen.eigenvalues.iter().any(|&l| l < -EIGEN_TOLERANCE * scale) {
                    log::warn!("clamped negative covariance eigenvalues at horizon step {step}");
                    repaired += 1;
                }
            } else {
                *covariance = symmetric;
            }
        }
        repaired
    }
}

impl BatchStatistics {
    /// Weighted mean and covariance of a batch of action sequences
    /// # Arguments
    /// * `samples` - N sequences of H actions
    /// * `weights` - N importance weights summing to one
    /// # Example
    /// ```
    /// use nalgebra::DVector;
    /// use quad_mppi::BatchStatistics;
    /// let samples = vec![
    ///     vec![DVector::from_vec(vec![1.0])],
    ///     vec![DVector::from_vec(vec![-1.0])],
    /// ];
    /// let stats = BatchStatistics::weighted(&samples, &[0.5, 0.5]);
    /// assert_eq!(stats.mean_actions[0][0], 0.0);
    /// assert_eq!(stats.action_covariance[0][(0, 0)], 1.0);
    /// ```
    pub fn weighted(samples: &[ActionSequence], weights: &[f32]) -> Self {
        let horizon = samples.first().map_or(0, |sequence| sequence.len());
        let action_dim = samples
            .first()
            .and_then(|sequence| sequence.first())
            .map_or(0, |action| action.len());
        let mean_actions: Vec<DVector<f32>> = (0..horizon)
            .map(|h| {
                samples
                    .iter()
                    .zip(weights)
                    .fold(DVector::zeros(action_dim), |acc, (sequence, &w)| {
                        acc + &sequence[h] * w
                    })
            })
            .collect();
        let action_covariance = mean_actions
            .iter()
            .enumerate()
            .map(|(h, mean)| {
                samples.iter().zip(weights).fold(
                    DMatrix::zeros(action_dim, action_dim),
                    |acc, (sequence, &w)| {
                        let deviation = &sequence[h] - mean;
                        acc + &deviation * deviation.transpose() * w
                    },
                )
            })
            .collect();
        Self {
            mean_actions,
            action_covariance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_distribution(horizon: usize) -> ControlDistribution {
        let means = (0..horizon)
            .map(|h| DVector::from_vec(vec![h as f32 * 0.1, -(h as f32) * 0.05]))
            .collect();
        let covariances = (0..horizon)
            .map(|h| DMatrix::from_diagonal_element(2, 2, 0.01 * (h + 1) as f32))
            .collect();
        ControlDistribution::new(means, covariances, 0.7, 0.3, 0.99).unwrap()
    }

    #[test]
    fn test_shift_drops_first_and_repeats_last() {
        let mut distribution = ramp_distribution(4);
        let before = distribution.clone();
        distribution.shift();
        assert_eq!(distribution.mean_actions[0], before.mean_actions[1]);
        assert_eq!(distribution.mean_actions[2], before.mean_actions[3]);
        assert_eq!(distribution.mean_actions[3], before.mean_actions[3]);
        assert_eq!(distribution.action_covariance[3], before.action_covariance[3]);
        assert_eq!(distribution.action_covariance[0], before.action_covariance[1]);
    }

    #[test]
    fn test_shift_single_step_is_identity() {
        let mut distribution = ramp_distribution(1);
        let before = distribution.clone();
        distribution.shift();
        assert_eq!(distribution, before);
    }

    #[test]
    fn test_shift_then_noop_blend_is_unchanged() {
        let mut distribution = ramp_distribution(5);
        distribution.shift();
        let shifted = distribution.clone();
        distribution.blend(&BatchStatistics {
            mean_actions: shifted.mean_actions.clone(),
            action_covariance: shifted.action_covariance.clone(),
        });
        for h in 0..shifted.horizon() {
            assert_relative_eq!(
                distribution.mean_actions[h],
                shifted.mean_actions[h],
                epsilon = 1e-6
            );
            assert_relative_eq!(
                distribution.action_covariance[h],
                shifted.action_covariance[h],
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_blend_is_exponential_smoothing() {
        let mean = DVector::from_vec(vec![0.0, 0.0]);
        let covariance = DMatrix::from_diagonal_element(2, 2, 1.0);
        let mut distribution =
            ControlDistribution::constant(2, &mean, &covariance, 0.5, 0.25, 1.0).unwrap();
        let batch = BatchStatistics {
            mean_actions: vec![DVector::from_vec(vec![1.0, -1.0]); 2],
            action_covariance: vec![DMatrix::zeros(2, 2); 2],
        };
        distribution.blend(&batch);
        assert_eq!(distribution.mean_actions[0], DVector::from_vec(vec![0.5, -0.5]));
        assert_eq!(
            distribution.action_covariance[1],
            DMatrix::from_diagonal_element(2, 2, 0.75)
        );
    }

    #[test]
    fn test_blend_rejects_non_finite() {
        let mut distribution = ramp_distribution(2);
        let before = distribution.clone();
        let batch = BatchStatistics {
            mean_actions: vec![DVector::from_vec(vec![f32::NAN, 0.0]); 2],
            action_covariance: vec![DMatrix::from_element(2, 2, f32::INFINITY); 2],
        };
        distribution.blend(&batch);
        assert_eq!(distribution, before);
    }

    #[test]
    fn test_sanitize_symmetrizes_and_clamps() {
        let mut distribution = ramp_distribution(2);
        distribution.action_covariance[0] = DMatrix::from_row_slice(2, 2, &[1.0, 0.2, 0.0, 1.0]);
        distribution.action_covariance[1] = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let repaired = distribution.sanitize();
        assert_eq!(repaired, 1);
        let first = &distribution.action_covariance[0];
        assert_eq!(first[(0, 1)], first[(1, 0)]);
        assert_relative_eq!(first[(0, 1)], 0.1);
        let eigen = distribution.action_covariance[1].clone().symmetric_eigen();
        assert!(eigen.eigenvalues.iter().all(|&l| l > -1e-5));
        // Eigenvalues of [[1, 2], [2, 1]] are 3 and -1; clamping keeps the positive mode.
        assert_relative_eq!(
            distribution.action_covariance[1],
            DMatrix::from_element(2, 2, 1.5),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_sanitize_ignores_round_off_on_low_rank() {
        let mut distribution = ramp_distribution(1);
        // Rank one: eigenvalues 5 and 0, the zero may come out as a tiny negative.
        let low_rank = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        distribution.action_covariance[0] = low_rank.clone();
        assert_eq!(distribution.sanitize(), 0);
        assert_relative_eq!(distribution.action_covariance[0], low_rank, epsilon = 1e-5);
    }

    #[test]
    fn test_sanitize_resets_non_finite_covariance() {
        let mut distribution = ramp_distribution(3);
        distribution.action_covariance[1][(0, 1)] = f32::NAN;
        distribution.action_covariance[2][(1, 1)] = f32::INFINITY;
        assert_eq!(distribution.sanitize(), 2);
        assert_eq!(distribution.action_covariance[1], DMatrix::zeros(2, 2));
        assert_eq!(distribution.action_covariance[2], DMatrix::zeros(2, 2));
        assert_relative_eq!(
            distribution.action_covariance[0],
            DMatrix::from_diagonal_element(2, 2, 0.01)
        );
    }

    #[test]
    fn test_validate_catches_edited_fields() {
        let mut distribution = ramp_distribution(3);
        assert!(distribution.validate().is_ok());
        distribution.gamma_sigma = 3.0;
        assert!(matches!(
            distribution.validate(),
            Err(SimulationError::InvalidConfig(_))
        ));

        let mut distribution = ramp_distribution(3);
        distribution.mean_actions[2][0] = f32::NAN;
        assert!(matches!(
            distribution.validate(),
            Err(SimulationError::InvalidConfig(_))
        ));

        let mut distribution = ramp_distribution(3);
        distribution.action_covariance.pop();
        assert!(matches!(
            distribution.validate(),
            Err(SimulationError::DimensionMismatch(_))
        ));

        let mut distribution = ramp_distribution(3);
        distribution.mean_actions.clear();
        distribution.action_covariance.clear();
        assert!(distribution.validate().is_err());

        // A non-finite covariance is repairable, so it passes validation.
        let mut distribution = ramp_distribution(3);
        distribution.action_covariance[0][(0, 0)] = f32::NAN;
        assert!(distribution.validate().is_ok());
    }

    #[test]
    fn test_new_rejects_bad_inputs() {
        let mean = DVector::from_vec(vec![0.0, 0.0]);
        let covariance = DMatrix::identity(2, 2);
        assert!(ControlDistribution::constant(0, &mean, &covariance, 0.5, 0.5, 1.0).is_err());
        assert!(ControlDistribution::constant(3, &mean, &covariance, 1.5, 0.5, 1.0).is_err());
        assert!(ControlDistribution::constant(3, &mean, &covariance, 0.5, 0.5, -0.1).is_err());
        assert!(matches!(
            ControlDistribution::constant(3, &mean, &DMatrix::identity(3, 3), 0.5, 0.5, 1.0),
            Err(SimulationError::DimensionMismatch(_))
        ));
        let nan = DMatrix::from_element(2, 2, f32::NAN);
        assert!(ControlDistribution::constant(3, &mean, &nan, 0.5, 0.5, 1.0).is_err());
    }

    #[test]
    fn test_weighted_statistics_prefer_heavy_sample() {
        let samples = vec![
            vec![DVector::from_vec(vec![1.0, 0.0])],
            vec![DVector::from_vec(vec![0.0, 1.0])],
        ];
        let stats = BatchStatistics::weighted(&samples, &[1.0, 0.0]);
        assert_eq!(stats.mean_actions[0], DVector::from_vec(vec![1.0, 0.0]));
        assert_eq!(stats.action_covariance[0], DMatrix::zeros(2, 2));
    }
}
