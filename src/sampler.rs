//! Batch sampling of action sequences.
//!
//! Every (sample, horizon step) pair draws from its own ChaCha stream, selected by
//! `set_stream(sample * horizon + step)` on a generator seeded with the tick's sampling
//! seed. The batch therefore does not depend on how rayon splits the work.
use crate::distribution::ControlDistribution;

use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Actions are normalized to [-ACTION_BOUND, ACTION_BOUND] per component
pub const ACTION_BOUND: f32 = 1.0;

/// One candidate plan: H normalized actions
pub type ActionSequence = Vec<DVector<f32>>;

/// Returns the generator reserved for `(sample, step)`
/// # Example
/// ```
/// use rand::Rng;
/// use quad_mppi::sampler::substream;
/// let a: u64 = substream(42, 3, 1, 8).gen();
/// let b: u64 = substream(42, 3, 1, 8).gen();
/// let c: u64 = substream(42, 3, 2, 8).gen();
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
pub fn substream(seed: u64, sample: usize, step: usize, horizon: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream((sample * horizon + step) as u64);
    rng
}

/// Square-root factor `L` with `L * L^T = covariance`, built from the eigen
/// decomposition so that singular and zero covariances are handled exactly.
pub fn sampling_factor(covariance: &DMatrix<f32>) -> DMatrix<f32> {
    if is_diagonal(covariance) {
        return DMatrix::from_diagonal(&covariance.diagonal().map(|v| v.max(0.0).sqrt()));
    }
    let eigen = covariance.clone().symmetric_eigen();
    let scales = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
    eigen.eigenvectors * DMatrix::from_diagonal(&scales)
}

/// True when every off-diagonal entry is exactly zero
pub(crate) fn is_diagonal(matrix: &DMatrix<f32>) -> bool {
    matrix
        .row_iter()
        .enumerate()
        .all(|(i, row)| row.iter().enumerate().all(|(j, &v)| i == j || v == 0.0))
}

/// Draws `num_samples` action sequences from `distribution` and saturates every
/// component to the action bounds.
/// # Arguments
/// * `distribution` - Per-step means and covariances, assumed symmetric PSD
/// * `num_samples` - Number of sequences N
/// * `seed` - Sampling seed of the tick
/// # Returns
/// * N sequences of H actions, in sample order
/// # Example
/// ```
/// use nalgebra::{DMatrix, DVector};
/// use quad_mppi::{sampler::sample_batch, ControlDistribution};
/// let mean = DVector::from_vec(vec![0.9, -0.9]);
/// let covariance = DMatrix::from_diagonal_element(2, 2, 0.5);
/// let distribution = ControlDistribution::constant(4, &mean, &covariance, 0.5, 0.5, 1.0).unwrap();
/// let batch = sample_batch(&distribution, 32, 1);
/// assert_eq!(batch.len(), 32);
/// assert!(batch.iter().flatten().flat_map(|a| a.iter()).all(|x| x.abs() <= 1.0));
/// ```
pub fn sample_batch(
    distribution: &ControlDistribution,
    num_samples: usize,
    seed: u64,
) -> Vec<ActionSequence> {
    let horizon = distribution.horizon();
    let action_dim = distribution.action_dim();
    let factors: Vec<DMatrix<f32>> = distribution
        .action_covariance
        .iter()
        .map(sampling_factor)
        .collect();
    (0..num_samples)
        .into_par_iter()
        .map(|sample| {
            (0..horizon)
                .map(|step| {
                    let mut rng = substream(seed, sample, step, horizon);
                    let noise = DVector::<f32>::from_fn(action_dim, |_, _| {
                        rng.sample::<f32, _>(StandardNormal)
                    });
                    let action = distribution.mean_at(step) + &factors[step] * noise;
                    action.map(|a| a.clamp(-ACTION_BOUND, ACTION_BOUND))
                })
                .collect()
        })
        .collect()
}
