//! Cost and importance re-weighting.
use nalgebra::DMatrix;

/// Discounted return of every sample: `sum_h rewards[(i, h)] * discount^h`
/// # Arguments
/// * `rewards` - N x H reward matrix
/// * `discount` - Per-step discount
/// # Example
/// ```
/// use nalgebra::DMatrix;
/// use quad_mppi::weighting::discounted_returns;
/// let rewards = DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 1.0]);
/// assert_eq!(discounted_returns(&rewards, 0.5), vec![1.75]);
/// ```
pub fn discounted_returns(rewards: &DMatrix<f32>, discount: f32) -> Vec<f32> {
    let discounts: Vec<f32> = (0..rewards.ncols())
        .map(|h| discount.powi(h as i32))
        .collect();
    rewards
        .row_iter()
        .map(|row| row.iter().zip(&discounts).map(|(r, d)| r * d).sum())
        .collect()
}

/// Softmax weights of `-cost / lambda`, computed relative to the smallest cost.
///
/// Non-finite costs are treated as `+inf` and receive zero weight. If no cost is
/// finite the weights fall back to uniform.
/// # Example
/// ```
/// use quad_mppi::weighting::importance_weights;
/// let weights = importance_weights(&[1.0, 1.0, 1.0, 1.0], 0.1);
/// assert_eq!(weights, vec![0.25; 4]);
/// ```
pub fn importance_weights(costs: &[f32], lambda: f32) -> Vec<f32> {
    let costs: Vec<f32> = costs
        .iter()
        .map(|&c| if c.is_finite() { c } else { f32::INFINITY })
        .collect();
    let min_cost = costs.iter().copied().fold(f32::INFINITY, f32::min);
    if !min_cost.is_finite() {
        log::warn!("no finite cost among {} samples, using uniform weights", costs.len());
        return vec![1.0 / costs.len() as f32; costs.len()];
    }
    let exponentials: Vec<f32> = costs
        .iter()
        .map(|&c| (-(c - min_cost) / lambda).exp())
        .collect();
    // At least the minimum-cost sample contributes exp(0) = 1.
    let total: f32 = exponentials.iter().sum();
    exponentials.iter().map(|e| e / total).collect()
}

/// Kish effective sample size `1 / sum(w^2)` of normalized weights
pub fn effective_sample_size(weights: &[f32]) -> f32 {
    1.0 / weights.iter().map(|w| w * w).sum::<f32>()
}
