//! Closed-loop episodes: the policy plans on the current state, the environment applies
//! the first planned action, repeat until the episode ends.
use crate::environment::Environment;
use crate::lib_controller::MppiPolicy;
use crate::logger::TraceLogger;
use crate::SimulationError;

use std::time::Instant;

/// Aggregate tracking performance of one episode
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpisodeSummary {
    /// Control steps taken
    pub steps: usize,
    /// Undiscounted sum of rewards
    pub total_reward: f32,
    /// Mean position error of the tracked point
    pub mean_err_pos: f32,
    /// Largest position error of the tracked point
    pub max_err_pos: f32,
    /// Whether the environment ended the episode before `max_steps`
    pub terminated: bool,
}

/// Runs one episode
/// # Arguments
/// * `policy` - Policy to run, reset with `seed` before the first step
/// * `params` - Physical parameters
/// * `seed` - Seed of the environment reset and of the policy
/// * `max_steps` - Upper bound on the number of steps
/// * `dt` - Step duration in seconds, used for the trace time column
/// * `trace` - Optional CSV trace receiving one row per step
/// # Errors
/// * If a control tick fails or the trace cannot be written
pub fn run_episode<E: Environment>(
    policy: &mut MppiPolicy<E>,
    params: &E::Params,
    seed: u64,
    max_steps: usize,
    dt: f32,
    mut trace: Option<&mut TraceLogger>,
) -> Result<EpisodeSummary, SimulationError> {
    policy.reset(seed);
    let (mut observation, mut state) = policy.controller().env().reset(seed, params);
    let mut summary = EpisodeSummary::default();
    let start = Instant::now();
    for step in 0..max_steps {
        let (action, diagnostics) = policy.act(&observation, &state, params)?;
        let env = policy.controller().env();
        let transition = env.step(seed, &state, &action, params);
        if let Some(trace) = trace.as_mut() {
            trace.log_step(
                step as f32 * dt,
                &env.position(&state),
                &env.target(&state),
                &action,
                transition.reward,
            )?;
        }
        summary.steps += 1;
        summary.total_reward += transition.reward;
        summary.mean_err_pos += transition.info.err_pos;
        summary.max_err_pos = summary.max_err_pos.max(transition.info.err_pos);
        if step % 50 == 0 {
            log::info!(
                "step {step}: err_pos {:.3}, err_vel {:.3}, reward {:.3}, min cost {:.3}, effective samples {:.1}",
                transition.info.err_pos,
                transition.info.err_vel,
                transition.reward,
                diagnostics.min_cost,
                diagnostics.effective_sample_size
            );
        }
        observation = transition.observation;
        state = transition.state;
        if transition.done {
            summary.terminated = true;
            break;
        }
    }
    if summary.steps > 0 {
        summary.mean_err_pos /= summary.steps as f32;
        log::info!(
            "episode finished after {} steps, {:.2} ms per step",
            summary.steps,
            start.elapsed().as_secs_f64() * 1e3 / summary.steps as f64
        );
    }
    Ok(summary)
}
