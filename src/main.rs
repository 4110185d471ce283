use quad_mppi::config::{Config, QuadrotorConfigurations};
use quad_mppi::logger::TraceLogger;
use quad_mppi::quad_sim::{run_episode, EpisodeSummary};
use quad_mppi::*;
use std::time::Instant;

/// Builds the policy for `env` and runs one episode
fn run<E: Environment>(
    config: &Config,
    env: E,
    params: &E::Params,
) -> Result<EpisodeSummary, SimulationError> {
    let position_dim = env.position_dim();
    let action_dim = env.action_dim();
    let nominal = env.nominal_action(params);
    let controller = config.mppi.controller(env)?;
    let initial = config.mppi.initial_distribution(&controller, nominal)?;
    let mut policy = MppiPolicy::new(controller, initial, config.simulation.seed);
    let mut trace = match &config.simulation.trace_path {
        Some(path) => {
            log::info!("Writing trace to {path}");
            Some(TraceLogger::new(path, position_dim, action_dim)?)
        }
        None => None,
    };
    let summary = run_episode(
        &mut policy,
        params,
        config.simulation.seed,
        config.simulation.max_steps_in_episode + 1,
        config.simulation.dt,
        trace.as_mut(),
    )?;
    if let Some(trace) = trace.as_mut() {
        trace.flush()?;
    }
    Ok(summary)
}

/// Main function for the closed-loop simulation
fn main() -> Result<(), SimulationError> {
    let mut config_str = "config/quad2d.yaml";
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        println!(
            "[\x1b[33mWARN\x1b[0m quad_mppi] Usage: {} <config.yaml>.",
            args[0]
        );
        println!("[\x1b[33mWARN\x1b[0m quad_mppi] Loading default configuration: config/quad2d.yaml");
    } else {
        config_str = &args[1];
    }
    let config = Config::from_yaml(config_str)?;
    env_logger::builder()
        .parse_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();
    log::info!("Loaded configuration: {config_str}");
    log::info!(
        "MPPI with {} samples over {} steps, lambda {}",
        config.mppi.num_samples,
        config.mppi.horizon,
        config.mppi.lambda
    );
    let start = Instant::now();
    let summary = match &config.quadrotor {
        QuadrotorConfigurations::Quad2D(quad_config) => {
            let (env, params) = config.quad2d(quad_config)?;
            if params.payload.is_some() {
                log::info!("Tracking the suspended payload");
            }
            run(&config, env, &params)?
        }
        QuadrotorConfigurations::Quad3D(quad_config) => {
            let (env, params) = config.quad3d(quad_config)?;
            if params.payload.is_some() {
                log::info!("Tracking the suspended payload");
            }
            run(&config, env, &params)?
        }
    };
    log::info!(
        "Completed {} steps in {:.2} s: total reward {:.3}, mean position error {:.3} m, max position error {:.3} m",
        summary.steps,
        start.elapsed().as_secs_f32(),
        summary.total_reward,
        summary.mean_err_pos,
        summary.max_err_pos
    );
    log::logger().flush();
    Ok(())
}
