mod cartpole;

use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::info;
use orchestrator::{ModeConfig, TrainingConfig};
use worker::{EnvFactory, Environment};

use crate::cartpole::CartPole;

#[derive(Parser)]
#[command(name = "acorch", about = "Actor-critic training with shared parameters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trains a policy, then evaluates its checkpoints.
    Train {
        #[command(flatten)]
        overrides: Overrides,

        /// Skip the evaluation of the checkpoints once training ends
        #[arg(long, default_value = "false")]
        no_test: bool,
    },
    /// Evaluates the checkpoints of a previous run.
    Evaluate {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Values taking precedence over the configuration file.
#[derive(Args)]
struct Overrides {
    /// Json file holding a training configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Environment id (e.g. CartPole-v1)
    #[arg(long)]
    env_name: Option<String>,

    /// Train with a single learner instead of asynchronous workers
    #[arg(long, default_value = "false")]
    sync: bool,

    /// Number of asynchronous workers
    #[arg(long)]
    num_workers: Option<usize>,

    /// Steps between two updates of a worker
    #[arg(long)]
    rollout_window: Option<usize>,

    /// Number of environments of the synchronous learner
    #[arg(long)]
    num_envs: Option<usize>,

    #[arg(long)]
    timesteps_per_episode: Option<usize>,

    #[arg(long)]
    timesteps_per_rollout: Option<usize>,

    #[arg(long)]
    epochs_per_rollout: Option<usize>,

    /// Episode budget of the run
    #[arg(long)]
    max_episodes: Option<usize>,

    #[arg(long)]
    max_episode_steps: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f32>,

    #[arg(long)]
    entropy_coef: Option<f32>,

    #[arg(long)]
    clip_range: Option<f32>,

    #[arg(long)]
    value_weight: Option<f32>,

    /// Discount factor
    #[arg(long)]
    gamma: Option<f32>,

    /// Global norm gradients are clipped to
    #[arg(long)]
    max_grad_norm: Option<f32>,

    #[arg(long)]
    num_checkpoints: Option<usize>,

    #[arg(long)]
    hidden_units: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Directory checkpoints and reports are written to, training runs get a fresh
    /// `experiment/{env_name}_{timestamp}` directory when unset
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Greedy episodes played per checkpoint
    #[arg(long)]
    test_episodes: Option<usize>,
}

impl Overrides {
    /// Loads the configuration file, if any, and applies every override on top.
    fn resolve(self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::from_json_file(path)
                .with_context(|| format!("reading {}", path.display()))?,
            None => TrainingConfig::default(),
        };

        if self.sync && matches!(config.mode, ModeConfig::Asynchronous { .. }) {
            config.mode = ModeConfig::Synchronous {
                num_envs: 1,
                timesteps_per_episode: 400,
                timesteps_per_rollout: 50,
                epochs_per_rollout: 5,
            };
        }

        match &mut config.mode {
            ModeConfig::Asynchronous {
                num_workers,
                rollout_window,
            } => {
                set(num_workers, self.num_workers);
                set(rollout_window, self.rollout_window);
            }
            ModeConfig::Synchronous {
                num_envs,
                timesteps_per_episode,
                timesteps_per_rollout,
                epochs_per_rollout,
            } => {
                set(num_envs, self.num_envs);
                set(timesteps_per_episode, self.timesteps_per_episode);
                set(timesteps_per_rollout, self.timesteps_per_rollout);
                set(epochs_per_rollout, self.epochs_per_rollout);
            }
        }

        if let Some(learning_rate) = self.learning_rate {
            config.optimizer = config.optimizer.with_learning_rate(learning_rate);
        }

        if self.max_episode_steps.is_some() {
            config.max_episode_steps = self.max_episode_steps;
        }

        if self.max_grad_norm.is_some() {
            config.max_grad_norm = self.max_grad_norm;
        }

        if self.seed.is_some() {
            config.seed = self.seed;
        }

        set(&mut config.env_name, self.env_name);
        set(&mut config.max_episodes, self.max_episodes);
        set(&mut config.entropy_coef, self.entropy_coef);
        set(&mut config.clip_range, self.clip_range);
        set(&mut config.value_weight, self.value_weight);
        set(&mut config.gamma, self.gamma);
        set(&mut config.num_checkpoints, self.num_checkpoints);
        set(&mut config.hidden_units, self.hidden_units);
        set(&mut config.output_dir, self.output_dir);
        set(&mut config.test_episodes, self.test_episodes);

        Ok(config)
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

/// Builds the environment factory of a registered environment.
fn env_factory(env_name: &str) -> Result<EnvFactory> {
    if CartPole::from_name(env_name, 0).is_none() {
        bail!("unknown environment {env_name}");
    }

    let env_name = env_name.to_string();
    Ok(Arc::new(move |_worker_id: usize, seed: u64| {
        let env = CartPole::from_name(&env_name, seed).unwrap_or_else(|| CartPole::new(seed, 500));
        Box::new(env) as Box<dyn Environment>
    }))
}

fn print_evaluation(results: &[orchestrator::EvaluationResult]) {
    for result in results {
        println!(
            "checkpoint {:<6} mean {:>8.2}  std {:>8.2}",
            result.slot.to_string(),
            result.mean,
            result.std
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Train { overrides, no_test } => {
            let started_at = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default();
            let config = overrides.resolve()?.with_run_dir(started_at);
            info!("writing the run to {}", config.output_dir.display());
            let env_factory = env_factory(&config.env_name)?;

            fs::create_dir_all(&config.output_dir)?;
            fs::write(
                config.output_dir.join("config.json"),
                serde_json::to_string_pretty(&config)?,
            )?;

            let report = orchestrator::train(config.clone(), Arc::clone(&env_factory)).await?;
            println!(
                "trained {} episode(s) in {:.2}s, best moving average {}",
                report.rewards.len(),
                report.elapsed.as_secs_f64(),
                report
                    .best_moving_average
                    .map_or_else(|| "n/a".to_string(), |best| format!("{best:.2}"))
            );

            if !no_test {
                info!("running tests with the checkpoint policies");
                let results = tokio::task::spawn_blocking(move || {
                    orchestrator::evaluate(&config, &env_factory)
                })
                .await??;
                print_evaluation(&results);
            }
        }
        Command::Evaluate { overrides } => {
            let config = overrides.resolve()?;
            let env_factory = env_factory(&config.env_name)?;
            let results = orchestrator::evaluate(&config, &env_factory)?;
            print_evaluation(&results);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence_over_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_episodes": 30, "gamma": 0.9, "seed": 1 }"#).unwrap();

        let cli = Cli::parse_from([
            "acorch",
            "train",
            "--config",
            path.to_str().unwrap(),
            "--gamma",
            "0.95",
            "--num-workers",
            "4",
            "--learning-rate",
            "0.01",
        ]);

        let Command::Train { overrides, .. } = cli.command else {
            panic!("expected the train command");
        };
        let config = overrides.resolve().unwrap();

        assert_eq!(config.max_episodes, 30);
        assert_eq!(config.gamma, 0.95);
        assert_eq!(config.seed, Some(1));
        assert_eq!(config.optimizer.learning_rate(), 0.01);
        assert!(matches!(
            config.mode,
            ModeConfig::Asynchronous { num_workers: 4, rollout_window: 50 }
        ));
    }

    #[test]
    fn sync_flag_switches_the_mode() {
        let cli = Cli::parse_from(["acorch", "evaluate", "--sync", "--num-envs", "3"]);

        let Command::Evaluate { overrides } = cli.command else {
            panic!("expected the evaluate command");
        };

        assert!(matches!(
            overrides.resolve().unwrap().mode,
            ModeConfig::Synchronous { num_envs: 3, timesteps_per_episode: 400, .. }
        ));
    }

    #[test]
    fn only_registered_environments_are_built() {
        let factory = env_factory("CartPole-v1").unwrap();
        assert_eq!(factory(0, 1).state_dim(), CartPole::STATE_DIM);
        assert!(env_factory("Pong-v5").is_err());
    }
}
