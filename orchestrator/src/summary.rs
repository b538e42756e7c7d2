use std::{
    fmt::Display,
    fs::{self, File},
    io::BufWriter,
    path::Path,
    time::Duration,
};

use machine_learning::ActorCriticModel;
use serde::Serialize;
use worker::RewardSample;

use crate::{
    configs::{ModeConfig, TrainingConfig},
    coordinator::TrainingReport,
    error::Result,
};

pub const SUMMARY_FILE: &str = "summary.txt";
pub const REWARDS_FILE: &str = "rewards.json";

const LABEL_WIDTH: usize = 35;

/// The reward series of a run, laid out for plotting.
#[derive(Debug, Serialize)]
struct RewardReport {
    episodes: Vec<usize>,
    workers: Vec<usize>,
    rewards: Vec<f32>,
    moving_averages: Vec<f32>,
    steps: Vec<usize>,
}

/// Renders the human readable summary of a run.
///
/// # Arguments
/// * `config` - The configuration of the run.
/// * `model` - The trained model.
/// * `report` - The outcome of the run.
///
/// # Returns
/// The summary, one `label: value` pair per line followed by the network architecture.
pub fn render_summary(
    config: &TrainingConfig,
    model: &ActorCriticModel,
    report: &TrainingReport,
) -> String {
    let mut out = String::new();
    line(&mut out, "Environment", &config.env_name);

    match config.mode {
        ModeConfig::Asynchronous {
            num_workers,
            rollout_window,
        } => {
            line(&mut out, "Number of Workers", num_workers);
            line(&mut out, "Training Episodes", config.max_episodes);
            line(&mut out, "Rollout Window", rollout_window);
        }
        ModeConfig::Synchronous {
            num_envs,
            timesteps_per_episode,
            timesteps_per_rollout,
            epochs_per_rollout,
        } => {
            line(&mut out, "Number of Environments", num_envs);
            line(&mut out, "Training Episodes", config.max_episodes);
            line(&mut out, "Timesteps per Episode", timesteps_per_episode);
            line(&mut out, "Timesteps per Rollout", timesteps_per_rollout);
            line(&mut out, "Epochs per Rollout", epochs_per_rollout);
        }
    }

    line(&mut out, "Optimizer", config.optimizer.name());
    line(&mut out, "Learning Rate", config.optimizer.learning_rate());
    line(&mut out, "Entropy Coefficient", config.entropy_coef);
    match config.max_grad_norm {
        Some(max_grad_norm) => line(&mut out, "Norm Clip Value", max_grad_norm),
        None => line(&mut out, "Norm Clip Value", "none"),
    }
    line(&mut out, "Discount Factor", config.gamma);
    line(&mut out, "Clip Range", config.clip_range);
    line(&mut out, "Value Weight", config.value_weight);
    line(&mut out, "Return Convention", config.convention());
    line(&mut out, "Number of Checkpoints", config.num_checkpoints);
    line(&mut out, "Completed Episodes", report.rewards.len());
    line(&mut out, "Failed Workers", report.failures.len());
    match report.best_moving_average {
        Some(best) => line(&mut out, "Best Moving Average", best),
        None => line(&mut out, "Best Moving Average", "none"),
    }
    line(
        &mut out,
        "Time Taken",
        format!("{:.3} seconds", report.elapsed.as_secs_f64()),
    );
    line(&mut out, "Formatted Time", format_duration(report.elapsed));
    line(&mut out, "Random Seed", report.seed);

    out.push_str("\nNetwork Architecture:\n");
    out.push_str(&model.describe());
    out
}

/// Writes the summary of a run to `summary.txt` inside `dir`.
pub fn write_summary(
    dir: &Path,
    config: &TrainingConfig,
    model: &ActorCriticModel,
    report: &TrainingReport,
) -> Result<()> {
    fs::write(dir.join(SUMMARY_FILE), render_summary(config, model, report))?;
    Ok(())
}

/// Writes the raw rewards and their moving average to `rewards.json` inside `dir`.
pub fn write_rewards(dir: &Path, rewards: &[RewardSample]) -> Result<()> {
    let report = RewardReport {
        episodes: rewards.iter().map(|s| s.episode).collect(),
        workers: rewards.iter().map(|s| s.worker_id).collect(),
        rewards: rewards.iter().map(|s| s.reward).collect(),
        moving_averages: rewards.iter().map(|s| s.moving_average).collect(),
        steps: rewards.iter().map(|s| s.steps).collect(),
    };

    let writer = BufWriter::new(File::create(dir.join(REWARDS_FILE))?);
    serde_json::to_writer_pretty(writer, &report)?;
    Ok(())
}

/// Formats a duration as `H:MM:SS.micros`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        secs / 60 % 60,
        secs % 60,
        duration.subsec_micros()
    )
}

fn line(out: &mut String, label: &str, value: impl Display) {
    let label = format!("{label}:");
    out.push_str(&format!("{label:<LABEL_WIDTH$}{value}\n"));
}
