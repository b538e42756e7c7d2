use std::{fmt::Write as _, fs, iter, path::Path};

use log::info;
use machine_learning::{ActorCriticModel, CheckpointSlot, MlErr, checkpoint};
use ndarray::aview1;
use worker::{Environment, Transition};

use crate::error::Result;

pub const TEST_DIR: &str = "test";

/// The greedy performance of one checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub slot: CheckpointSlot,
    pub rewards: Vec<f32>,
    pub mean: f32,
    pub std: f32,
}

/// Evaluates the checkpoints of a run.
///
/// The rotation slots are visited in order followed by the best checkpoint, stopping at the
/// first slot without a checkpoint. Every checkpoint found plays `test_episodes` greedy episodes
/// and its rewards are written to `test/test_checkpoint_{slot}.txt`.
///
/// # Arguments
/// * `dir` - The output directory of the run.
/// * `model` - The model the checkpoints were trained for.
/// * `num_checkpoints` - The amount of rotation slots of the run.
/// * `test_episodes` - The amount of episodes played per checkpoint.
/// * `max_steps` - Truncates the episodes reaching this amount of steps.
/// * `env` - The environment to play in.
///
/// # Returns
/// The results of every checkpoint found.
pub fn evaluate_checkpoints(
    dir: &Path,
    model: &ActorCriticModel,
    num_checkpoints: usize,
    test_episodes: usize,
    max_steps: Option<usize>,
    env: &mut dyn Environment,
) -> Result<Vec<EvaluationResult>> {
    let test_dir = dir.join(TEST_DIR);
    fs::create_dir_all(&test_dir)?;

    let slots = (0..num_checkpoints)
        .map(CheckpointSlot::Index)
        .chain(iter::once(CheckpointSlot::Best));

    let mut results = Vec::new();

    for slot in slots {
        let params = match checkpoint::load(&slot.path(dir), model.layout()) {
            Ok((params, _)) => params,
            Err(MlErr::CheckpointMissing(path)) => {
                info!("no checkpoint at {}, stopping the evaluation", path.display());
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let mut rewards = Vec::with_capacity(test_episodes);
        for _ in 0..test_episodes {
            rewards.push(play_greedy(model, params.values(), max_steps, env)?);
        }

        let (mean, std) = mean_std(&rewards);
        info!(slot = slot.to_string().as_str(), mean = mean, std = std; "evaluated checkpoint");

        fs::write(
            test_dir.join(format!("test_checkpoint_{slot}.txt")),
            render_rewards(&rewards, mean, std),
        )?;

        results.push(EvaluationResult {
            slot,
            rewards,
            mean,
            std,
        });
    }

    Ok(results)
}

/// Plays one episode always taking the most likely action.
///
/// # Returns
/// The total reward of the episode.
fn play_greedy(
    model: &ActorCriticModel,
    params: &[f32],
    max_steps: Option<usize>,
    env: &mut dyn Environment,
) -> Result<f32> {
    let mut state = env.reset()?;
    let mut total = 0.;
    let mut steps = 0;

    loop {
        let (probs, _) = model.infer_one(params, &state)?;
        let action = ActorCriticModel::greedy_action(aview1(&probs));
        let Transition {
            next_state,
            reward,
            done,
        } = env.step(action)?;

        total += reward;
        steps += 1;
        state = next_state;

        if done || max_steps.is_some_and(|max| steps >= max) {
            return Ok(total);
        }
    }
}

fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0., 0.);
    }

    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    (mean, var.sqrt())
}

fn render_rewards(rewards: &[f32], mean: f32, std: f32) -> String {
    let mut out = String::new();

    for (i, reward) in rewards.iter().enumerate() {
        let _ = writeln!(out, "Episode {}: {reward}", i + 1);
    }

    let _ = writeln!(out, "Mean: {mean}");
    let _ = writeln!(out, "Std: {std}");
    out
}
