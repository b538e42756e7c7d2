use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use machine_learning::{LossConfig, ReturnConvention};
use serde::{Deserialize, Serialize};

use super::OptimizerConfig;
use crate::error::{OrchestratorError, Result};

/// How experience is gathered and turned into updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeConfig {
    /// Independent workers pushing gradients to the shared parameters.
    Asynchronous {
        num_workers: usize,
        /// The amount of steps between two updates of a worker.
        rollout_window: usize,
    },
    /// A single learner with several gradient epochs per rollout.
    Synchronous {
        num_envs: usize,
        timesteps_per_episode: usize,
        timesteps_per_rollout: usize,
        epochs_per_rollout: usize,
    },
}

impl ModeConfig {
    /// The return convention used when the configuration doesn't pick one.
    pub fn default_convention(&self) -> ReturnConvention {
        match self {
            Self::Asynchronous { .. } => ReturnConvention::Accumulated,
            Self::Synchronous { .. } => ReturnConvention::BootstrapOnly,
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self::Asynchronous {
            num_workers: 1,
            rollout_window: 50,
        }
    }
}

/// The directory runs are grouped under when none is configured.
pub const DEFAULT_OUTPUT_ROOT: &str = "experiment";

/// Everything a training run is configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub env_name: String,
    pub mode: ModeConfig,
    pub max_episodes: usize,
    pub max_episode_steps: Option<usize>,
    pub optimizer: OptimizerConfig,
    pub entropy_coef: f32,
    pub clip_range: f32,
    pub value_weight: f32,
    pub gamma: f32,
    pub return_convention: Option<ReturnConvention>,
    pub max_grad_norm: Option<f32>,
    pub num_checkpoints: usize,
    pub hidden_units: usize,
    pub shard_size: usize,
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    pub test_episodes: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            env_name: "CartPole-v1".into(),
            mode: ModeConfig::default(),
            max_episodes: 100,
            max_episode_steps: None,
            optimizer: OptimizerConfig::default(),
            entropy_coef: 0.01,
            clip_range: 0.2,
            value_weight: 0.5,
            gamma: 0.99,
            return_convention: None,
            max_grad_norm: None,
            num_checkpoints: 10,
            hidden_units: 100,
            shard_size: 1024,
            seed: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            test_episodes: 100,
        }
    }
}

impl TrainingConfig {
    /// Reads a configuration from a json file, missing fields take their default value.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Gives a run left on the default output directory a subdirectory of its own, named after
    /// the environment and the time the run started.
    ///
    /// # Arguments
    /// * `started_at` - The start of the run, in seconds since the unix epoch.
    pub fn with_run_dir(mut self, started_at: u64) -> Self {
        if self.output_dir == Path::new(DEFAULT_OUTPUT_ROOT) {
            self.output_dir = self
                .output_dir
                .join(format!("{}_{started_at}", self.env_name));
        }

        self
    }

    /// Returns the return convention of the run.
    pub fn convention(&self) -> ReturnConvention {
        self.return_convention
            .unwrap_or_else(|| self.mode.default_convention())
    }

    pub fn loss_config(&self) -> LossConfig {
        LossConfig {
            gamma: self.gamma,
            clip_range: self.clip_range,
            value_weight: self.value_weight,
            entropy_coef: self.entropy_coef,
            convention: self.convention(),
        }
    }

    /// Checks every bound of the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violated bound.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            ModeConfig::Asynchronous {
                num_workers,
                rollout_window,
            } => {
                positive("num_workers", num_workers)?;
                positive("rollout_window", rollout_window)?;
            }
            ModeConfig::Synchronous {
                num_envs,
                timesteps_per_episode,
                timesteps_per_rollout,
                epochs_per_rollout,
            } => {
                positive("num_envs", num_envs)?;
                positive("timesteps_per_episode", timesteps_per_episode)?;
                positive("timesteps_per_rollout", timesteps_per_rollout)?;
                positive("epochs_per_rollout", epochs_per_rollout)?;
            }
        }

        positive("max_episodes", self.max_episodes)?;
        positive("num_checkpoints", self.num_checkpoints)?;
        positive("hidden_units", self.hidden_units)?;
        positive("shard_size", self.shard_size)?;

        if let Some(max_episode_steps) = self.max_episode_steps {
            positive("max_episode_steps", max_episode_steps)?;
        }

        let lr = self.optimizer.learning_rate();
        if !(lr.is_finite() && lr > 0.) {
            return invalid(format!("learning rate must be positive, got {lr}"));
        }

        if let OptimizerConfig::GradientDescentWithMomentum { mu, .. } = self.optimizer {
            if !(0. ..1.).contains(&mu) {
                return invalid(format!("momentum must be in [0, 1), got {mu}"));
            }
        }

        if !(self.clip_range.is_finite() && self.clip_range > 0.) {
            return invalid(format!(
                "clip_range must be positive, got {}",
                self.clip_range
            ));
        }

        if !(0. ..=1.).contains(&self.gamma) {
            return invalid(format!("gamma must be in [0, 1], got {}", self.gamma));
        }

        if !(self.value_weight.is_finite() && self.value_weight >= 0.) {
            return invalid(format!(
                "value_weight can't be negative, got {}",
                self.value_weight
            ));
        }

        if !(self.entropy_coef.is_finite() && self.entropy_coef >= 0.) {
            return invalid(format!(
                "entropy_coef can't be negative, got {}",
                self.entropy_coef
            ));
        }

        if let Some(max_grad_norm) = self.max_grad_norm {
            if !(max_grad_norm.is_finite() && max_grad_norm > 0.) {
                return invalid(format!(
                    "max_grad_norm must be positive, got {max_grad_norm}"
                ));
            }
        }

        Ok(())
    }

    /// Returns the step limit of evaluation episodes.
    pub fn evaluation_step_cap(&self) -> Option<usize> {
        match self.mode {
            ModeConfig::Asynchronous { .. } => self.max_episode_steps,
            ModeConfig::Synchronous {
                timesteps_per_episode,
                ..
            } => Some(
                self.max_episode_steps
                    .map_or(timesteps_per_episode, |max| max.min(timesteps_per_episode)),
            ),
        }
    }

    pub(crate) fn shard_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.shard_size).unwrap_or(NonZeroUsize::MIN)
    }

    pub(crate) fn num_checkpoints(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.num_checkpoints).unwrap_or(NonZeroUsize::MIN)
    }
}

fn positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return invalid(format!("{name} must be greater than 0"));
    }

    Ok(())
}

fn invalid(msg: String) -> Result<()> {
    Err(OrchestratorError::InvalidConfig(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TrainingConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.convention(), ReturnConvention::Accumulated);
        assert_eq!(config.optimizer.learning_rate(), 1e-3);
    }

    #[test]
    fn json_fills_in_defaults() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{
                "mode": {
                    "kind": "synchronous",
                    "num_envs": 2,
                    "timesteps_per_episode": 400,
                    "timesteps_per_rollout": 50,
                    "epochs_per_rollout": 5
                },
                "optimizer": { "kind": "gradient_descent", "lr": 0.1 },
                "seed": 7
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_episodes, 100);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.convention(), ReturnConvention::BootstrapOnly);
        assert_eq!(config.optimizer, OptimizerConfig::GradientDescent { lr: 0.1 });
    }

    #[test]
    fn out_of_bounds_values_are_rejected() {
        let invalid_configs = [
            TrainingConfig {
                mode: ModeConfig::Asynchronous {
                    num_workers: 0,
                    rollout_window: 50,
                },
                ..Default::default()
            },
            TrainingConfig {
                mode: ModeConfig::Asynchronous {
                    num_workers: 2,
                    rollout_window: 0,
                },
                ..Default::default()
            },
            TrainingConfig {
                clip_range: 0.,
                ..Default::default()
            },
            TrainingConfig {
                gamma: 1.5,
                ..Default::default()
            },
            TrainingConfig {
                optimizer: OptimizerConfig::adam(-1.),
                ..Default::default()
            },
            TrainingConfig {
                max_grad_norm: Some(0.),
                ..Default::default()
            },
            TrainingConfig {
                num_checkpoints: 0,
                ..Default::default()
            },
        ];

        for config in invalid_configs {
            assert!(matches!(
                config.validate(),
                Err(OrchestratorError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn default_output_dir_is_split_per_run() {
        let first = TrainingConfig::default().with_run_dir(1_700_000_000);
        let second = TrainingConfig::default().with_run_dir(1_700_000_060);

        assert_eq!(
            first.output_dir,
            Path::new("experiment").join("CartPole-v1_1700000000")
        );
        assert_ne!(first.output_dir, second.output_dir);

        let chosen = TrainingConfig {
            output_dir: PathBuf::from("runs/mine"),
            ..Default::default()
        };
        assert_eq!(
            chosen.with_run_dir(1_700_000_000).output_dir,
            Path::new("runs/mine")
        );
    }

    #[test]
    fn learning_rate_override_keeps_the_optimizer() {
        let optimizer = OptimizerConfig::GradientDescentWithMomentum { lr: 0.1, mu: 0.9 };

        assert_eq!(
            optimizer.with_learning_rate(0.5),
            OptimizerConfig::GradientDescentWithMomentum { lr: 0.5, mu: 0.9 }
        );
    }
}
