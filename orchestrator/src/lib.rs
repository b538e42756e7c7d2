pub mod configs;
pub mod coordinator;
pub mod error;
pub mod evaluation;
pub mod initialization;
pub mod learner;
pub mod summary;

use machine_learning::ActorCriticModel;
use worker::EnvFactory;

pub use configs::{ModeConfig, OptimizerConfig, TrainingConfig};
pub use coordinator::{Coordinator, TrainingReport};
pub use error::{OrchestratorError, Result};
pub use evaluation::EvaluationResult;

/// Trains a model as configured, returning once every worker is done.
///
/// # Errors
/// Returns an `OrchestratorError` if the configuration is invalid, every worker failed or the
/// outputs of the run couldn't be written.
pub async fn train(config: TrainingConfig, env_factory: EnvFactory) -> Result<TrainingReport> {
    log::info!("validating config");
    Coordinator::new(config, env_factory)?.run().await
}

/// Evaluates the checkpoints written by a previous run with the same configuration.
///
/// # Errors
/// Returns an `OrchestratorError` if the configuration is invalid, a checkpoint doesn't fit the
/// model or the environment fails.
pub fn evaluate(config: &TrainingConfig, env_factory: &EnvFactory) -> Result<Vec<EvaluationResult>> {
    config.validate()?;

    let seed = initialization::resolve_seed(config.seed);
    let mut env = env_factory(0, seed);
    let model = ActorCriticModel::new(env.state_dim(), env.num_actions(), config.hidden_units);
    log::info!(
        "evaluating the checkpoints in {} over {} episode(s)",
        config.output_dir.display(),
        config.test_episodes
    );

    evaluation::evaluate_checkpoints(
        &config.output_dir,
        &model,
        config.num_checkpoints,
        config.test_episodes,
        config.evaluation_step_cap(),
        env.as_mut(),
    )
}
