use std::{
    any::Any,
    fs, io,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{error, info};
use machine_learning::{ActorCriticModel, LossEngine};
use parameter_server::optimization::{
    Adam, GradientDescent, GradientDescentWithMomentum, Optimizer,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    task::JoinSet,
};
use worker::{
    CheckpointManager, EnvFactory, Environment, EpisodeCounter, RewardEvent, RewardSample,
    RewardSender, Worker, WorkerConfig, WorkerContext, WorkerMetrics,
};

use crate::{
    configs::{ModeConfig, OptimizerConfig, TrainingConfig},
    error::{OrchestratorError, Result},
    initialization,
    learner::{LearnerConfig, SyncLearner},
    summary,
};

/// What a blocking training task hands back when it finishes: its id and either its metrics or
/// the reason it failed.
type TaskOutcome = (usize, std::result::Result<WorkerMetrics, String>);

/// The outcome of a training run.
#[derive(Debug)]
pub struct TrainingReport {
    /// Every completed episode, in arrival order.
    pub rewards: Vec<RewardSample>,
    /// The metrics of every task that finished, merged.
    pub metrics: WorkerMetrics,
    /// The tasks that failed, as `WorkerError`s.
    pub failures: Vec<OrchestratorError>,
    pub elapsed: Duration,
    pub seed: u64,
    pub best_moving_average: Option<f32>,
    /// The parameters at the end of the run, in layout order.
    pub final_params: Vec<f32>,
}

/// Drives a training run from the initial parameters to the final report.
pub struct Coordinator {
    config: TrainingConfig,
    env_factory: EnvFactory,
}

impl Coordinator {
    /// Creates a new `Coordinator`.
    ///
    /// # Arguments
    /// * `config` - The configuration of the run.
    /// * `env_factory` - Builds the environments of the run.
    ///
    /// # Returns
    /// A new `Coordinator`, or `InvalidConfig` if the configuration is out of bounds.
    pub fn new(config: TrainingConfig, env_factory: EnvFactory) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            env_factory,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Runs the whole training, waiting for every worker to finish.
    ///
    /// Workers failing are logged and reported, the run only fails if all of them do. Once every
    /// worker is done the final checkpoint, the summary and the reward report are written to
    /// the output directory.
    ///
    /// # Returns
    /// The report of the run.
    pub async fn run(self) -> Result<TrainingReport> {
        let seed = initialization::resolve_seed(self.config.seed);
        let probe = (self.env_factory)(0, seed);
        let model = Arc::new(ActorCriticModel::new(
            probe.state_dim(),
            probe.num_actions(),
            self.config.hidden_units,
        ));
        drop(probe);

        info!(
            env = self.config.env_name.as_str(),
            seed = seed,
            params = model.size(),
            optimizer = self.config.optimizer.name();
            "starting training run"
        );

        let optimizer = self.config.optimizer;
        match optimizer {
            OptimizerConfig::Adam { lr, b1, b2, eps } => {
                self.run_with(model, seed, move |len| Adam::new(len, lr, b1, b2, eps))
                    .await
            }
            OptimizerConfig::GradientDescent { lr } => {
                self.run_with(model, seed, move |_| GradientDescent::new(lr))
                    .await
            }
            OptimizerConfig::GradientDescentWithMomentum { lr, mu } => {
                self.run_with(model, seed, move |len| {
                    GradientDescentWithMomentum::new(len, lr, mu)
                })
                .await
            }
        }
    }

    async fn run_with<O, OF>(
        self,
        model: Arc<ActorCriticModel>,
        seed: u64,
        optimizer_factory: OF,
    ) -> Result<TrainingReport>
    where
        O: Optimizer + 'static,
        OF: FnMut(usize) -> O,
    {
        let config = &self.config;
        let store = initialization::build_store(
            model.layout(),
            seed,
            config.shard_size(),
            config.max_grad_norm,
            optimizer_factory,
        )?;

        fs::create_dir_all(&config.output_dir)?;
        let checkpoints = Arc::new(CheckpointManager::new(
            &config.output_dir,
            Arc::clone(model.layout()),
            config.num_checkpoints(),
            config.max_episodes,
        ));
        checkpoints.clear()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            model: Arc::clone(&model),
            engine: LossEngine::new(config.loss_config()),
            store: store.clone(),
            episodes: Arc::new(EpisodeCounter::new(config.max_episodes)),
            checkpoints: Arc::clone(&checkpoints),
            rewards: tx.clone(),
        };

        let start = Instant::now();
        let tasks = self.spawn_tasks(ctx, seed);
        let spawned = tasks.len();

        let joiner = tokio::spawn(join_tasks(tasks, tx));
        let rewards = collect_rewards(&mut rx).await;
        let (metrics, failures) = joiner.await.map_err(io::Error::other)?;
        let elapsed = start.elapsed();

        if failures.len() == spawned {
            return Err(OrchestratorError::AllWorkersFailed {
                failures: failures.len(),
            });
        }

        let final_params = store.snapshot();
        checkpoints.save_final(final_params.clone(), rewards.len())?;

        let report = TrainingReport {
            rewards,
            metrics,
            failures,
            elapsed,
            seed,
            best_moving_average: checkpoints.best_moving_average(),
            final_params,
        };

        summary::write_summary(&config.output_dir, config, &model, &report)?;
        summary::write_rewards(&config.output_dir, &report.rewards)?;

        info!(
            episodes = report.rewards.len(),
            updates = report.metrics.updates,
            failed = report.failures.len(),
            elapsed_secs = elapsed.as_secs_f64();
            "training run finished"
        );

        Ok(report)
    }

    /// Spawns the blocking tasks of the configured mode.
    ///
    /// # Arguments
    /// * `ctx` - The state shared by the tasks.
    /// * `seed` - The seed of the run, offset by the id of every task.
    ///
    /// # Returns
    /// The running tasks.
    fn spawn_tasks<O: Optimizer + 'static>(
        &self,
        ctx: WorkerContext<O>,
        seed: u64,
    ) -> JoinSet<TaskOutcome> {
        let mut tasks = JoinSet::new();
        let max_steps = self.config.max_episode_steps.and_then(NonZeroUsize::new);

        match self.config.mode {
            ModeConfig::Asynchronous {
                num_workers,
                rollout_window,
            } => {
                for worker_id in 0..num_workers {
                    let worker_seed = seed.wrapping_add(worker_id as u64);
                    let cfg = WorkerConfig::new(worker_id, non_zero(rollout_window), worker_seed)
                        .with_max_episode_steps(max_steps);

                    let env = (self.env_factory)(worker_id, worker_seed);
                    let ctx = ctx.clone();

                    tasks.spawn_blocking(move || {
                        let outcome = guarded(|| Worker::new(cfg, ctx, env)?.run());
                        (worker_id, outcome)
                    });
                }
            }
            ModeConfig::Synchronous {
                num_envs,
                timesteps_per_episode,
                timesteps_per_rollout,
                epochs_per_rollout,
            } => {
                let envs: Vec<Box<dyn Environment>> = (0..num_envs)
                    .map(|i| (self.env_factory)(i, seed.wrapping_add(i as u64)))
                    .collect();

                let timesteps_per_episode = match max_steps {
                    Some(max) => max.min(non_zero(timesteps_per_episode)),
                    None => non_zero(timesteps_per_episode),
                };

                let cfg = LearnerConfig {
                    timesteps_per_episode,
                    timesteps_per_rollout: non_zero(timesteps_per_rollout),
                    epochs_per_rollout: non_zero(epochs_per_rollout),
                    seed,
                };

                tasks.spawn_blocking(move || {
                    let outcome = guarded(|| SyncLearner::new(cfg, ctx, envs)?.run());
                    (0, outcome)
                });
            }
        }

        tasks
    }
}

/// Waits for every task, then closes the reward stream.
async fn join_tasks(
    mut tasks: JoinSet<TaskOutcome>,
    rewards: RewardSender,
) -> (WorkerMetrics, Vec<OrchestratorError>) {
    let mut metrics = WorkerMetrics::default();
    let mut failures = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(task_metrics))) => metrics.merge(&task_metrics),
            Ok((worker_id, Err(msg))) => {
                error!(worker_id = worker_id; "worker failed: {msg}");
                failures.push(OrchestratorError::WorkerError { worker_id, msg });
            }
            Err(e) => {
                error!("worker task was cancelled: {e}");
                failures.push(OrchestratorError::Io(io::Error::other(e)));
            }
        }
    }

    // The receiver only goes away if the coordinator itself was dropped.
    let _ = rewards.send(RewardEvent::EndOfRun);
    (metrics, failures)
}

/// Collects reward samples in arrival order until the end of the run.
async fn collect_rewards(rx: &mut UnboundedReceiver<RewardEvent>) -> Vec<RewardSample> {
    let mut rewards = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            RewardEvent::Sample(sample) => {
                info!(
                    worker_id = sample.worker_id,
                    episode = sample.episode,
                    reward = sample.reward,
                    moving_average = sample.moving_average;
                    "episode completed"
                );
                rewards.push(sample);
            }
            RewardEvent::EndOfRun => break,
        }
    }

    rewards
}

/// Runs a task turning its errors and panics into a failure reason.
fn guarded<F>(task: F) -> std::result::Result<WorkerMetrics, String>
where
    F: FnOnce() -> worker::Result<WorkerMetrics>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(metrics)) => Ok(metrics),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return format!("panicked: {msg}");
    }

    if let Some(msg) = payload.downcast_ref::<String>() {
        return format!("panicked: {msg}");
    }

    "panicked".into()
}

fn non_zero(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use worker::{EnvErr, WorkerErr};

    use super::*;

    #[test]
    fn task_errors_become_failure_reasons() {
        let outcome = guarded(|| Err(WorkerErr::Env(EnvErr::new("boom"))));
        assert_eq!(outcome.unwrap_err(), "environment failure: boom");
    }

    #[test]
    fn panics_are_contained() {
        let outcome = guarded(|| panic!("worker exploded"));
        assert_eq!(outcome.unwrap_err(), "panicked: worker exploded");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rewards_are_collected_until_the_end_of_run() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sample = RewardSample {
            worker_id: 1,
            episode: 0,
            reward: 3.,
            moving_average: 3.,
            steps: 3,
        };

        tx.send(RewardEvent::Sample(sample)).unwrap();
        tx.send(RewardEvent::EndOfRun).unwrap();
        tx.send(RewardEvent::Sample(sample)).unwrap();

        assert_eq!(collect_rewards(&mut rx).await, [sample]);
    }
}
