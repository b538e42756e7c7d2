use std::{sync::Arc, time::Instant};

use log::{debug, info, warn};
use machine_learning::{ActorCriticModel, LossEngine, Step, Trajectory};
use ndarray::aview1;
use parameter_server::{ParameterStore, optimization::Optimizer};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    Result,
    checkpoint::CheckpointManager,
    config::WorkerConfig,
    env::{Environment, Transition},
    episode::EpisodeCounter,
    error::WorkerErr,
    metrics::WorkerMetrics,
    reward::{RewardEvent, RewardSample, RewardSender},
    state::WorkerState,
};

/// Everything a worker shares with the rest of the run.
pub struct WorkerContext<O: Optimizer> {
    pub model: Arc<ActorCriticModel>,
    pub engine: LossEngine,
    pub store: ParameterStore<O>,
    pub episodes: Arc<EpisodeCounter>,
    pub checkpoints: Arc<CheckpointManager>,
    pub rewards: RewardSender,
}

impl<O: Optimizer> Clone for WorkerContext<O> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            engine: self.engine,
            store: self.store.clone(),
            episodes: Arc::clone(&self.episodes),
            checkpoints: Arc::clone(&self.checkpoints),
            rewards: self.rewards.clone(),
        }
    }
}

/// An independent learner with a private copy of the parameters and its own environment.
///
/// A worker claims episodes from the shared budget until it's exhausted. Every episode is split
/// in rollout windows and every window ends with an update: the gradient of the window's loss is
/// pushed to the store and a fresh copy of the parameters is pulled back.
pub struct Worker<O: Optimizer> {
    cfg: WorkerConfig,
    ctx: WorkerContext<O>,
    env: Box<dyn Environment>,
    rng: StdRng,
    state: WorkerState,
    metrics: WorkerMetrics,
}

impl<O: Optimizer> Worker<O> {
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `cfg` - The execution bounds of this worker.
    /// * `ctx` - The state shared with the rest of the run.
    /// * `env` - The environment this worker interacts with.
    ///
    /// # Returns
    /// A new worker, or an error if the environment doesn't fit the model.
    pub fn new(cfg: WorkerConfig, ctx: WorkerContext<O>, env: Box<dyn Environment>) -> Result<Self> {
        let model = &ctx.model;

        if env.state_dim() != model.state_dim() {
            return Err(WorkerErr::EnvMismatch {
                what: "state features",
                got: env.state_dim(),
                expected: model.state_dim(),
            });
        }

        if env.num_actions() != model.num_actions() {
            return Err(WorkerErr::EnvMismatch {
                what: "actions",
                got: env.num_actions(),
                expected: model.num_actions(),
            });
        }

        Ok(Self {
            rng: StdRng::seed_from_u64(cfg.seed()),
            state: WorkerState::new(model.size()),
            metrics: WorkerMetrics::default(),
            cfg,
            ctx,
            env,
        })
    }

    /// Runs episodes until the shared budget is exhausted. Blocks the calling thread.
    ///
    /// An environment failure drops the episode in progress: its partial trajectory is discarded,
    /// no reward is reported for it and the worker moves on to the next episode.
    ///
    /// # Returns
    /// The metrics of this worker.
    ///
    /// # Errors
    /// Returns `WorkerErr` on model, store, checkpoint or reward stream failures.
    pub fn run(mut self) -> Result<WorkerMetrics> {
        let worker_id = self.cfg.worker_id();
        info!(worker_id = worker_id; "worker started");

        self.ctx.store.pull_params(&mut self.state.params)?;

        while let Some(episode) = self.ctx.episodes.try_claim() {
            match self.run_episode(episode) {
                Ok(()) => self.metrics.bump_episode(),
                Err(WorkerErr::Env(e)) => {
                    warn!(worker_id = worker_id, episode = episode; "{e}, dropping the episode");
                    self.metrics.bump_env_failure();
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            worker_id = worker_id,
            episodes = self.metrics.episodes,
            updates = self.metrics.updates,
            steps = self.metrics.steps;
            "worker finished"
        );

        Ok(self.metrics)
    }

    fn run_episode(&mut self, episode: usize) -> Result<()> {
        let window = self.cfg.rollout_window();
        let max_steps = self.cfg.max_episode_steps();
        let model = Arc::clone(&self.ctx.model);

        let mut state = self.env.reset()?;
        let mut total_reward = 0.;
        let mut steps = 0;

        loop {
            let start = Instant::now();
            let mut trajectory = Trajectory::new(window, model.state_dim(), model.num_actions());
            let mut done = false;
            let mut truncated = false;

            while !trajectory.is_full() && !done && !truncated {
                let (probs, value) = model.infer_one(&self.state.params, &state)?;
                let action = ActorCriticModel::sample_action(aview1(&probs), &mut self.rng);
                let Transition {
                    next_state,
                    reward,
                    done: terminal,
                } = self.env.step(action)?;

                trajectory.push(Step {
                    state: &state,
                    action,
                    reward,
                    probs: &probs,
                    value,
                })?;

                total_reward += reward;
                steps += 1;
                self.metrics.bump_step();

                state = next_state;
                done = terminal;
                truncated = !done && max_steps.is_some_and(|max| steps >= max);
            }

            self.metrics.rollout_time += start.elapsed();

            let bootstrap = if done {
                0.
            } else {
                model.infer_one(&self.state.params, &state)?.1
            };

            self.update(&model, &trajectory, bootstrap, done)?;

            if done || truncated {
                break;
            }
        }

        self.finish_episode(episode, total_reward, steps)
    }

    /// Pushes the gradient of a window's loss and pulls the resulting parameters.
    fn update(
        &mut self,
        model: &ActorCriticModel,
        trajectory: &Trajectory,
        bootstrap: f32,
        done: bool,
    ) -> Result<()> {
        let start = Instant::now();
        self.state.zero_grads();
        let loss = self.ctx.engine.backward(
            model,
            &self.state.params,
            trajectory,
            bootstrap,
            done,
            &mut self.state.grads,
        )?;
        self.metrics.loss_time += start.elapsed();

        let start = Instant::now();
        let grad_norm = self.ctx.store.apply(self.state.take_grads())?;
        self.ctx.store.pull_params(&mut self.state.params)?;
        self.metrics.sync_time += start.elapsed();
        self.metrics.bump_update();

        debug!(
            worker_id = self.cfg.worker_id(),
            loss = loss.total,
            policy = loss.policy,
            value = loss.value,
            entropy = loss.entropy,
            grad_norm = grad_norm;
            "applied update"
        );

        Ok(())
    }

    fn finish_episode(&mut self, episode: usize, reward: f32, steps: usize) -> Result<()> {
        let store = &self.ctx.store;
        let outcome = self
            .ctx
            .checkpoints
            .on_episode_end(episode, reward, || store.snapshot())?;

        let sample = RewardSample {
            worker_id: self.cfg.worker_id(),
            episode,
            reward,
            moving_average: outcome.moving_average,
            steps,
        };

        self.ctx
            .rewards
            .send(RewardEvent::Sample(sample))
            .map_err(|_| WorkerErr::RewardStreamClosed)?;

        debug!(
            worker_id = self.cfg.worker_id(),
            episode = episode,
            reward = reward,
            moving_average = outcome.moving_average;
            "episode finished"
        );

        Ok(())
    }
}
