use std::{num::NonZeroUsize, sync::Arc, time::Instant};

use log::{debug, info, warn};
use machine_learning::{ActorCriticModel, Step, Trajectory};
use ndarray::aview1;
use parameter_server::optimization::Optimizer;
use rand::{SeedableRng, rngs::StdRng};
use worker::{
    Environment, RewardEvent, RewardSample, Transition, WorkerContext, WorkerErr, WorkerMetrics,
};

/// The bounds of a synchronous learner.
#[derive(Debug, Clone, Copy)]
pub struct LearnerConfig {
    pub timesteps_per_episode: NonZeroUsize,
    pub timesteps_per_rollout: NonZeroUsize,
    pub epochs_per_rollout: NonZeroUsize,
    pub seed: u64,
}

/// A finished rollout of one environment.
struct Rollout {
    trajectory: Trajectory,
    bootstrap: f32,
    done: bool,
}

/// A single learner stepping several environments in lockstep episodes.
///
/// Every episode resets all the environments and runs them for a fixed amount of steps, split in
/// rollouts. Each rollout is trained on for several epochs: the gradients of the environments'
/// trajectories are averaged and applied once per epoch. An environment that terminates stays
/// idle until the episode ends.
pub struct SyncLearner<O: Optimizer> {
    cfg: LearnerConfig,
    ctx: WorkerContext<O>,
    envs: Vec<Box<dyn Environment>>,
    rng: StdRng,
    params: Vec<f32>,
    grads: Vec<f32>,
    metrics: WorkerMetrics,
}

impl<O: Optimizer> SyncLearner<O> {
    /// Creates a new `SyncLearner`.
    ///
    /// # Args
    /// * `cfg` - The episode and rollout bounds.
    /// * `ctx` - The state shared with the rest of the run.
    /// * `envs` - The environments stepped by this learner.
    ///
    /// # Returns
    /// A new learner, or an error if an environment doesn't fit the model.
    pub fn new(
        cfg: LearnerConfig,
        ctx: WorkerContext<O>,
        envs: Vec<Box<dyn Environment>>,
    ) -> worker::Result<Self> {
        let model = &ctx.model;

        for env in &envs {
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
        }

        Ok(Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            params: vec![0.; model.size()],
            grads: vec![0.; model.size()],
            metrics: WorkerMetrics::default(),
            cfg,
            ctx,
            envs,
        })
    }

    /// Runs episodes until the budget is exhausted. Blocks the calling thread.
    ///
    /// # Returns
    /// The metrics of the learner.
    pub fn run(mut self) -> worker::Result<WorkerMetrics> {
        info!(envs = self.envs.len(); "synchronous learner started");
        self.ctx.store.pull_params(&mut self.params)?;

        while let Some(episode) = self.ctx.episodes.try_claim() {
            match self.run_episode(episode) {
                Ok(()) => self.metrics.bump_episode(),
                Err(WorkerErr::Env(e)) => {
                    warn!(episode = episode; "{e}, dropping the episode");
                    self.metrics.bump_env_failure();
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            episodes = self.metrics.episodes,
            updates = self.metrics.updates,
            steps = self.metrics.steps;
            "synchronous learner finished"
        );

        Ok(self.metrics)
    }

    fn run_episode(&mut self, episode: usize) -> worker::Result<()> {
        let model = Arc::clone(&self.ctx.model);
        let num_envs = self.envs.len();

        let mut states = Vec::with_capacity(num_envs);
        for env in &mut self.envs {
            states.push(Some(env.reset()?));
        }

        let mut totals = vec![0.; num_envs];
        let mut steps = 0;
        let mut elapsed = 0;
        let episode_len = self.cfg.timesteps_per_episode.get();

        while elapsed < episode_len && states.iter().any(Option::is_some) {
            let window = self
                .cfg
                .timesteps_per_rollout
                .get()
                .min(episode_len - elapsed);

            let start = Instant::now();
            let mut rollouts = Vec::with_capacity(num_envs);

            for (i, env) in self.envs.iter_mut().enumerate() {
                let Some(mut state) = states[i].take() else {
                    continue;
                };

                let mut trajectory = Trajectory::new(window, model.state_dim(), model.num_actions());
                let mut done = false;

                while !trajectory.is_full() && !done {
                    let (probs, value) = model.infer_one(&self.params, &state)?;
                    let action = ActorCriticModel::sample_action(aview1(&probs), &mut self.rng);
                    let Transition {
                        next_state,
                        reward,
                        done: terminal,
                    } = env.step(action)?;

                    trajectory.push(Step {
                        state: &state,
                        action,
                        reward,
                        probs: &probs,
                        value,
                    })?;

                    totals[i] += reward;
                    steps += 1;
                    self.metrics.bump_step();

                    state = next_state;
                    done = terminal;
                }

                let bootstrap = if done {
                    0.
                } else {
                    model.infer_one(&self.params, &state)?.1
                };

                if !done {
                    states[i] = Some(state);
                }

                rollouts.push(Rollout {
                    trajectory,
                    bootstrap,
                    done,
                });
            }

            self.metrics.rollout_time += start.elapsed();
            self.train(&model, &rollouts)?;
            elapsed += window;
        }

        let reward = totals.iter().sum::<f32>() / num_envs as f32;
        self.finish_episode(episode, reward, steps)
    }

    /// Trains on a set of rollouts for the configured amount of epochs.
    fn train(&mut self, model: &ActorCriticModel, rollouts: &[Rollout]) -> worker::Result<()> {
        let scale = 1. / rollouts.len() as f32;

        for epoch in 0..self.cfg.epochs_per_rollout.get() {
            let start = Instant::now();
            self.grads.clear();
            self.grads.resize(self.params.len(), 0.);

            let mut total = 0.;
            for rollout in rollouts {
                let loss = self.ctx.engine.backward(
                    model,
                    &self.params,
                    &rollout.trajectory,
                    rollout.bootstrap,
                    rollout.done,
                    &mut self.grads,
                )?;
                total += loss.total;
            }

            self.grads.iter_mut().for_each(|g| *g *= scale);
            self.metrics.loss_time += start.elapsed();

            let start = Instant::now();
            let grad_norm = self.ctx.store.apply(std::mem::take(&mut self.grads))?;
            self.ctx.store.pull_params(&mut self.params)?;
            self.metrics.sync_time += start.elapsed();
            self.metrics.bump_update();

            debug!(epoch = epoch, loss = total * scale, grad_norm = grad_norm; "applied update");
        }

        Ok(())
    }

    fn finish_episode(&mut self, episode: usize, reward: f32, steps: usize) -> worker::Result<()> {
        let store = &self.ctx.store;
        let outcome = self
            .ctx
            .checkpoints
            .on_episode_end(episode, reward, || store.snapshot())?;

        let sample = RewardSample {
            worker_id: 0,
            episode,
            reward,
            moving_average: outcome.moving_average,
            steps,
        };

        self.ctx
            .rewards
            .send(RewardEvent::Sample(sample))
            .map_err(|_| WorkerErr::RewardStreamClosed)
    }
}
