use std::num::NonZeroUsize;

/// Immutable execution bounds for a worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    worker_id: usize,
    rollout_window: NonZeroUsize,
    max_episode_steps: Option<NonZeroUsize>,
    seed: u64,
}

impl WorkerConfig {
    /// Creates a new worker configuration.
    ///
    /// # Args
    /// * `worker_id` - Identifier used for observability and reward samples.
    /// * `rollout_window` - The maximum amount of steps between two updates.
    /// * `seed` - Seeds the action sampling of this worker.
    ///
    /// # Returns
    /// A `WorkerConfig` instance.
    pub fn new(worker_id: usize, rollout_window: NonZeroUsize, seed: u64) -> Self {
        Self {
            worker_id,
            rollout_window,
            max_episode_steps: None,
            seed,
        }
    }

    /// Truncates episodes reaching `max_episode_steps` steps.
    pub fn with_max_episode_steps(mut self, max_episode_steps: Option<NonZeroUsize>) -> Self {
        self.max_episode_steps = max_episode_steps;
        self
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn rollout_window(&self) -> usize {
        self.rollout_window.get()
    }

    pub fn max_episode_steps(&self) -> Option<usize> {
        self.max_episode_steps.map(NonZeroUsize::get)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}
