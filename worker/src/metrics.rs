use std::time::Duration;

/// Counters and timings of a worker, returned when it finishes.
#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub rollout_time: Duration,
    pub loss_time: Duration,
    pub sync_time: Duration,

    pub steps: u64,
    pub updates: u64,
    pub episodes: u64,
    pub env_failures: u64,
}

impl WorkerMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn bump_update(&mut self) {
        self.updates += 1;
    }

    #[inline]
    pub fn bump_episode(&mut self) {
        self.episodes += 1;
    }

    #[inline]
    pub fn bump_env_failure(&mut self) {
        self.env_failures += 1;
    }

    /// Folds the metrics of another worker into these.
    pub fn merge(&mut self, other: &WorkerMetrics) {
        self.rollout_time += other.rollout_time;
        self.loss_time += other.loss_time;
        self.sync_time += other.sync_time;
        self.steps += other.steps;
        self.updates += other.updates;
        self.episodes += other.episodes;
        self.env_failures += other.env_failures;
    }
}
