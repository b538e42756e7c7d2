use tokio::sync::mpsc::UnboundedSender;

/// One completed episode as reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardSample {
    pub worker_id: usize,
    pub episode: usize,
    pub reward: f32,
    /// The run wide reward moving average after this episode.
    pub moving_average: f32,
    pub steps: usize,
}

/// An item of the reward stream, which always ends with `EndOfRun`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RewardEvent {
    Sample(RewardSample),
    EndOfRun,
}

pub type RewardSender = UnboundedSender<RewardEvent>;
