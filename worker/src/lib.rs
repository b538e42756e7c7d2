pub mod checkpoint;
pub mod config;
pub mod env;
pub mod episode;
pub mod error;
pub mod metrics;
pub mod reward;
mod state;
pub mod worker;

pub use checkpoint::{CheckpointManager, CheckpointOutcome, MovingAverage};
pub use config::WorkerConfig;
pub use env::{EnvErr, EnvFactory, Environment, Transition};
pub use episode::EpisodeCounter;
pub use error::{Result, WorkerErr};
pub use metrics::WorkerMetrics;
pub use reward::{RewardEvent, RewardSample, RewardSender};
pub use worker::{Worker, WorkerContext};
