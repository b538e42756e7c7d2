use std::fmt;

use machine_learning::MlErr;
use parameter_server::initialization::RandErr;
use worker::{EnvErr, WorkerErr};

/// The orchestrator module's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any worker starts.
    InvalidConfig(String),
    /// The initial parameters couldn't be generated.
    Initialization(RandErr),
    /// A worker produced an unrecoverable error during training.
    WorkerError { worker_id: usize, msg: String },
    /// Every worker of the run failed.
    AllWorkersFailed { failures: usize },
    /// A failure outside of any worker, while evaluating or checkpointing.
    Worker(WorkerErr),
    Ml(MlErr),
    Json(serde_json::Error),
    /// An underlying I/O error not covered by the above variants.
    Io(std::io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Initialization(e) => write!(f, "initialization failed: {e}"),
            Self::WorkerError { worker_id, msg } => {
                write!(f, "worker {worker_id} error: {msg}")
            }
            Self::AllWorkersFailed { failures } => {
                write!(f, "all {failures} worker(s) failed")
            }
            Self::Worker(e) => write!(f, "{e}"),
            Self::Ml(e) => write!(f, "{e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Initialization(e) => Some(e),
            Self::Worker(e) => Some(e),
            Self::Ml(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<RandErr> for OrchestratorError {
    fn from(e: RandErr) -> Self {
        Self::Initialization(e)
    }
}

impl From<WorkerErr> for OrchestratorError {
    fn from(e: WorkerErr) -> Self {
        Self::Worker(e)
    }
}

impl From<EnvErr> for OrchestratorError {
    fn from(e: EnvErr) -> Self {
        Self::Worker(WorkerErr::Env(e))
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
