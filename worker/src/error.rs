use std::{error::Error, fmt};

use machine_learning::MlErr;
use parameter_server::SizeMismatchErr;

use crate::env::EnvErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Env(EnvErr),
    Ml(MlErr),
    Store(SizeMismatchErr),
    EnvMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    RewardStreamClosed,
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Env(e) => write!(f, "{e}"),
            WorkerErr::Ml(e) => write!(f, "model error: {e}"),
            WorkerErr::Store(e) => write!(f, "{e}"),
            WorkerErr::EnvMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "the environment has {got} {what} but the model expects {expected}"
            ),
            WorkerErr::RewardStreamClosed => write!(f, "the reward stream was closed"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Env(e) => Some(e),
            WorkerErr::Ml(e) => Some(e),
            WorkerErr::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EnvErr> for WorkerErr {
    fn from(value: EnvErr) -> Self {
        Self::Env(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<SizeMismatchErr> for WorkerErr {
    fn from(value: SizeMismatchErr) -> Self {
        Self::Store(value)
    }
}
