use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Shape(ShapeError),
    InvalidProbability {
        step: usize,
        action: usize,
        value: f32,
    },
    InvalidAction {
        action: usize,
        num_actions: usize,
    },
    TrajectoryFull {
        capacity: usize,
    },
    EmptyTrajectory,
    CheckpointMissing(PathBuf),
    CheckpointTensor {
        name: String,
        reason: &'static str,
    },
    Safetensors(SafeTensorError),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in the {what}, got {got} and expected {expected}"
            ),
            MlErr::Shape(e) => write!(f, "invalid array shape: {e}"),
            MlErr::InvalidProbability {
                step,
                action,
                value,
            } => write!(
                f,
                "invalid probability {value} for action {action} at step {step}"
            ),
            MlErr::InvalidAction {
                action,
                num_actions,
            } => write!(
                f,
                "action {action} is out of range, the model has {num_actions} actions"
            ),
            MlErr::TrajectoryFull { capacity } => {
                write!(f, "the trajectory already holds {capacity} steps")
            }
            MlErr::EmptyTrajectory => write!(f, "can't compute a loss over an empty trajectory"),
            MlErr::CheckpointMissing(path) => {
                write!(f, "checkpoint {} doesn't exist", path.display())
            }
            MlErr::CheckpointTensor { name, reason } => {
                write!(f, "checkpoint tensor {name} {reason}")
            }
            MlErr::Safetensors(e) => write!(f, "safetensors error: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Safetensors(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Safetensors(value)
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
