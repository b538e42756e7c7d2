pub mod arch;
pub mod checkpoint;
pub mod error;
pub mod loss;
pub mod trajectory;

pub use arch::{ActorCriticModel, Inference, ParamLayout, Parameters, Tape, TensorSpec};
pub use checkpoint::{CheckpointMeta, CheckpointSlot};
pub use error::{MlErr, Result};
pub use loss::{LossBreakdown, LossConfig, LossEngine, ReturnConvention, discounted_returns};
pub use trajectory::{Step, Trajectory};
