mod optimizer;
mod training;

pub use optimizer::OptimizerConfig;
pub use training::{DEFAULT_OUTPUT_ROOT, ModeConfig, TrainingConfig};
