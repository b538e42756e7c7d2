mod engine;
mod returns;

pub use engine::{LossBreakdown, LossConfig, LossEngine, PROB_CLAMP_MAX, PROB_CLAMP_MIN};
pub use returns::{ReturnConvention, discounted_returns};
