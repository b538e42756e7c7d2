pub mod activations;
pub mod layers;
mod actor_critic;
mod layout;

pub use actor_critic::{ActorCriticModel, Inference, Tape};
pub use layout::{ParamLayout, Parameters, TensorSpec};
