use std::{
    error::Error,
    fmt::{self, Display},
    sync::Arc,
};

/// The outcome of one environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next_state: Vec<f32>,
    pub reward: f32,
    pub done: bool,
}

/// A failure of the environment simulator while resetting or stepping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvErr {
    reason: String,
}

impl EnvErr {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Display for EnvErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "environment failure: {}", self.reason)
    }
}

impl Error for EnvErr {}

/// An episodic task with fixed length real valued states and a finite set of actions.
pub trait Environment: Send {
    /// The amount of features of every state.
    fn state_dim(&self) -> usize;

    /// The amount of discrete actions.
    fn num_actions(&self) -> usize;

    /// Starts a new episode.
    ///
    /// # Returns
    /// The initial state of the episode.
    fn reset(&mut self) -> Result<Vec<f32>, EnvErr>;

    /// Advances the episode by taking `action`.
    ///
    /// # Arguments
    /// * `action` - The index of the action, lower than `num_actions`.
    ///
    /// # Returns
    /// The resulting transition.
    fn step(&mut self, action: usize) -> Result<Transition, EnvErr>;
}

/// Builds the environment of a worker given its id and a seed.
pub type EnvFactory = Arc<dyn Fn(usize, u64) -> Box<dyn Environment> + Send + Sync>;
