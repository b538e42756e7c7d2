use parameter_server::optimization::Adam;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam { lr: f32, b1: f32, b2: f32, eps: f32 },
    GradientDescent { lr: f32 },
    GradientDescentWithMomentum { lr: f32, mu: f32 },
}

impl OptimizerConfig {
    /// Adam with its usual hyperparameters.
    pub fn adam(lr: f32) -> Self {
        Self::Adam {
            lr,
            b1: Adam::DEFAULT_BETA1,
            b2: Adam::DEFAULT_BETA2,
            eps: Adam::DEFAULT_EPSILON,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match *self {
            Self::Adam { lr, .. }
            | Self::GradientDescent { lr }
            | Self::GradientDescentWithMomentum { lr, .. } => lr,
        }
    }

    /// Replaces the learning rate, keeping every other hyperparameter.
    pub fn with_learning_rate(self, learning_rate: f32) -> Self {
        match self {
            Self::Adam { b1, b2, eps, .. } => Self::Adam {
                lr: learning_rate,
                b1,
                b2,
                eps,
            },
            Self::GradientDescent { .. } => Self::GradientDescent { lr: learning_rate },
            Self::GradientDescentWithMomentum { mu, .. } => Self::GradientDescentWithMomentum {
                lr: learning_rate,
                mu,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Adam { .. } => "adam",
            Self::GradientDescent { .. } => "gradient_descent",
            Self::GradientDescentWithMomentum { .. } => "gradient_descent_with_momentum",
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::adam(1e-3)
    }
}
