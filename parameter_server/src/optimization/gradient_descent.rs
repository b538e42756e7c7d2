use super::Optimizer;
use crate::storage::{Result, SizeMismatchErr};

/// Plain gradient descent, it keeps no state between updates.
#[derive(Debug, Clone, Copy)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - Scales the gradient into a parameter update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        if grad.len() != params.len() {
            return Err(SizeMismatchErr);
        }

        for (param, g) in params.iter_mut().zip(grad) {
            *param -= self.learning_rate * g;
        }

        Ok(())
    }
}
