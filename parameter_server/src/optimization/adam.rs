use super::Optimizer;
use crate::storage::{Result, SizeMismatchErr};

/// The running first and second moment estimates of a single parameter.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    mean: f32,
    uncentered_var: f32,
}

/// Adam, with the bias correction folded into the step size.
///
/// The moments live as long as the optimizer, so they keep accumulating across every update the
/// store applies to the shard this instance owns.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    steps: i32,
    moments: Box<[Moments]>,
}

impl Adam {
    pub const DEFAULT_BETA1: f32 = 0.9;
    pub const DEFAULT_BETA2: f32 = 0.999;
    pub const DEFAULT_EPSILON: f32 = 1e-7;

    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters of the shard.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2` - The decays of the first and second moment estimates.
    /// * `epsilon` - Keeps the denominator of the update away from zero.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            steps: 0,
            moments: vec![Moments::default(); len].into_boxed_slice(),
        }
    }

    /// Creates a new `Adam` optimizer with the default moment decays.
    pub fn with_defaults(len: usize, learning_rate: f32) -> Self {
        Self::new(
            len,
            learning_rate,
            Self::DEFAULT_BETA1,
            Self::DEFAULT_BETA2,
            Self::DEFAULT_EPSILON,
        )
    }

    /// Returns the amount of updates performed so far.
    pub fn steps(&self) -> usize {
        self.steps as usize
    }

    /// The learning rate of the next update once both moment estimates are bias corrected.
    fn corrected_step_size(&self) -> f32 {
        let first = 1. - self.beta1.powi(self.steps);
        let second = 1. - self.beta2.powi(self.steps);
        self.learning_rate * second.sqrt() / first
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.moments.len() {
            return Err(SizeMismatchErr);
        }

        self.steps = self.steps.saturating_add(1);
        let step_size = self.corrected_step_size();
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);

        for ((param, &g), moments) in params.iter_mut().zip(grad).zip(self.moments.iter_mut()) {
            moments.mean = b1 * moments.mean + (1. - b1) * g;
            moments.uncentered_var = b2 * moments.uncentered_var + (1. - b2) * g * g;
            *param -= step_size * moments.mean / (moments.uncentered_var.sqrt() + eps);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate() {
        let mut adam = Adam::with_defaults(2, 0.01);
        let mut params = [1.0, -1.0];

        adam.update_params(&[0.5, -3.0], &mut params).unwrap();

        // On the first step m / sqrt(v) == sign(g) once bias corrected.
        assert!((params[0] - 0.99).abs() < 1e-4);
        assert!((params[1] + 0.99).abs() < 1e-4);
        assert_eq!(adam.steps(), 1);
    }

    #[test]
    fn moments_accumulate_across_calls() {
        let mut adam = Adam::with_defaults(1, 0.1);
        let mut params = [0.0];

        adam.update_params(&[1.0], &mut params).unwrap();
        let after_first = params[0];
        adam.update_params(&[-1.0], &mut params).unwrap();

        // The momentum of the first gradient damps the reversal.
        assert!(params[0] < after_first + 0.1);
        assert!(params[0] > after_first);
    }

    #[test]
    fn size_mismatch_is_reported() {
        let mut adam = Adam::with_defaults(2, 0.1);
        let mut params = [0.0; 2];

        assert!(adam.update_params(&[1.0], &mut params).is_err());
        assert!(adam.update_params(&[1.0; 3], &mut [0.0; 3]).is_err());
        assert_eq!(adam.steps(), 0);
    }
}
