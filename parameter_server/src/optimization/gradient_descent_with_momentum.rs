use super::Optimizer;
use crate::storage::{Result, SizeMismatchErr};

/// Heavy ball gradient descent, every parameter keeps a velocity that decays by `momentum` and
/// accumulates the incoming gradients.
#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: Box<[f32]>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters of the shard.
    /// * `learning_rate` - Scales the velocity into a parameter update.
    /// * `momentum` - Decay of the velocity between updates, in `[0, 1)`.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance with a resting velocity.
    pub fn new(len: usize, learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.velocity.len() {
            return Err(SizeMismatchErr);
        }

        for ((param, &g), velocity) in params.iter_mut().zip(grad).zip(self.velocity.iter_mut()) {
            *velocity = self.momentum * *velocity + g;
            *param -= self.learning_rate * *velocity;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_carries_over() {
        let mut optimizer = GradientDescentWithMomentum::new(1, 1.0, 0.5);
        let mut params = [0.0];

        optimizer.update_params(&[1.0], &mut params).unwrap();
        assert_eq!(params, [-1.0]);

        optimizer.update_params(&[0.0], &mut params).unwrap();
        assert_eq!(params, [-1.5]);
    }

    #[test]
    fn shard_length_is_enforced() {
        let mut optimizer = GradientDescentWithMomentum::new(2, 0.1, 0.9);
        assert!(optimizer.update_params(&[1.0; 3], &mut [0.0; 3]).is_err());
    }
}
