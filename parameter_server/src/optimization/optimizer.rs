use crate::storage::Result;

/// Defines the strategy for updating model parameters based on a gradient.
///
/// Implementations may keep per-parameter state (moments, velocities), which is why updates take
/// `&mut self`: the store guarantees a single updater at a time.
pub trait Optimizer: Send {
    /// Updates the provided slice of parameters using the given gradient.
    ///
    /// # Arguments
    /// * `grad` - A reference to the model's gradient.
    /// * `params` - The parameters to update.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `params`.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}
