/// Computes the euclidean norm of the whole gradient, every tensor flattened together.
pub fn global_norm(grad: &[f32]) -> f32 {
    grad.iter().map(|g| g * g).sum::<f32>().sqrt()
}

/// Rescales `grad` in place so that its global norm is at most `max_norm`.
///
/// Follows `clip_by_global_norm` semantics: `grad * max_norm / max(norm, max_norm)`. A non finite
/// norm leaves the gradient untouched so the divergence stays visible upstream.
///
/// # Arguments
/// * `grad` - The flat gradient to clip.
/// * `max_norm` - The maximum allowed global norm.
///
/// # Returns
/// The global norm before clipping.
pub fn clip_by_global_norm(grad: &mut [f32], max_norm: f32) -> f32 {
    let norm = global_norm(grad);

    if norm.is_finite() && norm > max_norm {
        let scale = max_norm / norm;
        grad.iter_mut().for_each(|g| *g *= scale);
    }

    norm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_gradients_are_rescaled() {
        let mut grad = [3.0, 4.0];
        let norm = clip_by_global_norm(&mut grad, 1.0);

        assert_eq!(norm, 5.0);
        assert!((global_norm(&grad) - 1.0).abs() < 1e-6);
        assert!((grad[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn small_gradients_are_untouched() {
        let mut grad = [0.3, 0.4];
        clip_by_global_norm(&mut grad, 1.0);
        assert_eq!(grad, [0.3, 0.4]);
    }
}
