use ndarray::prelude::*;

/// Turns every row of `logits` into a probability distribution, in place.
///
/// The row maximum is subtracted before exponentiating so large logits don't overflow.
///
/// # Arguments
/// * `logits` - A batch of unnormalized scores, one row per sample.
pub fn softmax(mut logits: ArrayViewMut2<f32>) {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
}

/// Maps a gradient with respect to the softmax output into one with respect to its logits.
///
/// # Arguments
/// * `probs` - The softmax output of the forward pass.
/// * `d_probs` - The gradient of the loss with respect to `probs`.
///
/// # Returns
/// The gradient of the loss with respect to the logits.
pub fn softmax_backward(probs: ArrayView2<f32>, d_probs: ArrayView2<f32>) -> Array2<f32> {
    let mut d_logits = Array2::zeros(probs.raw_dim());

    for ((mut out, p), g) in d_logits
        .rows_mut()
        .into_iter()
        .zip(probs.rows())
        .zip(d_probs.rows())
    {
        let dot = p.dot(&g);
        out.zip_mut_with(&p, |o, &p| *o = p);
        out.zip_mut_with(&g, |o, &g| *o *= g - dot);
    }

    d_logits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_sum_to_one() {
        let mut logits = array![[1., 2., 3.], [1000., 1000., -1000.]];
        softmax(logits.view_mut());

        for row in logits.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
        assert!((logits[[1, 0]] - 0.5).abs() < 1e-6);
        assert_eq!(logits[[1, 2]], 0.);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let logits = array![[0.3, -1.2, 0.8]];
        let weights = array![[1.5, -0.5, 2.0]];

        let loss = |logits: &Array2<f32>| {
            let mut probs = logits.clone();
            softmax(probs.view_mut());
            (&probs * &weights).sum()
        };

        let mut probs = logits.clone();
        softmax(probs.view_mut());
        let d_logits = softmax_backward(probs.view(), weights.view());

        let h = 1e-3;
        for j in 0..3 {
            let mut plus = logits.clone();
            let mut minus = logits.clone();
            plus[[0, j]] += h;
            minus[[0, j]] -= h;

            let numeric = (loss(&plus) - loss(&minus)) / (2. * h);
            assert!((numeric - d_logits[[0, j]]).abs() < 1e-3);
        }
    }
}
