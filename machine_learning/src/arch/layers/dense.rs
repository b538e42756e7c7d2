use ndarray::{linalg, prelude::*};

use crate::{MlErr, Result, arch::activations::ActFn};

/// A fully connected layer reading its weights and biases from a flat parameter slice.
///
/// The layer holds no parameters itself, only the shape it imposes on them, so the same layer
/// can be evaluated against any copy of the parameters.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,
}

/// The values of a forward pass a later backward pass needs.
#[derive(Clone, Debug)]
pub struct DenseCache {
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The input and output widths.
    /// * `act_fn` - The activation applied to the output, if any.
    ///
    /// # Returns
    /// A new `Dense` instance.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
        }
    }

    /// Returns the size of this layer.
    ///
    /// # Returns
    /// The amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn act_fn(&self) -> Option<&ActFn> {
        self.act_fn.as_ref()
    }

    /// Evaluates the layer without keeping anything for a backward pass.
    ///
    /// # Arguments
    /// * `params` - The parameters of this layer, weights first.
    /// * `x` - The input batch, one row per sample.
    ///
    /// # Returns
    /// The activated output batch.
    pub fn infer(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let z = self.pre_activation(params, x)?;
        Ok(self.activate(z))
    }

    /// Evaluates the layer and keeps its input and pre-activation for `backward`.
    ///
    /// # Arguments
    /// * `params` - The parameters of this layer, weights first.
    /// * `x` - The input batch, one row per sample.
    ///
    /// # Returns
    /// The activated output batch and the cache of this pass.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<(Array2<f32>, DenseCache)> {
        let z = self.pre_activation(params, x)?;
        let a = self.activate(z.clone());
        let cache = DenseCache { x: x.to_owned(), z };
        Ok((a, cache))
    }

    /// Accumulates this layer's gradient and propagates the delta to its input.
    ///
    /// # Arguments
    /// * `params` - The parameters used in the forward pass.
    /// * `grad` - This layer's slice of the gradient, added to rather than overwritten.
    /// * `cache` - The cache returned by `forward`.
    /// * `d` - The gradient of the loss with respect to this layer's output.
    ///
    /// # Returns
    /// The gradient of the loss with respect to this layer's input.
    pub fn backward(
        &self,
        params: &[f32],
        grad: &mut [f32],
        cache: &DenseCache,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if d.dim() != cache.z.dim() {
            return Err(MlErr::SizeMismatch {
                what: "layer output delta",
                got: d.len(),
                expected: cache.z.len(),
            });
        }

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&cache.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &cache.x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));

        let (w, _) = self.view_params(params)?;
        let mut dx = Array2::zeros((d.nrows(), w.nrows()));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);

        Ok(dx)
    }

    fn pre_activation(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "layer input",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;

        let mut z = Array2::zeros((x.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut z);
        z += &b;

        Ok(z)
    }

    fn activate(&self, mut z: Array2<f32>) -> Array2<f32> {
        if let Some(act_fn) = &self.act_fn {
            z.mapv_inplace(|z| act_fn.f(z));
        }

        z
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        if got != self.size {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected: self.size,
            });
        }

        Ok(())
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    ///
    /// # Arguments
    /// * `grad` - A gradient slice.
    ///
    /// # Returns
    /// A tuple containing the delta weights and delta biases.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len("layer gradient", grad.len())?;
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw)?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw)?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `params` - A slice of parameters.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    fn view_params<'a>(
        &self,
        params: &'a [f32],
    ) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len("layer parameters", params.len())?;
        let w_size = self.size - self.dim.1;
        let (w_raw, b_raw) = params.split_at(w_size);
        let weights = ArrayView2::from_shape(self.dim, w_raw)?;
        let biases = ArrayView1::from_shape(self.dim.1, b_raw)?;
        Ok((weights, biases))
    }
}
