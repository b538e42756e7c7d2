use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use log::trace;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::{
    initialization::ParamGen,
    optimization::{Optimizer, clip_by_global_norm, global_norm},
    storage::{Result, SizeMismatchErr},
};

/// The shared parameter set of a training run together with its optimizer state.
///
/// Only two operations are concurrency sensitive:
/// * `apply` merges a gradient through the optimizer. Calls are serialized by the lock guarding
///   the optimizer state, the optimizer shards are then updated in parallel.
/// * `snapshot`/`pull_params` copy the parameters out. The parameters live behind an `Arc` that
///   `apply` swaps once the whole update is computed, so readers hold the read lock only for the
///   duration of an `Arc` clone and never observe a half applied update. They may observe a
///   slightly stale one.
///
/// Cloning a store is cheap, every clone refers to the same parameters.
#[derive(Debug)]
pub struct ParameterStore<O: Optimizer> {
    nparams: usize,
    shard_size: NonZeroUsize,
    max_grad_norm: Option<f32>,
    params: Arc<RwLock<Arc<[f32]>>>,
    optimizers: Arc<Mutex<Box<[O]>>>,
    version: Arc<AtomicU64>,
}

impl<O: Optimizer> Clone for ParameterStore<O> {
    fn clone(&self) -> Self {
        Self {
            nparams: self.nparams,
            shard_size: self.shard_size,
            max_grad_norm: self.max_grad_norm,
            params: Arc::clone(&self.params),
            optimizers: Arc::clone(&self.optimizers),
            version: Arc::clone(&self.version),
        }
    }
}

impl<O: Optimizer> ParameterStore<O> {
    /// Creates a new `ParameterStore`.
    ///
    /// # Arguments
    /// * `shard_size` - The maximum amount of parameters per optimizer shard.
    /// * `param_gen` - The generator of the initial parameters, drained entirely.
    /// * `optimizer_factory` - Builds the optimizer of a shard given its length.
    ///
    /// # Returns
    /// A new `ParameterStore` instance.
    pub fn new<PG, OF>(shard_size: NonZeroUsize, mut param_gen: PG, mut optimizer_factory: OF) -> Self
    where
        PG: ParamGen,
        OF: FnMut(usize) -> O,
    {
        let mut params = Vec::new();
        let mut optimizers = Vec::new();

        while let Some(shard) = param_gen.sample(shard_size.get()) {
            optimizers.push(optimizer_factory(shard.len()));
            params.extend(shard);
        }

        Self {
            nparams: params.len(),
            shard_size,
            max_grad_norm: None,
            params: Arc::new(RwLock::new(Arc::from(params))),
            optimizers: Arc::new(Mutex::new(optimizers.into_boxed_slice())),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enables gradient clipping by global norm before every update.
    ///
    /// # Arguments
    /// * `max_grad_norm` - The maximum global norm, `None` disables clipping.
    pub fn with_max_grad_norm(mut self, max_grad_norm: Option<f32>) -> Self {
        self.max_grad_norm = max_grad_norm;
        self
    }

    /// Returns the size of the storage.
    ///
    /// # Returns
    /// The amount of parameters in the storage.
    pub fn len(&self) -> usize {
        self.nparams
    }

    pub fn is_empty(&self) -> bool {
        self.nparams == 0
    }

    /// Returns the amount of updates applied so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Takes a deep copy of the current parameters.
    ///
    /// # Returns
    /// An independent buffer, mutating it doesn't affect the store.
    pub fn snapshot(&self) -> Vec<f32> {
        let params = Arc::clone(&self.params.read());
        params.to_vec()
    }

    /// Copies the current parameters into the provided destination buffer.
    ///
    /// # Arguments
    /// * `out` - A mutable slice where the parameters will be copied.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if `out` isn't the same size as the store.
    pub fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        if self.nparams != out.len() {
            return Err(SizeMismatchErr);
        }

        let params = Arc::clone(&self.params.read());
        out.copy_from_slice(&params);
        Ok(())
    }

    /// Performs one optimizer step with the given gradient, which is consumed.
    ///
    /// # Arguments
    /// * `grad` - A flat gradient shaped like the parameters.
    ///
    /// # Returns
    /// The global norm of the gradient before clipping, or a `SizeMismatchErr` if the gradient
    /// doesn't have the length of the store.
    pub fn apply(&self, mut grad: Vec<f32>) -> Result<f32> {
        if self.nparams != grad.len() {
            return Err(SizeMismatchErr);
        }

        let norm = match self.max_grad_norm {
            Some(max_norm) => clip_by_global_norm(&mut grad, max_norm),
            None => global_norm(&grad),
        };

        let mut optimizers = self.optimizers.lock();
        let mut next: Box<[f32]> = Box::from(&**self.params.read());
        let shard_size = self.shard_size.get();

        optimizers
            .par_iter_mut()
            .zip(next.par_chunks_mut(shard_size))
            .zip(grad.par_chunks(shard_size))
            .try_for_each(|((optimizer, params), grad)| optimizer.update_params(grad, params))?;

        *self.params.write() = Arc::from(next);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        drop(optimizers);

        trace!(version = version, grad_norm = norm; "applied gradient");
        Ok(norm)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::{
        initialization::ConstParamGen,
        optimization::{Adam, GradientDescent},
    };

    fn sgd_store(params: usize, shard_size: usize, lr: f32) -> ParameterStore<GradientDescent> {
        let shard_size = NonZeroUsize::new(shard_size).unwrap();
        let param_gen = ConstParamGen::zeros(params);
        ParameterStore::new(shard_size, param_gen, |_| GradientDescent::new(lr))
    }

    fn adam_store(params: usize, shard_size: usize, lr: f32) -> ParameterStore<Adam> {
        let shard_size = NonZeroUsize::new(shard_size).unwrap();
        let param_gen = ConstParamGen::new(0.5, params);
        ParameterStore::new(shard_size, param_gen, |len| Adam::with_defaults(len, lr))
    }

    #[test]
    fn ragged_shards_cover_every_parameter() {
        const PARAMS: usize = 15;

        let store = sgd_store(PARAMS, 8, 1.0);
        store.apply(vec![-1.0; PARAMS]).unwrap();

        assert_eq!(store.snapshot(), vec![1.0; PARAMS]);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn snapshot_is_independent() {
        let store = sgd_store(4, 2, 1.0);

        let mut snapshot = store.snapshot();
        snapshot.fill(42.0);

        assert_eq!(store.snapshot(), vec![0.0; 4]);
    }

    #[test]
    fn size_mismatches_are_errors() {
        let store = sgd_store(4, 2, 1.0);

        assert_eq!(store.apply(vec![1.0; 3]), Err(SizeMismatchErr));
        assert_eq!(store.pull_params(&mut [0.0; 5]), Err(SizeMismatchErr));
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn gradient_is_clipped_by_global_norm() {
        let store = sgd_store(2, 1, 1.0).with_max_grad_norm(Some(1.0));

        let norm = store.apply(vec![-3.0, -4.0]).unwrap();
        let params = store.snapshot();

        assert_eq!(norm, 5.0);
        assert!((params[0] - 0.6).abs() < 1e-6);
        assert!((params[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn update_magnitude_scales_with_learning_rate() {
        let grad = vec![0.3, -0.7, 1.1, -0.2];

        let deltas: Vec<Vec<f32>> = [1e-2, 1e-3]
            .into_iter()
            .map(|lr| {
                let store = adam_store(grad.len(), 2, lr);
                let before = store.snapshot();
                store.apply(grad.clone()).unwrap();
                let after = store.snapshot();

                assert_ne!(before, after);
                before.iter().zip(&after).map(|(b, a)| (a - b).abs()).collect()
            })
            .collect();

        for (large, small) in deltas[0].iter().zip(&deltas[1]) {
            assert!((large / small - 10.0).abs() < 1e-2);
        }
    }

    #[test]
    fn concurrent_applies_are_serializable() {
        const PARAMS: usize = 6;

        let grads: Vec<Vec<f32>> = vec![
            vec![1.0, -2.0, 0.5, 0.1, -0.3, 2.0],
            vec![-0.5, 0.25, 3.0, -1.0, 0.7, -0.2],
            vec![0.2, 0.9, -1.5, 0.4, -2.5, 0.6],
        ];

        let store = adam_store(PARAMS, 1, 0.05);
        thread::scope(|s| {
            for grad in &grads {
                let store = store.clone();
                s.spawn(move || store.apply(grad.clone()).unwrap());
            }
        });
        let concurrent = store.snapshot();

        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        let reachable = orders.iter().any(|order| {
            let serial = adam_store(PARAMS, 1, 0.05);
            for &i in order {
                serial.apply(grads[i].clone()).unwrap();
            }

            serial
                .snapshot()
                .iter()
                .zip(&concurrent)
                .all(|(a, b)| (a - b).abs() < 1e-6)
        });

        assert!(reachable, "no serial ordering explains {concurrent:?}");
        assert_eq!(store.version(), grads.len() as u64);
    }
}
