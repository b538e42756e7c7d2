use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use machine_learning::ParamLayout;
use parameter_server::{
    ParameterStore,
    initialization::{ChainedParamGen, ConstParamGen, ParamGen, RandParamGen},
    optimization::Optimizer,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::error::Result;

/// Returns the seed of a run, drawing one from the os when none is configured.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| rand::rng().random())
}

/// Builds the generator of the initial parameters of a model.
///
/// Every matrix gets a Glorot uniform kernel and every other tensor is zeroed. All random
/// tensors share one rng so a given seed always yields the same parameters.
///
/// # Arguments
/// * `layout` - The layout of the model's parameters.
/// * `seed` - The seed of the shared rng.
///
/// # Returns
/// A generator producing the parameters in layout order.
pub fn param_gen(layout: &ParamLayout, seed: u64) -> Result<ChainedParamGen> {
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(seed)));
    let mut param_gens: Vec<Box<dyn ParamGen>> = Vec::with_capacity(layout.tensors().len());

    for tensor in layout.tensors() {
        let param_gen: Box<dyn ParamGen> = match *tensor.shape() {
            [fan_in, fan_out] => Box::new(RandParamGen::xavier_uniform(
                Rc::clone(&rng),
                fan_in,
                fan_out,
            )?),
            _ => Box::new(ConstParamGen::zeros(tensor.len())),
        };

        param_gens.push(param_gen);
    }

    Ok(ChainedParamGen::new(param_gens))
}

/// Creates the parameter store of a run.
///
/// # Arguments
/// * `layout` - The layout of the model's parameters.
/// * `seed` - The seed of the initial parameters.
/// * `shard_size` - The maximum amount of parameters per optimizer shard.
/// * `max_grad_norm` - The gradient clipping threshold, if any.
/// * `optimizer_factory` - Builds the optimizer of a shard given its length.
///
/// # Returns
/// A store holding freshly initialized parameters.
pub fn build_store<O, OF>(
    layout: &ParamLayout,
    seed: u64,
    shard_size: NonZeroUsize,
    max_grad_norm: Option<f32>,
    optimizer_factory: OF,
) -> Result<ParameterStore<O>>
where
    O: Optimizer,
    OF: FnMut(usize) -> O,
{
    let param_gen = param_gen(layout, seed)?;
    let store = ParameterStore::new(shard_size, param_gen, optimizer_factory);
    Ok(store.with_max_grad_norm(max_grad_norm))
}
