use std::{fmt::Write, ops::Range, sync::Arc};

use ndarray::prelude::*;
use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
};

use super::{
    activations::{ActFn, softmax, softmax_backward},
    layers::{Dense, DenseCache},
    layout::ParamLayout,
};
use crate::{MlErr, Result};

const LAYERS: [&str; 4] = ["policy_hidden", "policy_head", "value_hidden", "value_head"];

/// The output of evaluating the model on a batch of states.
#[derive(Debug, Clone)]
pub struct Inference {
    /// One action distribution per state.
    pub probs: Array2<f32>,
    /// One value estimate per state.
    pub values: Array1<f32>,
}

/// A forward pass with every intermediate result needed to backpropagate through it.
#[derive(Debug, Clone)]
pub struct Tape {
    inference: Inference,
    caches: [DenseCache; 4],
}

impl Tape {
    pub fn inference(&self) -> &Inference {
        &self.inference
    }

    pub fn probs(&self) -> ArrayView2<'_, f32> {
        self.inference.probs.view()
    }

    pub fn values(&self) -> ArrayView1<'_, f32> {
        self.inference.values.view()
    }
}

/// Two independent dense networks over the same state: a policy producing a softmax distribution
/// over the actions and a critic producing a scalar value estimate.
///
/// The model doesn't own its parameters, every evaluation takes them as a flat slice laid out as
/// described by `layout`.
#[derive(Debug, Clone)]
pub struct ActorCriticModel {
    state_dim: usize,
    num_actions: usize,
    hidden_units: usize,
    layout: Arc<ParamLayout>,
    layers: [Dense; 4],
    ranges: [Range<usize>; 4],
}

impl ActorCriticModel {
    /// Creates a new `ActorCriticModel`.
    ///
    /// # Arguments
    /// * `state_dim` - The amount of features of a state.
    /// * `num_actions` - The amount of discrete actions.
    /// * `hidden_units` - The width of both hidden layers.
    ///
    /// # Returns
    /// A new `ActorCriticModel` instance.
    pub fn new(state_dim: usize, num_actions: usize, hidden_units: usize) -> Self {
        let layers = [
            Dense::new((state_dim, hidden_units), Some(ActFn::relu())),
            Dense::new((hidden_units, num_actions), None),
            Dense::new((state_dim, hidden_units), Some(ActFn::relu())),
            Dense::new((hidden_units, 1), None),
        ];

        let mut layout = ParamLayout::new();
        let mut ranges: [Range<usize>; 4] = Default::default();

        for ((name, layer), range) in LAYERS.iter().zip(&layers).zip(&mut ranges) {
            let (fan_in, fan_out) = layer.dim();
            let start = layout.len();
            layout.push(format!("{name}.weight"), vec![fan_in, fan_out]);
            layout.push(format!("{name}.bias"), vec![fan_out]);
            *range = start..layout.len();
        }

        Self {
            state_dim,
            num_actions,
            hidden_units,
            layout: Arc::new(layout),
            layers,
            ranges,
        }
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn hidden_units(&self) -> usize {
        self.hidden_units
    }

    pub fn layout(&self) -> &Arc<ParamLayout> {
        &self.layout
    }

    /// Returns the amount of parameters of the model.
    pub fn size(&self) -> usize {
        self.layout.len()
    }

    /// Evaluates the policy and the value function on a batch of states.
    ///
    /// # Arguments
    /// * `params` - The flat parameters of the model.
    /// * `states` - The states, one row per state.
    ///
    /// # Returns
    /// The action distributions and value estimates, or a size mismatch error if either argument
    /// doesn't agree with the model's dimensions.
    pub fn infer(&self, params: &[f32], states: ArrayView2<f32>) -> Result<Inference> {
        self.check_inputs(params, states)?;
        let [ph, pl, vh, vl] = self.split_params(params);
        let [phl, pll, vhl, vll] = &self.layers;

        let hidden = phl.infer(ph, states)?;
        let mut probs = pll.infer(pl, hidden.view())?;
        softmax(probs.view_mut());

        let hidden = vhl.infer(vh, states)?;
        let values = vll.infer(vl, hidden.view())?.column(0).to_owned();

        Ok(Inference { probs, values })
    }

    /// Evaluates a single state.
    ///
    /// # Arguments
    /// * `params` - The flat parameters of the model.
    /// * `state` - The features of the state.
    ///
    /// # Returns
    /// The action distribution and the value estimate of the state.
    pub fn infer_one(&self, params: &[f32], state: &[f32]) -> Result<(Vec<f32>, f32)> {
        let states = ArrayView2::from_shape((1, state.len()), state)?;
        let Inference { probs, values } = self.infer(params, states)?;
        Ok((probs.row(0).to_vec(), values[0]))
    }

    /// Like `infer`, but records what `backward` needs.
    ///
    /// # Arguments
    /// * `params` - The flat parameters of the model.
    /// * `states` - The states, one row per state.
    ///
    /// # Returns
    /// The tape of this forward pass.
    pub fn forward(&self, params: &[f32], states: ArrayView2<f32>) -> Result<Tape> {
        self.check_inputs(params, states)?;
        let [ph, pl, vh, vl] = self.split_params(params);
        let [phl, pll, vhl, vll] = &self.layers;

        let (hidden, ph_cache) = phl.forward(ph, states)?;
        let (mut probs, pl_cache) = pll.forward(pl, hidden.view())?;
        softmax(probs.view_mut());

        let (hidden, vh_cache) = vhl.forward(vh, states)?;
        let (values, vl_cache) = vll.forward(vl, hidden.view())?;
        let values = values.column(0).to_owned();

        Ok(Tape {
            inference: Inference { probs, values },
            caches: [ph_cache, pl_cache, vh_cache, vl_cache],
        })
    }

    /// Accumulates into `grad` the gradient of a loss given its derivatives with respect to the
    /// action probabilities and the value estimates.
    ///
    /// # Arguments
    /// * `params` - The parameters used to record `tape`.
    /// * `tape` - The tape of the forward pass.
    /// * `d_probs` - The derivative of the loss with respect to the action probabilities.
    /// * `d_values` - The derivative of the loss with respect to the value estimates.
    /// * `grad` - The flat gradient, added to rather than overwritten.
    pub fn backward(
        &self,
        params: &[f32],
        tape: &Tape,
        d_probs: ArrayView2<f32>,
        d_values: ArrayView1<f32>,
        grad: &mut [f32],
    ) -> Result<()> {
        if grad.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: self.size(),
            });
        }

        let [ph, pl, vh, vl] = self.split_params(params);
        let [gph, gpl, gvh, gvl] = self.split_grad(grad);
        let [phl, pll, vhl, vll] = &self.layers;
        let [ph_cache, pl_cache, vh_cache, vl_cache] = &tape.caches;

        let d_logits = softmax_backward(tape.probs(), d_probs);
        let d_hidden = pll.backward(pl, gpl, pl_cache, d_logits)?;
        phl.backward(ph, gph, ph_cache, d_hidden)?;

        let d_values = d_values.to_owned().insert_axis(Axis(1));
        let d_hidden = vll.backward(vl, gvl, vl_cache, d_values)?;
        vhl.backward(vh, gvh, vh_cache, d_hidden)?;

        Ok(())
    }

    /// Samples an action from a distribution.
    ///
    /// Non finite or negative weights are treated as zero, a distribution with no positive
    /// weight falls back to the greedy action.
    ///
    /// # Arguments
    /// * `probs` - The probability of each action.
    /// * `rng` - The random number generator to sample with.
    ///
    /// # Returns
    /// The index of the sampled action.
    pub fn sample_action<R: Rng + ?Sized>(probs: ArrayView1<f32>, rng: &mut R) -> usize {
        let weights = probs
            .iter()
            .map(|&p| if p.is_finite() { p.max(0.) } else { 0. });

        match WeightedIndex::new(weights) {
            Ok(dist) => dist.sample(rng),
            Err(_) => Self::greedy_action(probs),
        }
    }

    /// Returns the most likely action, the first one on ties.
    pub fn greedy_action(probs: ArrayView1<f32>) -> usize {
        probs
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(best, max), (i, &p)| {
                if p > max { (i, p) } else { (best, max) }
            })
            .0
    }

    /// Renders a table with every layer, its output shape and its parameter count.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let rule = "-".repeat(64);

        let _ = writeln!(out, "{:<28}{:<20}{:>16}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{rule}");

        for (name, layer) in LAYERS.iter().zip(&self.layers) {
            let kind = match layer.act_fn() {
                Some(act_fn) => format!("{name} (Dense, {})", act_fn.name()),
                None => format!("{name} (Dense)"),
            };
            let shape = format!("(None, {})", layer.dim().1);
            let _ = writeln!(out, "{kind:<28}{shape:<20}{:>16}", layer.size());
        }

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Total params: {}", self.size());
        out
    }

    fn check_inputs(&self, params: &[f32], states: ArrayView2<f32>) -> Result<()> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        if states.ncols() != self.state_dim {
            return Err(MlErr::SizeMismatch {
                what: "state features",
                got: states.ncols(),
                expected: self.state_dim,
            });
        }

        Ok(())
    }

    fn split_params<'a>(&self, params: &'a [f32]) -> [&'a [f32]; 4] {
        self.ranges.clone().map(|range| &params[range])
    }

    fn split_grad<'a>(&self, grad: &'a mut [f32]) -> [&'a mut [f32]; 4] {
        let (ph, rest) = grad.split_at_mut(self.ranges[1].start);
        let (pl, rest) = rest.split_at_mut(self.ranges[1].len());
        let (vh, vl) = rest.split_at_mut(self.ranges[2].len());
        [ph, pl, vh, vl]
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn params(model: &ActorCriticModel, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..model.size()).map(|_| rng.random_range(-0.5..0.5)).collect()
    }

    #[test]
    fn layout_names_every_tensor() {
        let model = ActorCriticModel::new(4, 2, 8);
        let names: Vec<_> = model.layout().tensors().iter().map(|t| t.name()).collect();

        assert_eq!(
            names,
            [
                "policy_hidden.weight",
                "policy_hidden.bias",
                "policy_head.weight",
                "policy_head.bias",
                "value_hidden.weight",
                "value_hidden.bias",
                "value_head.weight",
                "value_head.bias",
            ]
        );
        assert_eq!(model.size(), (4 * 8 + 8) + (8 * 2 + 2) + (4 * 8 + 8) + (8 + 1));
    }

    #[test]
    fn probabilities_are_distributions() {
        let model = ActorCriticModel::new(3, 4, 16);
        let params = params(&model, 7);
        let states = array![[0.1, -2.0, 3.0], [10.0, 10.0, -10.0]];

        let inference = model.infer(&params, states.view()).unwrap();

        assert_eq!(inference.probs.dim(), (2, 4));
        assert_eq!(inference.values.len(), 2);
        for row in inference.probs.rows() {
            assert!((row.sum() - 1.).abs() < 1e-5);
            assert!(row.iter().all(|&p| (0. ..=1.).contains(&p)));
        }
    }

    #[test]
    fn infer_and_forward_agree() {
        let model = ActorCriticModel::new(3, 2, 5);
        let params = params(&model, 3);
        let states = array![[0.5, 0.5, -1.0]];

        let inference = model.infer(&params, states.view()).unwrap();
        let tape = model.forward(&params, states.view()).unwrap();

        assert_eq!(inference.probs, tape.probs());
        assert_eq!(inference.values, tape.values());
    }

    #[test]
    fn mismatched_inputs_are_errors() {
        let model = ActorCriticModel::new(3, 2, 5);
        let params = params(&model, 3);

        let wrong_states = array![[1.0, 2.0]];
        assert!(matches!(
            model.infer(&params, wrong_states.view()),
            Err(MlErr::SizeMismatch { what: "state features", got: 2, expected: 3 })
        ));

        let states = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            model.infer(&params[1..], states.view()),
            Err(MlErr::SizeMismatch { what: "parameters", .. })
        ));
    }

    #[test]
    fn greedy_action_takes_the_first_maximum() {
        assert_eq!(ActorCriticModel::greedy_action(array![0.2, 0.4, 0.4].view()), 1);
    }

    #[test]
    fn sampling_respects_zero_probabilities() {
        let mut rng = StdRng::seed_from_u64(0);
        let probs = array![0.0, 1.0, f32::NAN];

        for _ in 0..100 {
            assert_eq!(ActorCriticModel::sample_action(probs.view(), &mut rng), 1);
        }

        let degenerate = array![f32::NAN, f32::NAN];
        assert_eq!(ActorCriticModel::sample_action(degenerate.view(), &mut rng), 0);
    }

    #[test]
    fn describe_lists_every_layer() {
        let model = ActorCriticModel::new(4, 2, 100);
        let table = model.describe();

        for name in LAYERS {
            assert!(table.contains(name));
        }
        assert!(table.contains(&format!("Total params: {}", model.size())));
    }
}
