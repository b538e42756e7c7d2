use log::warn;
use ndarray::prelude::*;

use super::{ReturnConvention, discounted_returns};
use crate::{ActorCriticModel, Inference, MlErr, Result, Trajectory};

/// The smallest probability fed to a logarithm.
pub const PROB_CLAMP_MIN: f32 = 1e-6;
/// The largest probability fed to a logarithm.
pub const PROB_CLAMP_MAX: f32 = 1. - 1e-6;

/// The hyperparameters of the actor-critic objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossConfig {
    pub gamma: f32,
    pub clip_range: f32,
    pub value_weight: f32,
    pub entropy_coef: f32,
    pub convention: ReturnConvention,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            clip_range: 0.2,
            value_weight: 0.5,
            entropy_coef: 0.01,
            convention: ReturnConvention::Accumulated,
        }
    }
}

/// The terms of one loss evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossBreakdown {
    /// Mean clipped surrogate term.
    pub policy: f32,
    /// Mean clipped squared error of the value estimates.
    pub value: f32,
    /// Entropy of the policy, summed over steps and actions.
    pub entropy: f32,
    /// `policy + value_weight * value - entropy_coef * entropy`.
    pub total: f32,
    pub mean_ratio: f32,
    /// Fraction of steps whose ratio fell outside the clip interval.
    pub clip_fraction: f32,
    pub invalid_probabilities: usize,
}

/// Derivatives of the total loss with respect to the model outputs.
struct OutputGrad {
    probs: Array2<f32>,
    values: Array1<f32>,
}

/// Evaluates the actor-critic objective of a trajectory and its gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossEngine {
    config: LossConfig,
}

impl LossEngine {
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Computes the loss of a trajectory under the current parameters.
    ///
    /// # Arguments
    /// * `model` - The model the trajectory was collected with.
    /// * `params` - The current parameters of the model.
    /// * `trajectory` - The rollout window to evaluate.
    /// * `bootstrap_value` - The value estimate of the state following the trajectory.
    /// * `is_terminal` - Whether the trajectory ended the episode, the bootstrap is ignored then.
    ///
    /// # Returns
    /// The breakdown of the loss.
    pub fn compute_loss(
        &self,
        model: &ActorCriticModel,
        params: &[f32],
        trajectory: &Trajectory,
        bootstrap_value: f32,
        is_terminal: bool,
    ) -> Result<LossBreakdown> {
        if trajectory.is_empty() {
            return Err(MlErr::EmptyTrajectory);
        }

        let inference = model.infer(params, trajectory.states()?)?;
        let (breakdown, _) = self.evaluate(trajectory, &inference, bootstrap_value, is_terminal)?;
        Ok(breakdown)
    }

    /// Computes the loss of a trajectory and accumulates its gradient.
    ///
    /// # Arguments
    /// * `model` - The model the trajectory was collected with.
    /// * `params` - The current parameters of the model.
    /// * `trajectory` - The rollout window to evaluate.
    /// * `bootstrap_value` - The value estimate of the state following the trajectory.
    /// * `is_terminal` - Whether the trajectory ended the episode, the bootstrap is ignored then.
    /// * `grad` - The flat gradient, added to rather than overwritten.
    ///
    /// # Returns
    /// The breakdown of the loss.
    pub fn backward(
        &self,
        model: &ActorCriticModel,
        params: &[f32],
        trajectory: &Trajectory,
        bootstrap_value: f32,
        is_terminal: bool,
        grad: &mut [f32],
    ) -> Result<LossBreakdown> {
        if trajectory.is_empty() {
            return Err(MlErr::EmptyTrajectory);
        }

        let tape = model.forward(params, trajectory.states()?)?;
        let (breakdown, output_grad) =
            self.evaluate(trajectory, tape.inference(), bootstrap_value, is_terminal)?;

        model.backward(
            params,
            &tape,
            output_grad.probs.view(),
            output_grad.values.view(),
            grad,
        )?;

        Ok(breakdown)
    }

    fn evaluate(
        &self,
        trajectory: &Trajectory,
        inference: &Inference,
        bootstrap_value: f32,
        is_terminal: bool,
    ) -> Result<(LossBreakdown, OutputGrad)> {
        let LossConfig {
            gamma,
            clip_range,
            value_weight,
            entropy_coef,
            convention,
        } = self.config;

        let n = trajectory.len();
        let inv_n = 1. / n as f32;
        let bootstrap = if is_terminal { 0. } else { bootstrap_value };
        let returns = discounted_returns(trajectory.rewards(), bootstrap, gamma, convention);
        let behavior_probs = trajectory.behavior_probs()?;
        let behavior_values = trajectory.behavior_values();

        let mut out = OutputGrad {
            probs: Array2::zeros(inference.probs.raw_dim()),
            values: Array1::zeros(n),
        };
        let mut breakdown = LossBreakdown::default();
        let mut clipped_steps = 0;

        for (t, &action) in trajectory.actions().iter().enumerate() {
            let probs = inference.probs.row(t);
            let value = inference.values[t];
            let ret = returns[t];

            for (j, (&p, d)) in probs.iter().zip(out.probs.row_mut(t)).enumerate() {
                let (c, passes) = clamp_prob(p);
                if let Err(e) = check_prob(t, j, p) {
                    warn!("{e}, clamping");
                    breakdown.invalid_probabilities += 1;
                }

                breakdown.entropy -= c * c.ln();
                if passes {
                    *d += entropy_coef * (c.ln() + 1.);
                }
            }

            let behavior_p = behavior_probs[[t, action]];
            if let Err(e) = check_prob(t, action, behavior_p) {
                warn!("behavior {e}, clamping");
                breakdown.invalid_probabilities += 1;
            }

            let (p, passes) = clamp_prob(probs[action]);
            let (behavior_p, _) = clamp_prob(behavior_p);
            let ratio = (p.ln() - behavior_p.ln()).exp();
            let clipped_ratio = ratio.clamp(1. - clip_range, 1. + clip_range);
            let advantage = ret - value;

            if ratio != clipped_ratio {
                clipped_steps += 1;
            }
            breakdown.mean_ratio += ratio;

            // The clipped branch only wins outside the clip interval, where it's flat in the ratio.
            let unclipped = -advantage * ratio;
            let clipped = -advantage * clipped_ratio;
            let (term, d_ratio, d_advantage) = if unclipped >= clipped {
                (unclipped, -advantage, -ratio)
            } else {
                (clipped, 0., -clipped_ratio)
            };

            breakdown.policy += term;
            if passes {
                out.probs[[t, action]] += inv_n * d_ratio * ratio / p;
            }
            out.values[t] -= inv_n * d_advantage;

            let delta = value - behavior_values[t];
            let unclipped = (ret - value).powi(2);
            let clipped_value = behavior_values[t] + delta.clamp(-clip_range, clip_range);
            let clipped = (ret - clipped_value).powi(2);

            // Both terms coincide inside the clip interval, outside it the clipped one is flat.
            let (term, d_value) = if delta.abs() <= clip_range || unclipped >= clipped {
                (unclipped, -2. * (ret - value))
            } else {
                (clipped, 0.)
            };

            breakdown.value += term;
            out.values[t] += value_weight * inv_n * d_value;
        }

        breakdown.policy *= inv_n;
        breakdown.value *= inv_n;
        breakdown.mean_ratio *= inv_n;
        breakdown.clip_fraction = clipped_steps as f32 * inv_n;
        breakdown.total =
            breakdown.policy + value_weight * breakdown.value - entropy_coef * breakdown.entropy;

        Ok((breakdown, out))
    }
}

/// Clamps a probability into the range a logarithm is taken of.
///
/// # Returns
/// The clamped value and whether the derivative passes through the clamp.
fn clamp_prob(p: f32) -> (f32, bool) {
    if !p.is_finite() {
        return (PROB_CLAMP_MIN, false);
    }

    (
        p.clamp(PROB_CLAMP_MIN, PROB_CLAMP_MAX),
        (PROB_CLAMP_MIN..=PROB_CLAMP_MAX).contains(&p),
    )
}

fn check_prob(step: usize, action: usize, value: f32) -> Result<()> {
    if !value.is_finite() || !(0. ..=1.).contains(&value) {
        return Err(MlErr::InvalidProbability {
            step,
            action,
            value,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::trajectory::Step;

    const STATE_DIM: usize = 3;
    const ACTIONS: usize = 2;

    fn setup(seed: u64) -> (ActorCriticModel, Vec<f32>) {
        let model = ActorCriticModel::new(STATE_DIM, ACTIONS, 8);
        let mut rng = StdRng::seed_from_u64(seed);
        let params = (0..model.size())
            .map(|_| rng.random_range(-0.5..0.5))
            .collect();
        (model, params)
    }

    /// Collects a trajectory with the policy given by `params`, shifting the recorded behavior
    /// values by `value_shift`.
    fn rollout(
        model: &ActorCriticModel,
        params: &[f32],
        len: usize,
        value_shift: f32,
        seed: u64,
    ) -> Trajectory {
        let mut rng = StdRng::seed_from_u64(seed);
        let states = Array2::from_shape_fn((len, STATE_DIM), |_| rng.random_range(-1. ..1.));
        let inference = model.infer(params, states.view()).unwrap();

        let mut trajectory = Trajectory::new(len, STATE_DIM, ACTIONS);
        for t in 0..len {
            let probs = inference.probs.row(t).to_vec();
            let action = ActorCriticModel::sample_action(inference.probs.row(t), &mut rng);
            let state = states.row(t).to_vec();

            trajectory
                .push(Step {
                    state: &state,
                    action,
                    reward: rng.random_range(0. ..2.),
                    probs: &probs,
                    value: inference.values[t] + value_shift,
                })
                .unwrap();
        }

        trajectory
    }

    #[test]
    fn ratio_is_one_at_the_behavior_snapshot() {
        let (model, params) = setup(1);
        let trajectory = rollout(&model, &params, 6, 0., 2);
        let engine = LossEngine::default();

        let loss = engine
            .compute_loss(&model, &params, &trajectory, 0.5, false)
            .unwrap();

        let inference = model.infer(&params, trajectory.states().unwrap()).unwrap();
        let returns = discounted_returns(
            trajectory.rewards(),
            0.5,
            0.99,
            ReturnConvention::Accumulated,
        );
        let mean_advantage = returns
            .iter()
            .zip(&inference.values)
            .map(|(r, v)| r - v)
            .sum::<f32>()
            / 6.;

        assert!((loss.mean_ratio - 1.).abs() < 1e-6);
        assert_eq!(loss.clip_fraction, 0.);
        assert!((loss.policy + mean_advantage).abs() < 1e-5);
    }

    #[test]
    fn clipped_value_loss_bounds_the_squared_advantage() {
        let (model, params) = setup(3);
        let engine = LossEngine::default();

        for shift in [-1., -0.1, 0., 0.1, 1.] {
            let trajectory = rollout(&model, &params, 5, shift, 4);
            let loss = engine
                .compute_loss(&model, &params, &trajectory, 0., true)
                .unwrap();

            let inference = model.infer(&params, trajectory.states().unwrap()).unwrap();
            let returns =
                discounted_returns(trajectory.rewards(), 0., 0.99, ReturnConvention::Accumulated);
            let unclipped = returns
                .iter()
                .zip(&inference.values)
                .map(|(r, v)| (r - v).powi(2))
                .sum::<f32>()
                / 5.;

            assert!(loss.value >= unclipped - 1e-6);
        }
    }

    #[test]
    fn terminal_trajectories_ignore_the_bootstrap() {
        let (model, params) = setup(5);
        let trajectory = rollout(&model, &params, 4, 0., 6);
        let engine = LossEngine::default();

        let a = engine
            .compute_loss(&model, &params, &trajectory, 100., true)
            .unwrap();
        let b = engine
            .compute_loss(&model, &params, &trajectory, 0., true)
            .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn empty_trajectories_are_errors() {
        let (model, params) = setup(5);
        let trajectory = Trajectory::new(4, STATE_DIM, ACTIONS);

        assert!(matches!(
            LossEngine::default().compute_loss(&model, &params, &trajectory, 0., true),
            Err(MlErr::EmptyTrajectory)
        ));
    }

    #[test]
    fn invalid_behavior_probabilities_are_clamped() {
        let (model, params) = setup(7);
        let mut trajectory = Trajectory::new(2, STATE_DIM, ACTIONS);

        for _ in 0..2 {
            trajectory
                .push(Step {
                    state: &[0.1, 0.2, 0.3],
                    action: 0,
                    reward: 1.,
                    probs: &[f32::NAN, 1.5],
                    value: 0.,
                })
                .unwrap();
        }

        let loss = LossEngine::default()
            .compute_loss(&model, &params, &trajectory, 0., true)
            .unwrap();

        assert_eq!(loss.invalid_probabilities, 2);
        assert!(loss.total.is_finite());
        assert_eq!(loss.clip_fraction, 1.);
    }

    #[test]
    fn head_bias_gradients_match_finite_differences() {
        let (model, params) = setup(11);
        let trajectory = rollout(&model, &params, 8, 0., 12);
        let engine = LossEngine::new(LossConfig {
            entropy_coef: 0.05,
            ..Default::default()
        });

        let mut grad = vec![0.; model.size()];
        engine
            .backward(&model, &params, &trajectory, 0.7, false, &mut grad)
            .unwrap();

        let loss_at = |params: &[f32]| {
            engine
                .compute_loss(&model, params, &trajectory, 0.7, false)
                .unwrap()
                .total
        };

        let h = 1e-2;
        for name in ["policy_head.bias", "value_head.bias"] {
            for i in model.layout().get(name).unwrap().range() {
                let mut plus = params.clone();
                let mut minus = params.clone();
                plus[i] += h;
                minus[i] -= h;

                let numeric = (loss_at(&plus) - loss_at(&minus)) / (2. * h);
                let tolerance = 2e-3 + 2e-2 * grad[i].abs();
                assert!(
                    (numeric - grad[i]).abs() < tolerance,
                    "{name}[{i}]: numeric {numeric} vs analytic {}",
                    grad[i]
                );
            }
        }
    }

    #[test]
    fn gradient_is_a_descent_direction() {
        let (model, params) = setup(13);
        let trajectory = rollout(&model, &params, 10, 0.05, 14);
        let engine = LossEngine::default();

        let mut grad = vec![0.; model.size()];
        let before = engine
            .backward(&model, &params, &trajectory, 1.0, false, &mut grad)
            .unwrap();

        let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
        assert!(norm > 0.);

        let stepped: Vec<f32> = params
            .iter()
            .zip(&grad)
            .map(|(p, g)| p - 1e-3 * g / norm)
            .collect();
        let after = engine
            .compute_loss(&model, &stepped, &trajectory, 1.0, false)
            .unwrap();

        assert!(after.total < before.total);
    }

    /// Parameters giving a uniform policy and a zero value everywhere, except for the policy
    /// logits offset by `policy_bias`.
    fn flat_params(model: &ActorCriticModel, policy_bias: [f32; ACTIONS]) -> Vec<f32> {
        let mut params = vec![0.; model.size()];
        let range = model.layout().get("policy_head.bias").unwrap().range();
        params[range].copy_from_slice(&policy_bias);
        params
    }

    /// A window of `len` steps paying one per step, alternating between both actions.
    fn constant_rewards(model: &ActorCriticModel, params: &[f32], len: usize) -> Trajectory {
        let mut trajectory = Trajectory::new(len, STATE_DIM, ACTIONS);

        for t in 0..len {
            let state = [t as f32 * 0.1, 1., -0.5];
            let (probs, value) = model.infer_one(params, &state).unwrap();

            trajectory
                .push(Step {
                    state: &state,
                    action: t % ACTIONS,
                    reward: 1.,
                    probs: &probs,
                    value,
                })
                .unwrap();
        }

        trajectory
    }

    #[test]
    fn clamped_saturated_rows_still_sum_to_one() {
        for row in [[1., 0.], [0., 1.], [1e-9, 1. - 1e-9], [0.5, 0.5]] {
            let sum: f32 = row.iter().map(|&p| clamp_prob(p).0).sum();
            assert!((sum - 1.).abs() < 1e-5, "{row:?} sums to {sum} once clamped");
        }
    }

    #[test]
    fn saturated_fresh_policies_keep_the_loss_finite() {
        let model = ActorCriticModel::new(STATE_DIM, ACTIONS, 8);
        let behavior = flat_params(&model, [0., 0.]);
        let trajectory = constant_rewards(&model, &behavior, 6);

        // The fresh policy puts a probability of exactly one on the first action.
        let saturated = flat_params(&model, [100., -100.]);
        let inference = model.infer(&saturated, trajectory.states().unwrap()).unwrap();
        assert_eq!(inference.probs.row(0).to_vec(), [1., 0.]);

        let mut grad = vec![0.; model.size()];
        let loss = LossEngine::default()
            .backward(&model, &saturated, &trajectory, 0., true, &mut grad)
            .unwrap();

        assert!(loss.total.is_finite());
        assert!(grad.iter().all(|g| g.is_finite()));
        assert_eq!(loss.invalid_probabilities, 0);
        assert_eq!(loss.clip_fraction, 1.);
    }

    #[test]
    fn first_target_of_a_constant_episode_is_a_geometric_series() {
        const LEN: usize = 10;

        let model = ActorCriticModel::new(STATE_DIM, ACTIONS, 8);
        let params = flat_params(&model, [0., 0.]);
        let trajectory = constant_rewards(&model, &params, LEN);
        let engine = LossEngine::new(LossConfig {
            gamma: 0.99,
            entropy_coef: 0.,
            ..Default::default()
        });

        let loss = engine
            .compute_loss(&model, &params, &trajectory, 0., true)
            .unwrap();

        // Same episode without its first step, the remaining targets don't change.
        let mut tail = Trajectory::new(LEN - 1, STATE_DIM, ACTIONS);
        let states = trajectory.states().unwrap();
        let probs = trajectory.behavior_probs().unwrap();
        for t in 1..LEN {
            let state = states.row(t).to_vec();
            let step_probs = probs.row(t).to_vec();
            tail.push(Step {
                state: &state,
                action: trajectory.actions()[t],
                reward: trajectory.rewards()[t],
                probs: &step_probs,
                value: trajectory.behavior_values()[t],
            })
            .unwrap();
        }
        let tail_loss = engine.compute_loss(&model, &params, &tail, 0., true).unwrap();

        // Values are all zero, so each step contributes its squared target.
        let first_target =
            (LEN as f32 * loss.value - (LEN - 1) as f32 * tail_loss.value).sqrt();
        let expected: f32 = (0..LEN as i32).map(|k| 0.99f32.powi(k)).sum();
        assert!((first_target - expected).abs() < 1e-3, "{first_target} vs {expected}");

        let targets: Vec<f32> = (0..LEN)
            .map(|t| (0..(LEN - t) as i32).map(|k| 0.99f32.powi(k)).sum())
            .collect();
        let mean_target = targets.iter().sum::<f32>() / LEN as f32;
        assert!((loss.policy + mean_target).abs() < 1e-4);
        assert!((loss.total - (loss.policy + 0.5 * loss.value)).abs() < 1e-4);
    }
}
