use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// How the target returns of a trajectory are discounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnConvention {
    /// `R_t = r_t + gamma * R_{t+1}`, starting from the bootstrap value.
    #[default]
    Accumulated,
    /// `R_t = r_t + gamma * bootstrap` for every step.
    BootstrapOnly,
}

impl Display for ReturnConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReturnConvention::Accumulated => "accumulated",
            ReturnConvention::BootstrapOnly => "bootstrap_only",
        };

        f.write_str(s)
    }
}

/// Computes the target return of every step of a trajectory.
///
/// # Arguments
/// * `rewards` - The rewards, in time order.
/// * `bootstrap` - The return following the last step, zero when the episode terminated.
/// * `gamma` - The discount factor.
/// * `convention` - How the discount is applied.
///
/// # Returns
/// One return per reward.
pub fn discounted_returns(
    rewards: &[f32],
    bootstrap: f32,
    gamma: f32,
    convention: ReturnConvention,
) -> Vec<f32> {
    match convention {
        ReturnConvention::Accumulated => {
            let mut returns = vec![0.; rewards.len()];
            let mut acc = bootstrap;

            for (ret, &reward) in returns.iter_mut().zip(rewards).rev() {
                acc = reward + gamma * acc;
                *ret = acc;
            }

            returns
        }
        ReturnConvention::BootstrapOnly => rewards
            .iter()
            .map(|&reward| reward + gamma * bootstrap)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_gamma_returns_the_rewards() {
        let rewards = [1., -2., 0.5, 3.];

        for convention in [ReturnConvention::Accumulated, ReturnConvention::BootstrapOnly] {
            assert_eq!(discounted_returns(&rewards, 10., 0., convention), rewards);
        }
    }

    #[test]
    fn constant_rewards_accumulate_a_geometric_series() {
        let rewards = [1.; 10];
        let returns = discounted_returns(&rewards, 0., 0.99, ReturnConvention::Accumulated);

        let expected: f32 = (0..10).map(|k| 0.99f32.powi(k)).sum();
        assert!((returns[0] - expected).abs() < 1e-5);
        assert_eq!(returns[9], 1.);
    }

    #[test]
    fn bootstrap_is_discounted_once_per_step() {
        let returns = discounted_returns(&[1., 2.], 10., 0.5, ReturnConvention::BootstrapOnly);
        assert_eq!(returns, [6., 7.]);

        let returns = discounted_returns(&[1., 2.], 10., 0.5, ReturnConvention::Accumulated);
        assert_eq!(returns, [4.5, 7.]);
    }
}
