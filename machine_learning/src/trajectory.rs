use ndarray::prelude::*;

use crate::{MlErr, Result};

/// One interaction with the environment as seen by the behavior policy.
#[derive(Debug, Clone, Copy)]
pub struct Step<'a> {
    pub state: &'a [f32],
    pub action: usize,
    pub reward: f32,
    /// The full action distribution the action was sampled from.
    pub probs: &'a [f32],
    /// The value estimate of `state` at sampling time.
    pub value: f32,
}

/// The steps of a single rollout window, in time order.
///
/// Columns are stored contiguously so the states and behavior distributions can be viewed as
/// batches without copying. A trajectory is filled once and discarded, it never grows past its
/// capacity.
#[derive(Debug, Clone)]
pub struct Trajectory {
    capacity: usize,
    state_dim: usize,
    num_actions: usize,
    states: Vec<f32>,
    actions: Vec<usize>,
    rewards: Vec<f32>,
    behavior_probs: Vec<f32>,
    behavior_values: Vec<f32>,
}

impl Trajectory {
    /// Creates a new empty `Trajectory`.
    ///
    /// # Arguments
    /// * `capacity` - The rollout window, the maximum amount of steps.
    /// * `state_dim` - The amount of features of a state.
    /// * `num_actions` - The amount of discrete actions.
    ///
    /// # Returns
    /// A new `Trajectory` instance.
    pub fn new(capacity: usize, state_dim: usize, num_actions: usize) -> Self {
        Self {
            capacity,
            state_dim,
            num_actions,
            states: Vec::with_capacity(capacity * state_dim),
            actions: Vec::with_capacity(capacity),
            rewards: Vec::with_capacity(capacity),
            behavior_probs: Vec::with_capacity(capacity * num_actions),
            behavior_values: Vec::with_capacity(capacity),
        }
    }

    /// Appends a step.
    ///
    /// # Arguments
    /// * `step` - The step to record.
    ///
    /// # Returns
    /// An error if the trajectory is full or the step doesn't match its dimensions.
    pub fn push(&mut self, step: Step<'_>) -> Result<()> {
        if self.is_full() {
            return Err(MlErr::TrajectoryFull {
                capacity: self.capacity,
            });
        }

        if step.state.len() != self.state_dim {
            return Err(MlErr::SizeMismatch {
                what: "trajectory state",
                got: step.state.len(),
                expected: self.state_dim,
            });
        }

        if step.probs.len() != self.num_actions {
            return Err(MlErr::SizeMismatch {
                what: "behavior distribution",
                got: step.probs.len(),
                expected: self.num_actions,
            });
        }

        if step.action >= self.num_actions {
            return Err(MlErr::InvalidAction {
                action: step.action,
                num_actions: self.num_actions,
            });
        }

        self.states.extend_from_slice(step.state);
        self.actions.push(step.action);
        self.rewards.push(step.reward);
        self.behavior_probs.extend_from_slice(step.probs);
        self.behavior_values.push(step.value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn states(&self) -> Result<ArrayView2<'_, f32>> {
        Ok(ArrayView2::from_shape(
            (self.len(), self.state_dim),
            &self.states,
        )?)
    }

    pub fn actions(&self) -> &[usize] {
        &self.actions
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    pub fn behavior_probs(&self) -> Result<ArrayView2<'_, f32>> {
        Ok(ArrayView2::from_shape(
            (self.len(), self.num_actions),
            &self.behavior_probs,
        )?)
    }

    pub fn behavior_values(&self) -> &[f32] {
        &self.behavior_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(state: &[f32], action: usize) -> Step<'_> {
        Step {
            state,
            action,
            reward: 1.,
            probs: &[0.5, 0.5],
            value: 0.,
        }
    }

    #[test]
    fn push_stops_at_capacity() {
        let mut trajectory = Trajectory::new(2, 3, 2);

        trajectory.push(step(&[1., 2., 3.], 0)).unwrap();
        trajectory.push(step(&[4., 5., 6.], 1)).unwrap();

        assert!(trajectory.is_full());
        assert!(matches!(
            trajectory.push(step(&[7., 8., 9.], 0)),
            Err(MlErr::TrajectoryFull { capacity: 2 })
        ));
        assert_eq!(
            trajectory.states().unwrap(),
            array![[1., 2., 3.], [4., 5., 6.]]
        );
        assert_eq!(trajectory.actions(), [0, 1]);
    }

    #[test]
    fn malformed_steps_are_rejected() {
        let mut trajectory = Trajectory::new(4, 3, 2);

        assert!(trajectory.push(step(&[1., 2.], 0)).is_err());
        assert!(matches!(
            trajectory.push(step(&[1., 2., 3.], 2)),
            Err(MlErr::InvalidAction { action: 2, num_actions: 2 })
        ));
        assert!(trajectory.is_empty());
    }
}
