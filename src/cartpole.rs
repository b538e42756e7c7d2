use std::f32::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng};
use worker::{EnvErr, Environment, Transition};

const GRAVITY: f32 = 9.8;
const CART_MASS: f32 = 1.0;
const POLE_MASS: f32 = 0.1;
const TOTAL_MASS: f32 = CART_MASS + POLE_MASS;
/// Half the pole's length.
const POLE_HALF_LENGTH: f32 = 0.5;
const POLE_MASS_LENGTH: f32 = POLE_MASS * POLE_HALF_LENGTH;
const FORCE: f32 = 10.0;
/// Seconds between two steps.
const TAU: f32 = 0.02;

const THETA_THRESHOLD: f32 = 12. * 2. * PI / 360.;
const X_THRESHOLD: f32 = 2.4;
const RESET_BOUND: f32 = 0.05;

/// The classic cart-pole balancing task with Euler integration.
///
/// The state is `[x, x_dot, theta, theta_dot]`, action 0 pushes the cart left and 1 pushes it
/// right. Every step pays one, the episode ends once the pole falls, the cart leaves the track or
/// the step limit is reached.
pub struct CartPole {
    rng: StdRng,
    state: [f32; 4],
    steps: usize,
    max_steps: usize,
    needs_reset: bool,
}

impl CartPole {
    pub const STATE_DIM: usize = 4;
    pub const NUM_ACTIONS: usize = 2;

    /// Creates a new `CartPole`.
    ///
    /// # Arguments
    /// * `seed` - Seeds the initial states.
    /// * `max_steps` - The step limit of an episode.
    ///
    /// # Returns
    /// A new `CartPole` instance, it must be reset before stepping.
    pub fn new(seed: u64, max_steps: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            state: [0.; 4],
            steps: 0,
            max_steps,
            needs_reset: true,
        }
    }

    /// Builds an environment from its registered name.
    ///
    /// # Returns
    /// The environment, or `None` if the name is unknown.
    pub fn from_name(name: &str, seed: u64) -> Option<Self> {
        match name {
            "CartPole-v0" => Some(Self::new(seed, 200)),
            "CartPole-v1" => Some(Self::new(seed, 500)),
            _ => None,
        }
    }

    fn terminated(&self) -> bool {
        let [x, _, theta, _] = self.state;
        !(-X_THRESHOLD..=X_THRESHOLD).contains(&x)
            || !(-THETA_THRESHOLD..=THETA_THRESHOLD).contains(&theta)
    }
}

impl Environment for CartPole {
    fn state_dim(&self) -> usize {
        Self::STATE_DIM
    }

    fn num_actions(&self) -> usize {
        Self::NUM_ACTIONS
    }

    fn reset(&mut self) -> Result<Vec<f32>, EnvErr> {
        for value in &mut self.state {
            *value = self.rng.random_range(-RESET_BOUND..RESET_BOUND);
        }

        self.steps = 0;
        self.needs_reset = false;
        Ok(self.state.to_vec())
    }

    fn step(&mut self, action: usize) -> Result<Transition, EnvErr> {
        if self.needs_reset {
            return Err(EnvErr::new("stepped a finished episode"));
        }

        let force = match action {
            0 => -FORCE,
            1 => FORCE,
            _ => return Err(EnvErr::new(format!("invalid action {action}"))),
        };

        let [x, x_dot, theta, theta_dot] = self.state;
        let (sin, cos) = theta.sin_cos();

        let temp = (force + POLE_MASS_LENGTH * theta_dot * theta_dot * sin) / TOTAL_MASS;
        let theta_acc = (GRAVITY * sin - cos * temp)
            / (POLE_HALF_LENGTH * (4. / 3. - POLE_MASS * cos * cos / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * cos / TOTAL_MASS;

        self.state = [
            x + TAU * x_dot,
            x_dot + TAU * x_acc,
            theta + TAU * theta_dot,
            theta_dot + TAU * theta_acc,
        ];
        self.steps += 1;

        let done = self.terminated() || self.steps >= self.max_steps;
        self.needs_reset = done;

        Ok(Transition {
            next_state: self.state.to_vec(),
            reward: 1.,
            done,
        })
    }
}
