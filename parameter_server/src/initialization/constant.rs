use super::ParamGen;

/// A parameter generator that always yields the same value, used for biases.
pub struct ConstParamGen {
    value: f32,
    remaining: usize,
}

impl ConstParamGen {
    /// Creates a new `ConstParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `value` - The value to always generate.
    /// * `limit` - The total amount of parameters to generate.
    ///
    /// # Returns
    /// A new `ConstParamGen` instance.
    pub fn new(value: f32, limit: usize) -> Self {
        Self {
            value,
            remaining: limit,
        }
    }

    /// Shorthand for a zero initialized tensor of `limit` parameters.
    pub fn zeros(limit: usize) -> Self {
        Self::new(0., limit)
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 || n == 0 {
            return None;
        }

        let n = n.min(self.remaining);
        self.remaining -= n;
        Some(vec![self.value; n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_generator_yields_none() {
        let mut param_gen = ConstParamGen::zeros(0);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn samples_are_capped_by_the_limit() {
        let mut param_gen = ConstParamGen::new(1., 10);

        assert_eq!(param_gen.sample(7).unwrap(), vec![1.; 7]);
        assert_eq!(param_gen.sample(7).unwrap(), vec![1.; 3]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn drain_collects_everything() {
        let mut param_gen = ConstParamGen::new(0.5, 4);
        assert_eq!(param_gen.drain(), vec![0.5; 4]);
    }
}
