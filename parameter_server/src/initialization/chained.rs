use super::ParamGen;

/// A parameter generator that delegates the generation to a chain of generators.
///
/// Each tensor of a model gets its own generator (a Glorot kernel followed by zero biases, for
/// instance), the chain hands out parameters in layout order and moves on to the next
/// generator once the current one is exhausted.
pub struct ChainedParamGen {
    param_gens: Vec<Box<dyn ParamGen>>,
    curr: usize,
}

impl ChainedParamGen {
    /// Creates a new `ChainedParamGen` parameter generator.
    ///
    /// # Arguments
    /// * `param_gens` - The generators, in the order their parameters should be produced.
    ///
    /// # Returns
    /// A new `ChainedParamGen` instance.
    pub fn new(param_gens: Vec<Box<dyn ParamGen>>) -> Self {
        Self {
            param_gens,
            curr: 0,
        }
    }
}

impl ParamGen for ChainedParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if n == 0 {
            return None;
        }

        let mut out: Vec<f32> = Vec::new();

        while self.curr < self.param_gens.len() && out.len() < n {
            match self.param_gens[self.curr].sample(n - out.len()) {
                Some(sample) => out.extend(sample),
                None => self.curr += 1,
            }
        }

        (!out.is_empty()).then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{super::ConstParamGen, *};

    #[test]
    fn empty_chain_is_exhausted() {
        let mut param_gen = ChainedParamGen::new(vec![]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn samples_cross_generator_boundaries() {
        let param_gens: Vec<Box<dyn ParamGen>> = vec![
            Box::new(ConstParamGen::new(0., 1)),
            Box::new(ConstParamGen::new(1., 3)),
        ];

        let mut param_gen = ChainedParamGen::new(param_gens);

        assert_eq!(param_gen.sample(2).unwrap(), [0., 1.]);
        assert_eq!(param_gen.sample(2).unwrap(), [1., 1.]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn nested_chains_keep_order() {
        let inner: Vec<Box<dyn ParamGen>> = vec![
            Box::new(ConstParamGen::new(1., 1)),
            Box::new(ConstParamGen::new(2., 1)),
        ];

        let param_gens: Vec<Box<dyn ParamGen>> = vec![
            Box::new(ConstParamGen::new(0., 1)),
            Box::new(ChainedParamGen::new(inner)),
            Box::new(ConstParamGen::new(3., 1)),
        ];

        let mut param_gen = ChainedParamGen::new(param_gens);
        assert_eq!(param_gen.drain(), [0., 1., 2., 3.]);
    }
}
