use super::WeightGen;

/// A weight generator that delegates the generation to a chain of weight generators.
///
/// Each layer segment gets its own generator (weights, biases, embeddings), and the chain
/// fills the flat parameter buffer in layout order.
pub struct ChainedWeightGen {
    weight_gens: Vec<Box<dyn WeightGen>>,
    curr: usize,
}

impl ChainedWeightGen {
    /// Creates a new `ChainedWeightGen` weight generator.
    ///
    /// # Arguments
    /// * `weight_gens` - A vec of potentially different weight generators.
    pub fn new(weight_gens: Vec<Box<dyn WeightGen>>) -> Self {
        Self {
            weight_gens,
            curr: 0,
        }
    }
}

impl WeightGen for ChainedWeightGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        let mut sample = Vec::with_capacity(n);

        while sample.len() < n && self.curr < self.weight_gens.len() {
            match self.weight_gens[self.curr].sample(n - sample.len()) {
                Some(part) if part.len() == n - sample.len() => sample.extend(part),
                Some(part) => {
                    sample.extend(part);
                    self.curr += 1;
                }
                None => self.curr += 1,
            }
        }

        if sample.is_empty() && n > 0 {
            return None;
        }

        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::{super::ConstWeightGen, *};

    #[test]
    fn empty() {
        let mut weight_gen = ChainedWeightGen::new(vec![]);
        assert!(weight_gen.sample(1).is_none());
    }

    #[test]
    fn spans_generators() {
        let weight_gens: Vec<Box<dyn WeightGen>> = vec![
            Box::new(ConstWeightGen::new(0., 1)),
            Box::new(ConstWeightGen::new(1., 3)),
        ];

        let mut weight_gen = ChainedWeightGen::new(weight_gens);

        assert_eq!(weight_gen.sample(2).unwrap(), [0., 1.]);
        assert_eq!(weight_gen.sample(5).unwrap(), [1., 1.]);
        assert!(weight_gen.sample(1).is_none());
    }

    #[test]
    fn nested() {
        let inner: Vec<Box<dyn WeightGen>> = vec![
            Box::new(ConstWeightGen::new(1., 1)),
            Box::new(ConstWeightGen::new(2., 1)),
        ];

        let weight_gens: Vec<Box<dyn WeightGen>> = vec![
            Box::new(ConstWeightGen::new(0., 1)),
            Box::new(ChainedWeightGen::new(inner)),
            Box::new(ConstWeightGen::new(3., 1)),
        ];

        let mut weight_gen = ChainedWeightGen::new(weight_gens);

        assert_eq!(weight_gen.sample(4).unwrap(), [0., 1., 2., 3.]);
        assert!(weight_gen.sample(1).is_none());
    }
}
