/// A `WeightGen` generates values for the initial state of the model's parameters.
pub trait WeightGen {
    /// Should sample at most `n` weights.
    ///
    /// # Arguments
    /// * `n` - The upper limit of samples to generate.
    ///
    /// # Returns
    /// `None` if the generator is exhausted.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}
