use ndarray::{Array2, ArrayView2};

use crate::Result;

/// What a loss function reports about one episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeStats {
    pub loss: f32,
    /// The fraction of samples classified as their own class, in `[0, 1]`.
    pub accuracy: f32,
    /// The amount of distinct classes in the episode.
    pub classes: usize,
}

/// A loss over a whole labeled batch, where the targets are derived from the batch itself.
pub trait EpisodicLoss {
    /// Evaluates the loss of a batch of embeddings.
    ///
    /// # Arguments
    /// * `embeddings` - The `[B, D]` embeddings.
    /// * `labels` - The `B` labels.
    fn loss(&self, embeddings: ArrayView2<f32>, labels: &[usize]) -> Result<EpisodeStats>;

    /// Evaluates the loss and its gradient with respect to the embeddings.
    ///
    /// # Returns
    /// The episode's stats and the `[B, D]` gradient.
    fn loss_prime(
        &self,
        embeddings: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<(EpisodeStats, Array2<f32>)>;
}
