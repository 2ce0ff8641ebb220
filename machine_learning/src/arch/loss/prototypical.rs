use ndarray::prelude::*;

use super::{EpisodeStats, EpisodicLoss, distance::pairwise_euclidean};
use crate::{
    MlErr, Result,
    prototypes::{LabelMap, build_prototypes},
};

/// The default numerical floor added inside the distance's square root.
pub const DEFAULT_DISTANCE_FLOOR: f32 = 1e-8;

/// Prototypical network loss.
///
/// Every batch is an episode: its classes are remapped to dense indices in ascending label
/// order, each class gets the mean of its embeddings as prototype and every embedding is
/// classified by a softmax over its negative distances to the prototypes. The loss is the
/// mean cross-entropy against the embedding's own class.
///
/// The prototypes are not detached, the gradient also flows through the class means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrototypicalLoss {
    floor: f32,
}

/// Everything an episode computes on the way to the loss.
struct Episode {
    targets: Vec<usize>,
    supports: Vec<usize>,
    prototypes: Array2<f32>,
    distances: Array2<f32>,
    log_probs: Array2<f32>,
}

impl PrototypicalLoss {
    /// Creates a new `PrototypicalLoss`.
    ///
    /// # Arguments
    /// * `floor` - Added inside the square root of every distance.
    pub fn new(floor: f32) -> Self {
        Self { floor }
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    fn episode(&self, embeddings: ArrayView2<f32>, labels: &[usize]) -> Result<Episode> {
        if embeddings.nrows() == 0 {
            return Err(MlErr::EmptyBatch);
        }

        if embeddings.nrows() != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: labels.len(),
                expected: embeddings.nrows(),
            });
        }

        let map = LabelMap::new(labels);
        if map.len() < 2 {
            return Err(MlErr::DegenerateBatch { classes: map.len() });
        }

        let targets = map.remap(labels)?;
        let table = build_prototypes(embeddings, labels)?;
        let supports = table.iter().map(|p| p.support).collect();
        let prototypes = table.matrix();

        let distances = pairwise_euclidean(embeddings, prototypes.view(), self.floor)?;
        let log_probs = log_softmax(distances.mapv(|d| -d));

        Ok(Episode {
            targets,
            supports,
            prototypes,
            distances,
            log_probs,
        })
    }
}

impl Default for PrototypicalLoss {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_FLOOR)
    }
}

impl Episode {
    fn stats(&self) -> EpisodeStats {
        let b = self.targets.len();

        let nll: f32 = self
            .targets
            .iter()
            .enumerate()
            .map(|(i, &t)| -self.log_probs[[i, t]])
            .sum();

        let hits = self
            .distances
            .outer_iter()
            .zip(&self.targets)
            .filter(|(row, t)| nearest(row.view()) == **t)
            .count();

        EpisodeStats {
            loss: nll / b as f32,
            accuracy: hits as f32 / b as f32,
            classes: self.supports.len(),
        }
    }
}

impl EpisodicLoss for PrototypicalLoss {
    fn loss(&self, embeddings: ArrayView2<f32>, labels: &[usize]) -> Result<EpisodeStats> {
        Ok(self.episode(embeddings, labels)?.stats())
    }

    fn loss_prime(
        &self,
        embeddings: ArrayView2<f32>,
        labels: &[usize],
    ) -> Result<(EpisodeStats, Array2<f32>)> {
        let episode = self.episode(embeddings, labels)?;
        let Episode {
            targets,
            supports,
            prototypes,
            distances,
            log_probs,
        } = &episode;

        let b = targets.len() as f32;

        // d loss / d distance = -(softmax - one_hot) / B, scaled by 1 / distance it turns
        // into the weight of every (embedding - prototype) difference.
        let mut weights = log_probs.mapv(f32::exp);
        for (mut row, &t) in weights.outer_iter_mut().zip(targets) {
            row[t] -= 1.;
        }
        weights.zip_mut_with(distances, |w, &d| *w = -*w / (b * d));

        let row_sums = weights.sum_axis(Axis(1)).insert_axis(Axis(1));
        let col_sums = weights.sum_axis(Axis(0)).insert_axis(Axis(1));

        let mut d_embeddings = &embeddings * &row_sums - weights.dot(prototypes);
        let d_prototypes = prototypes * &col_sums - weights.t().dot(&embeddings);

        // Every prototype is the mean of its class' embeddings.
        for (mut row, &t) in d_embeddings.outer_iter_mut().zip(targets) {
            row.scaled_add(1. / supports[t] as f32, &d_prototypes.row(t));
        }

        Ok((episode.stats(), d_embeddings))
    }
}

/// Row-wise log-softmax, shifted by the row maximum.
fn log_softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.outer_iter_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
        row.mapv_inplace(|v| v - log_sum);
    }

    logits
}

/// The index of the smallest value, the lowest index on ties.
fn nearest(distances: ArrayView1<f32>) -> usize {
    let mut best = 0;

    for (i, &d) in distances.iter().enumerate() {
        if d < distances[best] {
            best = i;
        }
    }

    best
}
