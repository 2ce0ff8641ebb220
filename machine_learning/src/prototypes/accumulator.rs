use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView1, ArrayView2};

use super::{Prototype, PrototypeTable};
use crate::{MlErr, Result};

/// Collects the embeddings of every class until they are reduced into a `PrototypeTable`.
#[derive(Debug, Clone, Default)]
pub struct PrototypeAccumulator {
    members: BTreeMap<usize, Vec<Array1<f32>>>,
    dim: Option<usize>,
}

impl PrototypeAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one embedding to its class.
    ///
    /// # Returns
    /// An error if its dimension differs from the previous embeddings'.
    pub fn push(&mut self, label: usize, embedding: ArrayView1<f32>) -> Result<()> {
        let dim = *self.dim.get_or_insert(embedding.len());

        if embedding.len() != dim {
            return Err(MlErr::SizeMismatch {
                what: "embedding dimension",
                got: embedding.len(),
                expected: dim,
            });
        }

        self.members
            .entry(label)
            .or_default()
            .push(embedding.to_owned());

        Ok(())
    }

    /// Adds a batch of `[B, D]` embeddings with their `B` labels.
    pub fn extend(&mut self, embeddings: ArrayView2<f32>, labels: &[usize]) -> Result<()> {
        if embeddings.nrows() != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: labels.len(),
                expected: embeddings.nrows(),
            });
        }

        for (embedding, &label) in embeddings.outer_iter().zip(labels) {
            self.push(label, embedding)?;
        }

        Ok(())
    }

    /// The labels seen so far, ascending.
    pub fn labels(&self) -> Vec<usize> {
        self.members.keys().copied().collect()
    }

    /// Reduces every class to the mean of its embeddings.
    pub fn finalize(self) -> Result<PrototypeTable> {
        let prototypes = self.members.into_iter().map(|(label, members)| {
            let dim = members.first().map_or(0, |m| m.len());
            let mut sum = vec![0f64; dim];

            for member in &members {
                sum.iter_mut().zip(member).for_each(|(s, &v)| *s += v as f64);
            }

            let n = members.len() as f64;
            let vector = sum.into_iter().map(|s| (s / n) as f32).collect();

            Prototype {
                label,
                vector,
                support: members.len(),
            }
        });

        PrototypeTable::from_prototypes(prototypes)
    }

    /// Like `finalize`, but every class of `expected` must have received an embedding.
    ///
    /// # Returns
    /// An error listing every expected class without samples.
    pub fn finalize_expecting(
        self,
        expected: impl IntoIterator<Item = usize>,
    ) -> Result<PrototypeTable> {
        let mut missing: Vec<_> = expected
            .into_iter()
            .filter(|label| !self.members.contains_key(label))
            .collect();

        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(MlErr::MissingClasses { missing });
        }

        self.finalize()
    }
}

/// Computes the prototype of every class present in a batch.
///
/// # Arguments
/// * `embeddings` - The `[B, D]` embeddings.
/// * `labels` - The `B` labels.
///
/// # Returns
/// A table with one prototype per distinct label, or an error if the lengths mismatch.
pub fn build_prototypes(embeddings: ArrayView2<f32>, labels: &[usize]) -> Result<PrototypeTable> {
    if labels.is_empty() && embeddings.nrows() == 0 {
        return Err(MlErr::EmptyBatch);
    }

    let mut accumulator = PrototypeAccumulator::new();
    accumulator.extend(embeddings, labels)?;
    accumulator.finalize()
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;

    #[test]
    fn prototypes_are_class_means() {
        let embeddings = array![[1., 0.], [0.9, 0.1], [0., 1.]];
        let table = build_prototypes(embeddings.view(), &[0, 0, 1]).unwrap();

        let p0 = &table.get(0).unwrap().vector;
        assert!((p0[0] - 0.95).abs() < 1e-6);
        assert!((p0[1] - 0.05).abs() < 1e-6);
        assert_eq!(table.get(0).unwrap().support, 2);
        assert_eq!(table.get(1).unwrap().vector, array![0., 1.]);
    }

    #[test]
    fn singleton_class_is_its_own_prototype() {
        let embeddings = array![[0.25, -0.5, 0.125], [1., 1., 1.]];
        let table = build_prototypes(embeddings.view(), &[3, 1]).unwrap();

        assert_eq!(table.get(3).unwrap().vector, embeddings.row(0));
    }

    #[test]
    fn permutation_invariance() {
        let embeddings = array![[1., 2.], [3., 4.], [-1., 0.5], [0.25, 8.], [2., 2.]];
        let labels = [0, 1, 0, 1, 1];
        let order = [3, 0, 4, 2, 1];

        let permuted = Array2::from_shape_fn((5, 2), |(i, j)| embeddings[[order[i], j]]);
        let permuted_labels: Vec<_> = order.iter().map(|&i| labels[i]).collect();

        let a = build_prototypes(embeddings.view(), &labels).unwrap();
        let b = build_prototypes(permuted.view(), &permuted_labels).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn lengths_must_agree() {
        let embeddings = array![[1., 0.], [0., 1.]];

        assert!(matches!(
            build_prototypes(embeddings.view(), &[0]),
            Err(MlErr::SizeMismatch { .. })
        ));
    }

    #[test]
    fn dimensions_must_agree() {
        let mut accumulator = PrototypeAccumulator::new();
        accumulator.push(0, array![1., 2.].view()).unwrap();

        assert!(accumulator.push(1, array![1.].view()).is_err());
    }

    #[test]
    fn missing_classes_are_reported() {
        let mut accumulator = PrototypeAccumulator::new();
        accumulator
            .extend(array![[1., 0.], [0., 1.]].view(), &[0, 2])
            .unwrap();

        assert_eq!(accumulator.labels(), [0, 2]);
        assert!(matches!(
            accumulator.clone().finalize_expecting(0..4),
            Err(MlErr::MissingClasses { missing }) if missing == [1, 3]
        ));
        assert_eq!(accumulator.finalize_expecting([0, 2]).unwrap().len(), 2);
    }
}
