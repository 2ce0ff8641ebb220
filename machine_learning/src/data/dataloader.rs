use std::num::NonZeroUsize;

use rand::{Rng, seq::SliceRandom};

use super::{Batch, ImageDataset};

/// Yields the batches of a dataset, in order or shuffled.
///
/// Every batch holds `batch_size` samples except maybe the last one.
#[derive(Debug, Clone)]
pub struct DataLoader<'a> {
    dataset: &'a ImageDataset,
    order: Vec<usize>,
    batch_size: NonZeroUsize,
    cursor: usize,
}

impl<'a> DataLoader<'a> {
    /// Creates a `DataLoader` visiting the samples in dataset order.
    pub fn sequential(dataset: &'a ImageDataset, batch_size: NonZeroUsize) -> Self {
        Self {
            order: (0..dataset.len()).collect(),
            dataset,
            batch_size,
            cursor: 0,
        }
    }

    /// Creates a `DataLoader` visiting the samples in a random order.
    pub fn shuffled<R: Rng>(
        dataset: &'a ImageDataset,
        batch_size: NonZeroUsize,
        rng: &mut R,
    ) -> Self {
        let mut loader = Self::sequential(dataset, batch_size);
        loader.order.shuffle(rng);
        loader
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size.get())
    }
}

impl Iterator for DataLoader<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size.get()).min(self.order.len());
        let batch = self.dataset.batch(&self.order[self.cursor..end]);

        self.cursor = end;
        Some(batch)
    }
}
