use ndarray::prelude::*;

use crate::{MlErr, Result};

/// An in-memory set of preprocessed images and their labels.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    images: Array4<f32>,
    labels: Vec<usize>,
    num_classes: usize,
}

impl ImageDataset {
    /// Creates a new `ImageDataset`.
    ///
    /// # Arguments
    /// * `images` - The `[N, C, H, W]` images, already normalized.
    /// * `labels` - The `N` labels.
    ///
    /// # Returns
    /// An error if there isn't exactly one label per image.
    pub fn new(images: Array4<f32>, labels: Vec<usize>) -> Result<Self> {
        if images.dim().0 != labels.len() {
            return Err(MlErr::SizeMismatch {
                what: "labels",
                got: labels.len(),
                expected: images.dim().0,
            });
        }

        let num_classes = labels.iter().max().map_or(0, |&max| max + 1);

        Ok(Self {
            images,
            labels,
            num_classes,
        })
    }

    /// Widens the label range to `[0, num_classes)`, for classes this split doesn't hold.
    pub fn with_num_classes(mut self, num_classes: usize) -> Result<Self> {
        if num_classes < self.num_classes {
            return Err(MlErr::InvalidSpec(format!(
                "{num_classes} classes declared but label {} is present",
                self.num_classes - 1
            )));
        }

        self.num_classes = num_classes;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The size of the label range, `max label + 1` unless widened.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// The distinct labels present, ascending.
    pub fn classes(&self) -> Vec<usize> {
        let mut classes = self.labels.clone();
        classes.sort_unstable();
        classes.dedup();
        classes
    }

    /// The `(C, H, W)` of every image.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        let (_, c, h, w) = self.images.dim();
        (c, h, w)
    }

    pub fn images(&self) -> ArrayView4<'_, f32> {
        self.images.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Gathers the samples at `indices` into a batch.
    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch {
            images: self.images.select(Axis(0), indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// A fully materialized batch of images and labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[B, C, H, W]`
    pub images: Array4<f32>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
