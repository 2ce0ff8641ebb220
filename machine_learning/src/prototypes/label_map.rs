use crate::{MlErr, Result};

/// A bijection between the distinct labels of a batch, sorted ascending, and the dense
/// indices `[0, C)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<usize>,
}

impl LabelMap {
    /// Creates the `LabelMap` of the labels present in `labels`.
    pub fn new(labels: &[usize]) -> Self {
        let mut labels = labels.to_vec();
        labels.sort_unstable();
        labels.dedup();
        Self { labels }
    }

    /// The amount of distinct labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The distinct labels, in dense index order.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn index_of(&self, label: usize) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    pub fn label_of(&self, index: usize) -> Option<usize> {
        self.labels.get(index).copied()
    }

    /// Maps every label to its dense index.
    ///
    /// # Returns
    /// An error listing the labels this map doesn't know about.
    pub fn remap(&self, labels: &[usize]) -> Result<Vec<usize>> {
        let mut missing = Vec::new();

        let indices = labels
            .iter()
            .map(|&label| {
                self.index_of(label).unwrap_or_else(|| {
                    missing.push(label);
                    0
                })
            })
            .collect();

        if !missing.is_empty() {
            missing.sort_unstable();
            missing.dedup();
            return Err(MlErr::MissingClasses { missing });
        }

        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_indices_follow_ascending_labels() {
        let map = LabelMap::new(&[7, 2, 7, 9, 2]);

        assert_eq!(map.labels(), [2, 7, 9]);
        assert_eq!(map.remap(&[9, 2, 7]).unwrap(), [2, 0, 1]);
        assert_eq!(map.label_of(1), Some(7));
        assert_eq!(map.index_of(3), None);
    }

    #[test]
    fn unknown_labels_are_reported() {
        let map = LabelMap::new(&[0, 1]);

        assert!(matches!(
            map.remap(&[1, 5, 3, 5]),
            Err(MlErr::MissingClasses { missing }) if missing == [3, 5]
        ));
    }
}
