use std::collections::BTreeMap;

use ndarray::{Array1, Array2};

use crate::{MlErr, Result};

/// The mean embedding of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub label: usize,
    pub vector: Array1<f32>,
    /// How many samples were averaged.
    pub support: usize,
}

/// A mapping from class label to prototype, iterated in ascending label order.
///
/// Every entry had at least one contributing sample and all vectors share one dimension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrototypeTable {
    entries: BTreeMap<usize, Prototype>,
    dim: usize,
    names: Option<Vec<String>>,
}

impl PrototypeTable {
    /// Creates a new `PrototypeTable`.
    ///
    /// # Returns
    /// An error if two prototypes have different dimensions, share a label or have no support.
    pub fn from_prototypes(prototypes: impl IntoIterator<Item = Prototype>) -> Result<Self> {
        let mut table = Self::default();

        for prototype in prototypes {
            if table.entries.is_empty() {
                table.dim = prototype.vector.len();
            } else if prototype.vector.len() != table.dim {
                return Err(MlErr::SizeMismatch {
                    what: "prototype dimension",
                    got: prototype.vector.len(),
                    expected: table.dim,
                });
            }

            if prototype.support == 0 {
                return Err(MlErr::MissingClasses {
                    missing: vec![prototype.label],
                });
            }

            let label = prototype.label;
            if table.entries.insert(label, prototype).is_some() {
                return Err(MlErr::InvalidSpec(format!("label {label} has two prototypes")));
            }
        }

        Ok(table)
    }

    /// Attaches the class names, indexed by label.
    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }

    pub fn name_of(&self, label: usize) -> Option<&str> {
        self.names.as_ref()?.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The dimension of the prototypes, 0 for an empty table.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn get(&self, label: usize) -> Option<&Prototype> {
        self.entries.get(&label)
    }

    /// The labels, ascending.
    pub fn labels(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    /// The prototypes, in ascending label order.
    pub fn iter(&self) -> impl Iterator<Item = &Prototype> {
        self.entries.values()
    }

    /// Stacks the prototypes into a `[C, D]` matrix, in ascending label order.
    pub fn matrix(&self) -> Array2<f32> {
        let rows: Vec<_> = self.entries.values().collect();
        Array2::from_shape_fn((rows.len(), self.dim), |(i, j)| rows[i].vector[j])
    }
}
