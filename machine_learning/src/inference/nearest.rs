use std::collections::BTreeMap;

use ndarray::ArrayView1;

use crate::{MlErr, Result, arch::loss::distance::euclidean, prototypes::PrototypeTable};

/// The outcome of classifying one embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// The label of the nearest prototype.
    pub label: usize,
    /// The class name of `label`, when the table carries names.
    pub name: Option<String>,
    /// The L2 distance to every prototype, by label.
    pub distances: BTreeMap<usize, f32>,
}

/// Classifies an embedding as the class of its nearest prototype.
///
/// # Arguments
/// * `embedding` - A `[D]` embedding.
/// * `table` - The prototypes to compare against.
///
/// # Returns
/// The predicted label, ties going to the lowest one, together with every distance. An
/// error if the table is empty or its dimension differs from the embedding's.
pub fn nearest_prototype(
    embedding: ArrayView1<f32>,
    table: &PrototypeTable,
) -> Result<Classification> {
    if table.is_empty() {
        return Err(MlErr::EmptyPrototypeTable);
    }

    if embedding.len() != table.dim() {
        return Err(MlErr::SizeMismatch {
            what: "embedding dimension",
            got: embedding.len(),
            expected: table.dim(),
        });
    }

    let mut distances = BTreeMap::new();
    let mut best: Option<(usize, f32)> = None;

    // Labels come in ascending order, a later label must be strictly closer to win.
    for prototype in table.iter() {
        let distance = euclidean(embedding, prototype.vector.view())?;
        distances.insert(prototype.label, distance);

        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((prototype.label, distance));
        }
    }

    let (label, _) = best.ok_or(MlErr::EmptyPrototypeTable)?;

    Ok(Classification {
        label,
        name: table.name_of(label).map(str::to_owned),
        distances,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::prototypes::Prototype;

    fn table() -> PrototypeTable {
        PrototypeTable::from_prototypes([
            Prototype {
                label: 0,
                vector: array![0.95, 0.05],
                support: 2,
            },
            Prototype {
                label: 1,
                vector: array![0., 1.],
                support: 1,
            },
        ])
        .unwrap()
    }

    #[test]
    fn picks_the_nearest_prototype() {
        let result = nearest_prototype(array![0., 1.].view(), &table()).unwrap();

        assert_eq!(result.label, 1);
        assert_eq!(result.name, None);
        assert_eq!(result.distances.len(), 2);
        assert_eq!(result.distances[&1], 0.);
        assert!((result.distances[&0] - (0.95f32.powi(2) + 0.95f32.powi(2)).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn ties_go_to_the_lowest_label() {
        let table = PrototypeTable::from_prototypes([
            Prototype {
                label: 4,
                vector: array![1., 0.],
                support: 1,
            },
            Prototype {
                label: 2,
                vector: array![0., 1.],
                support: 1,
            },
        ])
        .unwrap()
        .with_names(vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()]);

        let result = nearest_prototype(array![0.5, 0.5].view(), &table).unwrap();

        assert_eq!(result.label, 2);
        assert_eq!(result.name.as_deref(), Some("c"));
    }

    #[test]
    fn dimension_mismatch() {
        assert!(matches!(
            nearest_prototype(array![1., 0., 0.].view(), &table()),
            Err(MlErr::SizeMismatch { .. })
        ));
    }
}
