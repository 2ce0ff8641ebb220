use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::{MlErr, Result};

/// The euclidean distance between two vectors.
pub fn euclidean(a: ArrayView1<f32>, b: ArrayView1<f32>) -> Result<f32> {
    if a.len() != b.len() {
        return Err(MlErr::SizeMismatch {
            what: "vector dimension",
            got: a.len(),
            expected: b.len(),
        });
    }

    Ok(squared(a, b).sqrt())
}

/// Every distance between the rows of `a` and the rows of `b`, `sqrt(‖a_i - b_j‖² + floor)`.
///
/// # Arguments
/// * `a` - A `[B, D]` matrix.
/// * `b` - A `[C, D]` matrix.
/// * `floor` - Added inside the square root, keeps the gradient finite at zero distance.
///
/// # Returns
/// The `[B, C]` distances.
pub fn pairwise_euclidean(
    a: ArrayView2<f32>,
    b: ArrayView2<f32>,
    floor: f32,
) -> Result<Array2<f32>> {
    if a.ncols() != b.ncols() {
        return Err(MlErr::SizeMismatch {
            what: "vector dimension",
            got: a.ncols(),
            expected: b.ncols(),
        });
    }

    let distances = Array2::from_shape_fn((a.nrows(), b.nrows()), |(i, j)| {
        (squared(a.row(i), b.row(j)) + floor).sqrt()
    });

    Ok(distances)
}

fn squared(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
