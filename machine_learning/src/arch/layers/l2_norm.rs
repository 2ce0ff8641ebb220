use ndarray::prelude::*;

use crate::{MlErr, Result};

/// Smallest norm a row is divided by.
const NORM_FLOOR: f32 = 1e-12;

/// Row-wise L2 normalization, `y = z / max(‖z‖, ε)`.
#[derive(Clone, Debug, Default)]
pub struct L2Norm {
    y: Array2<f32>,
    norms: Array1<f32>,
}

impl L2Norm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes every row of `z`.
    pub fn apply(z: Array2<f32>) -> Array2<f32> {
        Self::normalize(z).0
    }

    /// Normalizes every row of `z`, caching the result for `backward`.
    pub fn forward(&mut self, z: Array2<f32>) -> Array2<f32> {
        let (y, norms) = Self::normalize(z);
        self.y = y.clone();
        self.norms = norms;
        y
    }

    /// Back-propagates `d` through the last `forward` call.
    ///
    /// For a row that was not clamped, `dz = (dy - y (y · dy)) / ‖z‖`.
    pub fn backward(&self, mut d: Array2<f32>) -> Result<Array2<f32>> {
        if d.dim() != self.y.dim() {
            return Err(MlErr::SizeMismatch {
                what: "normalization delta",
                got: d.len(),
                expected: self.y.len(),
            });
        }

        let rows = d.outer_iter_mut().zip(self.y.outer_iter()).zip(&self.norms);

        for ((mut row, y), &norm) in rows {
            if norm > NORM_FLOOR {
                let proj = y.dot(&row);
                row.scaled_add(-proj, &y);
            }

            row /= norm.max(NORM_FLOOR);
        }

        Ok(d)
    }

    fn normalize(mut z: Array2<f32>) -> (Array2<f32>, Array1<f32>) {
        let norms = z.map_axis(Axis(1), |row| row.dot(&row).sqrt());

        for (mut row, &norm) in z.outer_iter_mut().zip(&norms) {
            row /= norm.max(NORM_FLOOR);
        }

        (z, norms)
    }
}
