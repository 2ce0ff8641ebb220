use ndarray::prelude::*;

use super::Dense;
use crate::{MlErr, Result, arch::activations::ActFn};

/// A residual MLP block applied to every token independently,
/// `y = x + fc2(act(fc1(x)))`.
#[derive(Clone, Debug)]
pub struct Block {
    fc1: Dense,
    fc2: Dense,
}

impl Block {
    /// Creates a new `Block`.
    ///
    /// # Arguments
    /// * `width` - The token width, both input and output.
    /// * `hidden` - The width of the inner layer.
    /// * `act_fn` - The activation of the inner layer.
    pub fn new(width: usize, hidden: usize, act_fn: ActFn) -> Self {
        Self {
            fc1: Dense::new((width, hidden), Some(act_fn)),
            fc2: Dense::new((hidden, width), None),
        }
    }

    pub fn size(&self) -> usize {
        self.fc1.size() + self.fc2.size()
    }

    /// The dense layers of this block, in forward order.
    pub fn layers(&self) -> [&Dense; 2] {
        [&self.fc1, &self.fc2]
    }

    pub fn apply(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (p1, p2) = self.split(params)?;
        let h = self.fc1.apply(p1, x)?;
        let mut y = self.fc2.apply(p2, h.view())?;
        y += &x;
        Ok(y)
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        let (p1, p2) = self.split(params)?;
        let h = self.fc1.forward(p1, x)?;
        let mut y = self.fc2.forward(p2, h.view())?;
        y += &x;
        Ok(y)
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let (p1, p2) = self.split(params)?;
        let (g1, g2) = grad.split_at_mut(self.fc1.size().min(grad.len()));

        let dh = self.fc2.backward(p2, g2, d.clone())?;
        let mut dx = self.fc1.backward(p1, g1, dh)?;
        dx += &d;
        Ok(dx)
    }

    fn split<'a>(&self, params: &'a [f32]) -> Result<(&'a [f32], &'a [f32])> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "block parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        Ok(params.split_at(self.fc1.size()))
    }
}
