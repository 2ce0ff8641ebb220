use std::mem;

use rayon::prelude::*;

use super::{ParamHandle, ParamLayout, Segment, TrainableSet};
use crate::{MlErr, Result, optimization::Optimizer};

/// Owns a model's parameters and their gradient, laid out by a `ParamLayout`.
///
/// The parameters can be iterated sequentially in order through the `FrontIter`, and the
/// trainable layers can be iterated in reverse, together with their gradient, through
/// the `BackIter`.
#[derive(Debug, Clone)]
pub struct ParamManager {
    layout: ParamLayout,
    params: Vec<f32>,
    grad: Vec<f32>,
}

impl ParamManager {
    /// Creates a new `ParamManager`.
    ///
    /// # Arguments
    /// * `layout` - How the parameters are split among the layers.
    /// * `params` - The flat parameter buffer.
    ///
    /// # Returns
    /// A new `ParamManager` instance or an error if the buffer doesn't match the layout.
    pub fn new(layout: ParamLayout, params: Vec<f32>) -> Result<Self> {
        if params.len() != layout.size() {
            return Err(MlErr::SizeMismatch {
                what: "parameter buffer",
                got: params.len(),
                expected: layout.size(),
            });
        }

        Ok(Self {
            grad: vec![0.; params.len()],
            layout,
            params,
        })
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Copies the current parameters, independently from the live buffer.
    pub fn snapshot(&self) -> Vec<f32> {
        self.params.clone()
    }

    /// The parameters of the layer named `name`.
    pub fn segment_params(&self, name: &str) -> Option<&[f32]> {
        let segment = self.layout.segment(name)?;
        Some(&self.params[segment.range()])
    }

    /// Overwrites the parameters of the layer named `name`.
    ///
    /// # Arguments
    /// * `name` - The layer's name.
    /// * `values` - The new parameters, exactly as many as the layer holds.
    pub fn load_segment(&mut self, name: &str, values: &[f32]) -> Result<()> {
        let segment = self
            .layout
            .segment(name)
            .ok_or_else(|| MlErr::InvalidLayout(format!("there is no layer named {name}")))?;

        if values.len() != segment.size {
            return Err(MlErr::SizeMismatch {
                what: "layer parameters",
                got: values.len(),
                expected: segment.size,
            });
        }

        self.params[segment.range()].copy_from_slice(values);
        Ok(())
    }

    /// Creates a new `FrontIter` over every layer, in forward order.
    pub fn front(&self) -> FrontIter<'_> {
        FrontIter {
            segments: self.layout.segments(),
            params: &self.params,
            curr: 0,
        }
    }

    /// Creates a new `BackIter` over the trainable layers, in backward order.
    pub fn back(&mut self) -> BackIter<'_> {
        BackIter {
            segments: self.layout.segments(),
            params: &self.params,
            grad: &mut self.grad,
            curr: self.layout.segments().len(),
        }
    }

    /// Zeros out the gradient.
    pub fn zero_grad(&mut self) {
        self.grad.par_iter_mut().for_each(|g| *g = 0.);
    }

    /// Applies the gradient onto the trainable parameters.
    ///
    /// # Arguments
    /// * `trainable` - The handles to update.
    /// * `optimizers` - A list of optimizers, one per handle.
    pub fn optimize<O>(&mut self, trainable: &TrainableSet, optimizers: &mut [O]) -> Result<()>
    where
        O: Optimizer + Send,
    {
        if optimizers.len() != trainable.len() {
            return Err(MlErr::SizeMismatch {
                what: "optimizers",
                got: optimizers.len(),
                expected: trainable.len(),
            });
        }

        let grad = &self.grad;
        let segments = split_segments_mut(&mut self.params, trainable.handles())?;

        optimizers
            .par_iter_mut()
            .zip(segments)
            .zip(trainable.handles())
            .try_for_each(|((optimizer, params), handle)| {
                optimizer.update_params(&grad[handle.range.clone()], params)
            })
    }
}

/// Splits `buf` into the disjoint mutable ranges of `handles`.
fn split_segments_mut<'a>(
    mut buf: &'a mut [f32],
    handles: &[ParamHandle],
) -> Result<Vec<&'a mut [f32]>> {
    let mut consumed = 0;
    let mut segments = Vec::with_capacity(handles.len());

    for handle in handles {
        let range = &handle.range;

        if range.start < consumed || range.end - consumed > buf.len() {
            return Err(MlErr::InvalidLayout(format!(
                "handle {} is out of order or out of bounds",
                handle.name
            )));
        }

        let rest = mem::take(&mut buf);
        let (_, rest) = rest.split_at_mut(range.start - consumed);
        let (segment, rest) = rest.split_at_mut(range.len());

        segments.push(segment);
        consumed = range.end;
        buf = rest;
    }

    Ok(segments)
}

/// A model's layer iterator.
///
/// This iterator iterates the layers of a model from the front.
pub struct FrontIter<'pm> {
    segments: &'pm [Segment],
    params: &'pm [f32],
    curr: usize,
}

impl<'pm> FrontIter<'pm> {
    /// Yields the next layer's parameters.
    ///
    /// # Arguments
    /// * `size` - The amount of parameters the layer expects.
    ///
    /// # Returns
    /// An error if the layers are exhausted or the next one has a different size.
    pub fn next(&mut self, size: usize) -> Result<&'pm [f32]> {
        let segments: &'pm [Segment] = self.segments;
        let segment = segments.get(self.curr).ok_or_else(|| {
            MlErr::InvalidLayout("the forward pass asked for more layers than there are".into())
        })?;

        if segment.size != size {
            return Err(MlErr::SizeMismatch {
                what: "layer parameters",
                got: size,
                expected: segment.size,
            });
        }

        self.curr += 1;
        let params: &'pm [f32] = self.params;
        Ok(&params[segment.range()])
    }
}

/// A model's trainable layer iterator.
///
/// This iterator iterates the trainable layers of a model from the back.
pub struct BackIter<'pm> {
    segments: &'pm [Segment],
    params: &'pm [f32],
    grad: &'pm mut [f32],
    curr: usize,
}

impl<'pm> BackIter<'pm> {
    /// Yields the previous layer's parameters and gradient.
    ///
    /// # Arguments
    /// * `size` - The amount of parameters the layer expects.
    ///
    /// # Returns
    /// An error if the layers are exhausted, the previous one is frozen or it has a
    /// different size.
    pub fn next(&mut self, size: usize) -> Result<(&'pm [f32], &'pm mut [f32])> {
        if self.curr == 0 {
            return Err(MlErr::InvalidLayout(
                "the backward pass went past the first layer".into(),
            ));
        }

        let segments: &'pm [Segment] = self.segments;
        let segment = &segments[self.curr - 1];

        if !segment.trainable {
            return Err(MlErr::InvalidLayout(format!(
                "layer {} is frozen and has no gradient",
                segment.name
            )));
        }

        if segment.size != size {
            return Err(MlErr::SizeMismatch {
                what: "layer gradient",
                got: size,
                expected: segment.size,
            });
        }

        self.curr -= 1;

        // The remaining gradient always ends where the current segment ends.
        let grad = mem::take(&mut self.grad);
        let (head, tail) = grad.split_at_mut(segment.offset);
        self.grad = head;

        let params: &'pm [f32] = self.params;
        Ok((&params[segment.range()], tail))
    }

    /// Whether the previous layer can still yield a gradient.
    pub fn has_trainable(&self) -> bool {
        self.curr > 0 && self.segments[self.curr - 1].trainable
    }
}
