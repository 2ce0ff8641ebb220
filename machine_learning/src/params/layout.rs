use std::{collections::HashSet, ops::Range};

use crate::{MlErr, Result};

/// What a layer declares about its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub size: usize,
    pub trainable: bool,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, size: usize, trainable: bool) -> Self {
        Self {
            name: name.into(),
            size,
            trainable,
        }
    }
}

/// A layer's place in the flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub offset: usize,
    pub size: usize,
    pub trainable: bool,
}

impl Segment {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// The mapping from layer names to ranges of the flat parameter buffer.
///
/// Frozen layers always precede trainable ones, so the backward pass can stop at the
/// first frozen layer it meets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    segments: Vec<Segment>,
    size: usize,
    first_trainable: usize,
}

impl ParamLayout {
    /// Creates a new `ParamLayout`.
    ///
    /// # Arguments
    /// * `layers` - The layers of the model, in forward order.
    ///
    /// # Returns
    /// An error if a name repeats or a frozen layer follows a trainable one.
    pub fn new(layers: Vec<LayerInfo>) -> Result<Self> {
        let mut names = HashSet::with_capacity(layers.len());
        let mut segments = Vec::with_capacity(layers.len());
        let mut offset = 0;
        let mut first_trainable = layers.len();

        for (i, layer) in layers.into_iter().enumerate() {
            if !names.insert(layer.name.clone()) {
                return Err(MlErr::InvalidLayout(format!(
                    "layer name {} is repeated",
                    layer.name
                )));
            }

            if layer.trainable {
                first_trainable = first_trainable.min(i);
            } else if first_trainable < i {
                return Err(MlErr::InvalidLayout(format!(
                    "frozen layer {} comes after a trainable one",
                    layer.name
                )));
            }

            segments.push(Segment {
                name: layer.name,
                offset,
                size: layer.size,
                trainable: layer.trainable,
            });

            offset += layer.size;
        }

        Ok(Self {
            segments,
            size: offset,
            first_trainable,
        })
    }

    /// The total amount of parameters.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.name == name)
    }

    /// The index of the first trainable segment, or the amount of segments if none is.
    pub fn first_trainable(&self) -> usize {
        self.first_trainable
    }

    /// Enumerates the handles the optimizer is allowed to update.
    pub fn trainable_set(&self) -> TrainableSet {
        let handles = self
            .segments
            .iter()
            .enumerate()
            .skip(self.first_trainable)
            .map(|(layer, segment)| ParamHandle {
                layer,
                name: segment.name.clone(),
                range: segment.range(),
            })
            .collect();

        TrainableSet { handles }
    }
}

/// A trainable layer's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamHandle {
    pub layer: usize,
    pub name: String,
    pub range: Range<usize>,
}

/// The explicit, ordered set of parameter handles a model is fine-tuned through.
///
/// Handles are sorted by offset and never overlap.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrainableSet {
    handles: Vec<ParamHandle>,
}

impl TrainableSet {
    pub fn handles(&self) -> &[ParamHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// The amount of trainable parameters.
    pub fn size(&self) -> usize {
        self.handles.iter().map(|h| h.range.len()).sum()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.iter().any(|h| h.name == name)
    }
}
