//! The flat parameter buffer of a model and the views over it.
//!
//! Every layer owns a named, contiguous segment of one `Vec<f32>`. Layers are visited
//! forward with a `FrontIter` and backward with a `BackIter`, the latter only ever
//! yielding the trainable suffix of the layout.

mod layout;
mod manager;

pub use layout::{LayerInfo, ParamHandle, ParamLayout, Segment, TrainableSet};
pub use manager::{BackIter, FrontIter, ParamManager};
