mod patch_encoder;

use ndarray::{ArrayD, ArrayView4};

pub use patch_encoder::{FeatureOutput, PatchEncoder};

use crate::{
    Result,
    params::{BackIter, FrontIter, LayerInfo},
};

/// A backbone turning image batches into features.
///
/// The output is either pooled, `[B, F]`, or a token sequence, `[B, T, F]`. Layers are
/// declared in forward order and their trainable ones must form a suffix.
pub trait FeatureExtractor {
    /// The expected `(C, H, W)` of every image.
    fn input_shape(&self) -> (usize, usize, usize);

    /// The width `F` of every feature vector.
    fn width(&self) -> usize;

    /// The layers of this extractor, in forward order.
    fn layers(&self) -> Vec<LayerInfo>;

    /// Extracts features, caching what `backward` needs.
    fn forward(
        &mut self,
        params: &mut FrontIter<'_>,
        images: ArrayView4<f32>,
    ) -> Result<ArrayD<f32>>;

    /// Extracts features without caching anything.
    fn apply(&self, params: &mut FrontIter<'_>, images: ArrayView4<f32>) -> Result<ArrayD<f32>>;

    /// Back-propagates the gradient of the features through the trainable layers.
    ///
    /// # Arguments
    /// * `params` - The trainable layers' parameters and gradients, walking backwards.
    /// * `d` - The gradient of the loss with respect to the last `forward` output.
    fn backward(&mut self, params: &mut BackIter<'_>, d: ArrayD<f32>) -> Result<()>;
}
