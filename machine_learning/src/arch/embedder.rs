use ndarray::{IxDyn, prelude::*};

use super::{
    extractor::{FeatureExtractor, PatchEncoder},
    layers::{Dense, L2Norm},
};
use crate::{
    MlErr, Result,
    params::{LayerInfo, ParamManager},
};

/// The name of the projection head's layer.
pub const HEAD: &str = "head";

/// Maps `[B, C, H, W]` images to `[B, D]` unit-norm embeddings.
///
/// The pipeline is feature extraction, summary token selection when the extractor returns
/// a token sequence, a linear projection to `D` and L2 normalization. The projection
/// head is always trainable.
#[derive(Clone, Debug)]
pub struct Embedder<E: FeatureExtractor = PatchEncoder> {
    extractor: E,
    head: Dense,
    norm: L2Norm,
    summary_token: usize,

    // Forward metadata
    feature_shape: Vec<usize>,
}

impl<E: FeatureExtractor> Embedder<E> {
    /// Creates a new `Embedder`.
    ///
    /// # Arguments
    /// * `extractor` - The backbone.
    /// * `embedding_dim` - The dimension `D` of the embeddings.
    /// * `summary_token` - The token that represents the whole image in a sequence output.
    pub fn new(extractor: E, embedding_dim: usize, summary_token: usize) -> Result<Self> {
        if embedding_dim == 0 {
            return Err(MlErr::InvalidSpec("the embedding dimension must be positive".into()));
        }

        let head = Dense::new((extractor.width(), embedding_dim), None);

        Ok(Self {
            extractor,
            head,
            norm: L2Norm::new(),
            summary_token,
            feature_shape: Vec::new(),
        })
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn embedding_dim(&self) -> usize {
        self.head.dim().1
    }

    /// Every layer of the model, in forward order.
    pub fn layers(&self) -> Vec<LayerInfo> {
        let mut layers = self.extractor.layers();
        layers.push(LayerInfo::new(HEAD, self.head.size(), true));
        layers
    }

    /// Embeds a batch of images without keeping anything for a backward pass.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `images` - A `[B, C, H, W]` batch.
    ///
    /// # Returns
    /// The `[B, D]` embeddings, every row with unit norm.
    pub fn embed(&self, params: &ParamManager, images: ArrayView4<f32>) -> Result<Array2<f32>> {
        self.check_input(images)?;

        let mut front = params.front();
        let features = self.extractor.apply(&mut front, images)?;
        let summary = self.select_summary(features)?;
        let z = self.head.apply(front.next(self.head.size())?, summary.view())?;

        Ok(L2Norm::apply(z))
    }

    /// Embeds a batch of images, caching what `backward` needs.
    pub fn forward(
        &mut self,
        params: &ParamManager,
        images: ArrayView4<f32>,
    ) -> Result<Array2<f32>> {
        self.check_input(images)?;

        let mut front = params.front();
        let features = self.extractor.forward(&mut front, images)?;
        self.feature_shape = features.shape().to_vec();

        let summary = self.select_summary(features)?;
        let z = self.head.forward(front.next(self.head.size())?, summary.view())?;

        Ok(self.norm.forward(z))
    }

    /// Back-propagates the gradient of the embeddings of the last `forward` call into the
    /// gradient of every trainable layer.
    ///
    /// # Arguments
    /// * `params` - The model's parameters.
    /// * `d` - The `[B, D]` gradient of the loss with respect to the embeddings.
    pub fn backward(&mut self, params: &mut ParamManager, d: Array2<f32>) -> Result<()> {
        let dz = self.norm.backward(d)?;

        let mut back = params.back();
        let (head_params, head_grad) = back.next(self.head.size())?;
        let d_summary = self.head.backward(head_params, head_grad, dz)?;

        if !back.has_trainable() {
            return Ok(());
        }

        let d_features = match self.feature_shape.len() {
            3 => {
                let mut d = ArrayD::zeros(IxDyn(&self.feature_shape));
                d.index_axis_mut(Axis(1), self.summary_token)
                    .assign(&d_summary.into_dyn());
                d
            }
            _ => d_summary.into_dyn(),
        };

        self.extractor.backward(&mut back, d_features)
    }

    fn check_input(&self, images: ArrayView4<f32>) -> Result<()> {
        let (b, c, h, w) = images.dim();
        let (ec, eh, ew) = self.extractor.input_shape();

        if b == 0 {
            return Err(MlErr::EmptyBatch);
        }

        let check = |what, got, expected| {
            if got == expected {
                Ok(())
            } else {
                Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected,
                })
            }
        };

        check("image channels", c, ec)?;
        check("image height", h, eh)?;
        check("image width", w, ew)
    }

    /// Reduces the extractor's output to one feature vector per image.
    fn select_summary(&self, features: ArrayD<f32>) -> Result<Array2<f32>> {
        match features.ndim() {
            2 => Ok(features.into_dimensionality::<Ix2>()?),
            3 => {
                let tokens = features.into_dimensionality::<Ix3>()?;

                if self.summary_token >= tokens.dim().1 {
                    return Err(MlErr::InvalidSpec(format!(
                        "summary token {} is out of range for a sequence of {} tokens",
                        self.summary_token,
                        tokens.dim().1
                    )));
                }

                Ok(tokens.index_axis(Axis(1), self.summary_token).to_owned())
            }
            got => Err(MlErr::UnsupportedRank { got }),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray_rand::{RandomExt, rand_distr::StandardNormal};

    use super::*;
    use crate::params::{BackIter, FrontIter, ParamLayout};

    /// Hands the raw pixels over as features, either flattened or untouched.
    struct RawPixels {
        flatten: bool,
    }

    impl FeatureExtractor for RawPixels {
        fn input_shape(&self) -> (usize, usize, usize) {
            (1, 2, 2)
        }

        fn width(&self) -> usize {
            4
        }

        fn layers(&self) -> Vec<LayerInfo> {
            Vec::new()
        }

        fn forward(
            &mut self,
            params: &mut FrontIter<'_>,
            images: ArrayView4<f32>,
        ) -> Result<ArrayD<f32>> {
            self.apply(params, images)
        }

        fn apply(&self, _: &mut FrontIter<'_>, images: ArrayView4<f32>) -> Result<ArrayD<f32>> {
            if self.flatten {
                let b = images.dim().0;
                Ok(images.to_owned().into_shape_with_order((b, 4))?.into_dyn())
            } else {
                Ok(images.to_owned().into_dyn())
            }
        }

        fn backward(&mut self, _: &mut BackIter<'_>, _: ArrayD<f32>) -> Result<()> {
            Ok(())
        }
    }

    fn model<E: FeatureExtractor>(extractor: E, dim: usize) -> (Embedder<E>, ParamManager) {
        let embedder = Embedder::new(extractor, dim, 0).unwrap();
        let layout = ParamLayout::new(embedder.layers()).unwrap();
        let params = (0..layout.size())
            .map(|i| ((i * 13 % 7) as f32 - 3.) / 5.)
            .collect();

        (embedder, ParamManager::new(layout, params).unwrap())
    }

    #[test]
    fn embeddings_have_unit_norm() {
        let (embedder, params) = model(RawPixels { flatten: true }, 3);
        let images = Array4::random((5, 1, 2, 2), StandardNormal);

        let embeddings = embedder.embed(&params, images.view()).unwrap();

        assert_eq!(embeddings.dim(), (5, 3));
        for row in embeddings.outer_iter() {
            assert!((row.dot(&row).sqrt() - 1.).abs() < 1e-5);
        }
    }

    #[test]
    fn embed_and_forward_agree() {
        let (mut embedder, params) = model(RawPixels { flatten: true }, 3);
        let images = Array4::random((2, 1, 2, 2), StandardNormal);

        let embedded = embedder.embed(&params, images.view()).unwrap();
        let forwarded = embedder.forward(&params, images.view()).unwrap();

        assert_eq!(embedded, forwarded);
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let (embedder, params) = model(RawPixels { flatten: true }, 3);

        let wrong_channels = Array4::zeros((1, 3, 2, 2));
        assert!(matches!(
            embedder.embed(&params, wrong_channels.view()),
            Err(MlErr::SizeMismatch { got: 3, expected: 1, .. })
        ));

        let wrong_side = Array4::zeros((1, 1, 4, 2));
        assert!(matches!(
            embedder.embed(&params, wrong_side.view()),
            Err(MlErr::SizeMismatch { got: 4, expected: 2, .. })
        ));

        let empty = Array4::zeros((0, 1, 2, 2));
        assert!(matches!(
            embedder.embed(&params, empty.view()),
            Err(MlErr::EmptyBatch)
        ));
    }

    #[test]
    fn features_must_be_a_vector_or_a_sequence() {
        let (embedder, params) = model(RawPixels { flatten: false }, 3);
        let images = Array4::zeros((1, 1, 2, 2));

        assert!(matches!(
            embedder.embed(&params, images.view()),
            Err(MlErr::UnsupportedRank { got: 4 })
        ));
    }

    #[test]
    fn zero_embedding_dimension() {
        assert!(Embedder::new(RawPixels { flatten: true }, 0, 0).is_err());
    }
}
