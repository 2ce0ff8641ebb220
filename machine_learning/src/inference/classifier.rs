use ndarray::{ArrayView1, ArrayView3, Axis};

use super::{Classification, nearest_prototype};
use crate::{
    MlErr, Result,
    arch::{
        Embedder,
        extractor::{FeatureExtractor, PatchEncoder},
    },
    data::{ImageTransform, RawImage},
    params::ParamManager,
    prototypes::PrototypeTable,
};

/// Classifies images by the nearest class prototype in embedding space.
///
/// Nothing is mutated after construction, so classifying the same image twice gives the
/// same result.
#[derive(Debug)]
pub struct PrototypeClassifier<E: FeatureExtractor = PatchEncoder> {
    embedder: Embedder<E>,
    params: ParamManager,
    table: PrototypeTable,
    transform: ImageTransform,
}

impl<E: FeatureExtractor> PrototypeClassifier<E> {
    /// Creates a new `PrototypeClassifier`.
    ///
    /// # Arguments
    /// * `embedder` - The trained model.
    /// * `params` - The trained model's parameters.
    /// * `table` - The persistent prototypes.
    /// * `transform` - The preprocessing the model was trained with.
    ///
    /// # Returns
    /// An error if the table is empty or its dimension isn't the embedding dimension.
    pub fn new(
        embedder: Embedder<E>,
        params: ParamManager,
        table: PrototypeTable,
        transform: ImageTransform,
    ) -> Result<Self> {
        if table.is_empty() {
            return Err(MlErr::EmptyPrototypeTable);
        }

        if table.dim() != embedder.embedding_dim() {
            return Err(MlErr::SizeMismatch {
                what: "prototype dimension",
                got: table.dim(),
                expected: embedder.embedding_dim(),
            });
        }

        Ok(Self {
            embedder,
            params,
            table,
            transform,
        })
    }

    pub fn table(&self) -> &PrototypeTable {
        &self.table
    }

    pub fn transform(&self) -> &ImageTransform {
        &self.transform
    }

    pub fn embedder(&self) -> &Embedder<E> {
        &self.embedder
    }

    /// Classifies an already computed embedding.
    pub fn classify_embedding(&self, embedding: ArrayView1<f32>) -> Result<Classification> {
        nearest_prototype(embedding, &self.table)
    }

    /// Classifies a preprocessed `[C, H, W]` image.
    pub fn classify(&self, image: ArrayView3<f32>) -> Result<Classification> {
        let batch = image.insert_axis(Axis(0));
        let embeddings = self.embedder.embed(&self.params, batch)?;

        self.classify_embedding(embeddings.row(0))
    }

    /// Preprocesses a raw RGB image and classifies it.
    pub fn classify_raw(&self, image: &RawImage) -> Result<Classification> {
        let tensor = self.transform.apply(image)?;
        self.classify(tensor.view())
    }
}
