pub mod activations;
mod builder;
mod embedder;
pub mod extractor;
pub mod layers;
pub mod loss;

pub use builder::{BuiltEmbedder, EmbedderBuilder};
pub use embedder::{Embedder, HEAD};
