mod classifier;
mod nearest;

pub use classifier::PrototypeClassifier;
pub use nearest::{Classification, nearest_prototype};
