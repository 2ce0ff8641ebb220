mod dataloader;
mod dataset;
mod transform;

pub use dataloader::DataLoader;
pub use dataset::{Batch, ImageDataset};
pub use transform::{ImageTransform, RawImage, TRANSFORM_VERSION};
