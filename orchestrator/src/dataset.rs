use std::{fs, path::Path};

use log::info;
use machine_learning::{
    MlErr,
    data::{ImageDataset, ImageTransform},
};
use ndarray::{ArrayView4, Axis};
use rayon::prelude::*;
use safetensors::{Dtype, SafeTensors};

use crate::{OrchestratorError, Result, tensors};

/// The name of the `U8` `[N, H, W, 3]` images tensor.
pub const IMAGES: &str = "images";
/// The name of the `I64` `[N]` labels tensor.
pub const LABELS: &str = "labels";

/// Loads a dataset split and runs every image through `transform`.
///
/// # Arguments
/// * `path` - A safetensors file with `images` and `labels`.
/// * `transform` - The preprocessing shared by training and inference.
///
/// # Returns
/// The `[N, 3, S, S]` preprocessed dataset.
pub fn load_dataset(path: &Path, transform: &ImageTransform) -> Result<ImageDataset> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let images = tensors::get(&tensors, IMAGES)?;
    tensors::expect(&images, IMAGES, Dtype::U8, 4)?;
    let labels = tensors::get(&tensors, LABELS)?;
    let labels = tensors::read_labels(&labels, LABELS)?;

    let &[n, h, w, c] = images.shape() else {
        return Err(OrchestratorError::InvalidConfig(format!("{IMAGES} must have rank 4")));
    };

    if n == 0 {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{} holds no images",
            path.display()
        )));
    }

    if labels.len() != n {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{} holds {n} images but {} labels",
            path.display(),
            labels.len()
        )));
    }

    let raw = ArrayView4::from_shape((n, h, w, c), images.data()).map_err(MlErr::from)?;

    let processed = (0..n)
        .into_par_iter()
        .map(|i| transform.apply_hwc(raw.index_axis(Axis(0), i)))
        .collect::<machine_learning::Result<Vec<_>>>()?;

    let views: Vec<_> = processed.iter().map(|image| image.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views).map_err(MlErr::from)?;

    info!("loaded {n} images of {w}x{h} from {}", path.display());
    Ok(ImageDataset::new(stacked, labels)?)
}

/// Writes a dataset split in the layout `load_dataset` reads.
///
/// # Arguments
/// * `path` - The safetensors file to create.
/// * `images` - The `[N, H, W, 3]` raw images.
/// * `labels` - The `N` labels.
pub fn save_dataset(path: &Path, images: ArrayView4<u8>, labels: &[usize]) -> Result<()> {
    if images.len_of(Axis(0)) != labels.len() || images.len_of(Axis(3)) != 3 {
        return Err(OrchestratorError::InvalidConfig(format!(
            "can't save images of shape {:?} with {} labels",
            images.shape(),
            labels.len()
        )));
    }

    let images = images.as_standard_layout();
    let pixels = images.as_slice().unwrap_or_default();
    let labels = tensors::labels_to_i64(labels.iter().copied());

    tensors::write(
        path,
        vec![
            (
                IMAGES.to_string(),
                tensors::view(Dtype::U8, images.shape().to_vec(), pixels)?,
            ),
            (
                LABELS.to_string(),
                tensors::view(Dtype::I64, vec![labels.len()], bytemuck::cast_slice(&labels))?,
            ),
        ],
    )
}

/// Reads a JSON list of class names, indexed by label.
pub fn load_class_names(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn images_are_transformed_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("split.safetensors");
        let images = Array4::from_elem((3, 5, 7, 3), 51u8);

        save_dataset(&path, images.view(), &[0, 2, 2]).unwrap();
        let transform = ImageTransform::new(4, [0.; 3], [1.; 3]).unwrap();
        let dataset = load_dataset(&path, &transform).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.image_shape(), (3, 4, 4));
        assert_eq!(dataset.classes(), vec![0, 2]);
        assert!(dataset.images().iter().all(|v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn label_count_must_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("split.safetensors");
        let images = Array4::<u8>::zeros((2, 4, 4, 3));

        assert!(save_dataset(&path, images.view(), &[0]).is_err());
    }

    #[test]
    fn negative_labels_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("split.safetensors");
        let pixels = vec![0u8; 2 * 2 * 2 * 3];
        let labels: Vec<i64> = vec![0, -1];

        tensors::write(
            &path,
            vec![
                (
                    IMAGES.to_string(),
                    tensors::view(Dtype::U8, vec![2, 2, 2, 3], &pixels).unwrap(),
                ),
                (
                    LABELS.to_string(),
                    tensors::view(Dtype::I64, vec![2], bytemuck::cast_slice(&labels)).unwrap(),
                ),
            ],
        )
        .unwrap();

        let result = load_dataset(&path, &ImageTransform::default());
        assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
    }
}
