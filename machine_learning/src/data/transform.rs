use image::{
    RgbImage,
    imageops::{self, FilterType},
};
use ndarray::prelude::*;
use specs::machine_learning::TransformSpec;

use crate::{MlErr, Result};

/// The version of the preprocessing this build implements.
pub const TRANSFORM_VERSION: u32 = 1;

/// An RGB image with 8 bits per channel, stored row by row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage(RgbImage);

impl RawImage {
    /// Creates a new `RawImage`.
    ///
    /// # Arguments
    /// * `width`, `height` - The image's size in pixels.
    /// * `pixels` - The interleaved `R, G, B` values, `height * width * 3` of them.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MlErr::InvalidSpec("an image needs at least one pixel".into()));
        }

        let expected = width * height * 3;
        let size_mismatch = |got| MlErr::SizeMismatch {
            what: "image pixels",
            got,
            expected,
        };

        if pixels.len() != expected {
            return Err(size_mismatch(pixels.len()));
        }

        let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
            return Err(MlErr::InvalidSpec(format!(
                "a {width}x{height} image is too large"
            )));
        };

        let got = pixels.len();
        RgbImage::from_raw(w, h, pixels)
            .map(Self)
            .ok_or_else(|| size_mismatch(got))
    }

    /// Wraps a decoded image.
    pub fn from_rgb(image: RgbImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(MlErr::InvalidSpec("an image needs at least one pixel".into()));
        }

        Ok(Self(image))
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    pub fn pixels(&self) -> &[u8] {
        self.0.as_raw()
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.0
    }
}

/// The deterministic preprocessing shared by training, evaluation and inference.
///
/// An RGB image of any size is resized to `size × size` with a triangle (bilinear) filter,
/// scaled to `[0, 1]` and normalized per channel with `(x - mean) / std`, giving a
/// `[3, size, size]` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTransform {
    size: usize,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImageTransform {
    /// Creates a new `ImageTransform`.
    ///
    /// # Returns
    /// An error if the size is zero or a standard deviation isn't positive.
    pub fn new(size: usize, mean: [f32; 3], std: [f32; 3]) -> Result<Self> {
        if size == 0 || u32::try_from(size).is_err() {
            return Err(MlErr::InvalidSpec(format!(
                "the transform size must be a positive u32, got {size}"
            )));
        }

        if std.iter().any(|&s| !(s > 0.) || !s.is_finite()) {
            return Err(MlErr::InvalidSpec(format!(
                "the transform standard deviations must be positive, got {std:?}"
            )));
        }

        Ok(Self { size, mean, std })
    }

    /// Creates the `ImageTransform` described by `spec`.
    ///
    /// # Returns
    /// An error if the spec asks for a version this build doesn't implement.
    pub fn from_spec(spec: &TransformSpec) -> Result<Self> {
        if spec.version != TRANSFORM_VERSION {
            return Err(MlErr::InvalidSpec(format!(
                "transform version {} is not supported, expected {TRANSFORM_VERSION}",
                spec.version
            )));
        }

        Self::new(spec.size, spec.mean, spec.std)
    }

    /// The spec this transform can be rebuilt from.
    pub fn spec(&self) -> TransformSpec {
        TransformSpec {
            version: TRANSFORM_VERSION,
            size: self.size,
            mean: self.mean,
            std: self.std,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Preprocesses a raw image.
    ///
    /// # Returns
    /// The `[3, size, size]` normalized tensor.
    pub fn apply(&self, image: &RawImage) -> Result<Array3<f32>> {
        let side = self.size as u32;
        let resized = imageops::resize(image.as_rgb(), side, side, FilterType::Triangle);

        let tensor = Array3::from_shape_fn((3, self.size, self.size), |(c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.;
            (value - self.mean[c]) / self.std[c]
        });

        Ok(tensor)
    }

    /// Preprocesses an `[H, W, 3]` image.
    pub fn apply_hwc(&self, image: ArrayView3<u8>) -> Result<Array3<f32>> {
        let (h, w, c) = image.dim();

        if c != 3 {
            return Err(MlErr::SizeMismatch {
                what: "image channels",
                got: c,
                expected: 3,
            });
        }

        let pixels = image.iter().copied().collect();
        self.apply(&RawImage::new(w, h, pixels)?)
    }
}

impl Default for ImageTransform {
    fn default() -> Self {
        let spec = TransformSpec::default();

        Self {
            size: spec.size,
            mean: spec.mean,
            std: spec.std,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(size: usize) -> ImageTransform {
        ImageTransform::new(size, [0.; 3], [1.; 3]).unwrap()
    }

    #[test]
    fn same_size_only_rescales() {
        let pixels: Vec<u8> = (0..2 * 2 * 3).map(|v| (v * 20) as u8).collect();
        let image = RawImage::new(2, 2, pixels).unwrap();

        let tensor = identity(2).apply(&image).unwrap();

        assert_eq!(tensor.dim(), (3, 2, 2));
        // pixel (y=1, x=0) is the third one, its green value is 20 * (2 * 3 + 1)
        assert!((tensor[[1, 1, 0]] - 140. / 255.).abs() < 1e-6);
    }

    #[test]
    fn uniform_images_stay_uniform() {
        let image = RawImage::new(5, 3, vec![51; 5 * 3 * 3]).unwrap();
        let transform = ImageTransform::new(4, [0.1, 0.2, 0.3], [0.5, 0.5, 0.5]).unwrap();

        let tensor = transform.apply(&image).unwrap();

        for c in 0..3 {
            let expected = (0.2 - [0.1, 0.2, 0.3][c]) / 0.5;
            assert!(tensor.index_axis(Axis(0), c).iter().all(|v| (v - expected).abs() < 1e-5));
        }
    }

    #[test]
    fn downscaling_averages_neighbours() {
        // 2x1 image, black then white, resized to a single pixel.
        let image = RawImage::new(2, 1, vec![0, 0, 0, 255, 255, 255]).unwrap();
        let tensor = identity(1).apply(&image).unwrap();

        assert!(tensor.iter().all(|v| (v - 0.5).abs() < 1. / 255.));
    }

    #[test]
    fn is_deterministic() {
        let pixels: Vec<u8> = (0..7 * 5 * 3).map(|v| (v * 37 % 256) as u8).collect();
        let image = RawImage::new(7, 5, pixels).unwrap();
        let transform = ImageTransform::default();

        assert_eq!(transform.apply(&image).unwrap(), transform.apply(&image).unwrap());
    }

    #[test]
    fn spec_round_trip_and_versions() {
        let transform = ImageTransform::new(32, [0.5; 3], [0.25; 3]).unwrap();
        assert_eq!(ImageTransform::from_spec(&transform.spec()).unwrap(), transform);

        let mut spec = transform.spec();
        spec.version = 2;
        assert!(ImageTransform::from_spec(&spec).is_err());
    }

    #[test]
    fn invalid_inputs() {
        assert!(RawImage::new(2, 2, vec![0; 5]).is_err());
        assert!(ImageTransform::new(4, [0.; 3], [1., 0., 1.]).is_err());

        let gray = Array3::<u8>::zeros((2, 2, 1));
        assert!(identity(2).apply_hwc(gray.view()).is_err());

        let empty = Array3::<u8>::zeros((0, 2, 3));
        assert!(identity(2).apply_hwc(empty.view()).is_err());
        assert!(RawImage::from_rgb(RgbImage::new(0, 0)).is_err());
    }

    #[test]
    fn hwc_arrays_and_decoded_images_agree() {
        let pixels: Vec<u8> = (0..6 * 4 * 3).map(|v| (v * 11 % 256) as u8).collect();
        let array = Array3::from_shape_vec((4, 6, 3), pixels.clone()).unwrap();
        let decoded = RgbImage::from_raw(6, 4, pixels).unwrap();
        let transform = ImageTransform::new(3, [0.5; 3], [0.25; 3]).unwrap();

        let from_array = transform.apply_hwc(array.view()).unwrap();
        let from_image = transform.apply(&RawImage::from_rgb(decoded).unwrap()).unwrap();

        assert_eq!(from_array, from_image);
        assert_eq!(from_array.dim(), (3, 3, 3));
    }

    #[test]
    fn upscaling_interpolates_between_pixels() {
        // 2x1 image, black then white, resized to 4x4: the columns ramp up monotonically.
        let image = RawImage::new(2, 1, vec![0, 0, 0, 255, 255, 255]).unwrap();
        let tensor = identity(4).apply(&image).unwrap();
        let row = tensor.slice(s![0, 0, ..]);

        assert!(row.windows(2).into_iter().all(|w| w[0] <= w[1]));
        assert!(row[0] < 0.5 && row[3] > 0.5);
    }
}
