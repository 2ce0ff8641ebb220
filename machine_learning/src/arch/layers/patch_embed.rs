use ndarray::{prelude::*, s};

use crate::{MlErr, Result};

/// Turns `[B, C, H, W]` images into a `[B, 1 + N, F]` token sequence.
///
/// The image is cut into `N` non-overlapping `P×P` patches, each flattened in channel,
/// row, column order and linearly projected to width `F`. A learned positional embedding
/// is added to every patch token. Token 0 is the summary token, a learned class embedding
/// plus the mean of the patch tokens.
///
/// The parameters are laid out as the `[C·P·P, F]` projection, the `F` biases, the
/// `[N, F]` positional embedding and the `F` class embedding.
#[derive(Clone, Debug)]
pub struct PatchEmbed {
    channels: usize,
    image_size: usize,
    patch_size: usize,
    width: usize,
}

impl PatchEmbed {
    /// Creates a new `PatchEmbed`.
    ///
    /// # Returns
    /// An error if the image can't be evenly split in patches.
    pub fn new(
        channels: usize,
        image_size: usize,
        patch_size: usize,
        width: usize,
    ) -> Result<Self> {
        if channels == 0 || width == 0 || patch_size == 0 || image_size == 0 {
            return Err(MlErr::InvalidSpec(
                "channels, image size, patch size and width must be positive".into(),
            ));
        }

        if image_size % patch_size != 0 {
            return Err(MlErr::InvalidSpec(format!(
                "image size {image_size} is not divisible by patch size {patch_size}"
            )));
        }

        Ok(Self {
            channels,
            image_size,
            patch_size,
            width,
        })
    }

    /// The expected `(C, H, W)` of every image.
    pub fn input_shape(&self) -> (usize, usize, usize) {
        (self.channels, self.image_size, self.image_size)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// The amount of values in a flattened patch.
    pub fn patch_dim(&self) -> usize {
        self.channels * self.patch_size * self.patch_size
    }

    pub fn num_patches(&self) -> usize {
        (self.image_size / self.patch_size).pow(2)
    }

    pub fn num_tokens(&self) -> usize {
        self.num_patches() + 1
    }

    /// The sizes of the projection weights, biases, positional and class embeddings.
    pub fn part_sizes(&self) -> [usize; 4] {
        let f = self.width;
        [self.patch_dim() * f, f, self.num_patches() * f, f]
    }

    pub fn size(&self) -> usize {
        self.part_sizes().iter().sum()
    }

    /// Embeds a batch of images.
    ///
    /// # Arguments
    /// * `params` - This layer's parameters.
    /// * `images` - A `[B, C, H, W]` batch.
    ///
    /// # Returns
    /// The `[B, 1 + N, F]` token sequence.
    pub fn apply(&self, params: &[f32], images: ArrayView4<f32>) -> Result<Array3<f32>> {
        let (c, h, w) = (images.dim().1, images.dim().2, images.dim().3);
        let expected = self.input_shape();

        if (c, h, w) != expected {
            return Err(MlErr::SizeMismatch {
                what: "image values",
                got: c * h * w,
                expected: expected.0 * expected.1 * expected.2,
            });
        }

        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "patch embedding parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let [w_size, b_size, pos_size, _] = self.part_sizes();
        let (w_raw, rest) = params.split_at(w_size);
        let (b_raw, rest) = rest.split_at(b_size);
        let (pos_raw, cls_raw) = rest.split_at(pos_size);

        let (b, n, f) = (images.dim().0, self.num_patches(), self.width);
        let proj = ArrayView2::from_shape((self.patch_dim(), f), w_raw)?;
        let bias = ArrayView1::from_shape(f, b_raw)?;
        let pos = ArrayView2::from_shape((n, f), pos_raw)?;
        let cls = ArrayView1::from_shape(f, cls_raw)?;

        let mut patches = self.patchify(images).dot(&proj);
        patches += &bias;
        let mut patches = patches.into_shape_with_order((b, n, f))?;
        patches += &pos;

        let mut summary = patches.sum_axis(Axis(1)) / n as f32;
        summary += &cls;

        let mut tokens = Array3::zeros((b, n + 1, f));
        tokens.slice_mut(s![.., 0, ..]).assign(&summary);
        tokens.slice_mut(s![.., 1.., ..]).assign(&patches);
        Ok(tokens)
    }

    /// Flattens every patch of every image into a `[B·N, C·P·P]` matrix.
    fn patchify(&self, images: ArrayView4<f32>) -> Array2<f32> {
        let p = self.patch_size;
        let grid = self.image_size / p;
        let n = grid * grid;

        let mut patches = Array2::zeros((images.dim().0 * n, self.patch_dim()));

        for (i, mut row) in patches.outer_iter_mut().enumerate() {
            let (image, patch) = (i / n, i % n);
            let (y, x) = ((patch / grid) * p, (patch % grid) * p);
            let window = images.slice(s![image, .., y..y + p, x..x + p]);

            row.iter_mut().zip(window.iter()).for_each(|(r, &v)| *r = v);
        }

        patches
    }
}
