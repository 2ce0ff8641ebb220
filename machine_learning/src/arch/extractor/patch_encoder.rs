use ndarray::{prelude::*, s};

use super::FeatureExtractor;
use crate::{
    MlErr, Result,
    arch::{
        activations::ActFn,
        layers::{Block, PatchEmbed},
    },
    params::{BackIter, FrontIter, LayerInfo},
};

/// What the patch encoder returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FeatureOutput {
    /// Every token, `[B, 1 + N, F]`.
    #[default]
    Sequence,
    /// The summary token only, `[B, F]`.
    Pooled,
}

/// A small vision transformer without attention: a patch embedding followed by residual
/// MLP blocks applied to every token.
///
/// The patch embedding is always frozen, only the last `trainable_blocks` blocks can be
/// fine-tuned.
#[derive(Clone, Debug)]
pub struct PatchEncoder {
    embed: PatchEmbed,
    blocks: Vec<Block>,
    trainable_blocks: usize,
    output: FeatureOutput,
}

impl PatchEncoder {
    /// Creates a new `PatchEncoder`.
    ///
    /// # Arguments
    /// * `embed` - The patch embedding.
    /// * `blocks` - The residual blocks, in forward order.
    /// * `trainable_blocks` - How many of the last blocks are trainable.
    /// * `output` - Whether the encoder returns the whole sequence or the summary token.
    pub fn new(
        embed: PatchEmbed,
        blocks: Vec<Block>,
        trainable_blocks: usize,
        output: FeatureOutput,
    ) -> Result<Self> {
        if trainable_blocks > blocks.len() {
            return Err(MlErr::InvalidSpec(format!(
                "{trainable_blocks} trainable blocks requested but the encoder has {}",
                blocks.len()
            )));
        }

        Ok(Self {
            embed,
            blocks,
            trainable_blocks,
            output,
        })
    }

    /// Builds the encoder with `depth` identical blocks.
    pub fn with_depth(
        embed: PatchEmbed,
        depth: usize,
        hidden: usize,
        act_fn: ActFn,
        trainable_blocks: usize,
        output: FeatureOutput,
    ) -> Result<Self> {
        let width = embed.width();
        let blocks = (0..depth).map(|_| Block::new(width, hidden, act_fn)).collect();
        Self::new(embed, blocks, trainable_blocks, output)
    }

    pub fn patch_embed(&self) -> &PatchEmbed {
        &self.embed
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn first_trainable(&self) -> usize {
        self.blocks.len() - self.trainable_blocks
    }

    /// Embeds the patches and lays the tokens out as rows, keeping only the summary token
    /// when the output is pooled.
    fn tokens_as_rows(
        &self,
        params: &mut FrontIter<'_>,
        images: ArrayView4<f32>,
    ) -> Result<(Array2<f32>, usize)> {
        let tokens = self.embed.apply(params.next(self.embed.size())?, images)?;
        let (b, t, f) = tokens.dim();

        let rows = match self.output {
            FeatureOutput::Sequence => tokens.into_shape_with_order((b * t, f))?,
            FeatureOutput::Pooled => tokens.slice(s![.., 0, ..]).to_owned(),
        };

        Ok((rows, t))
    }

    fn rows_as_output(&self, rows: Array2<f32>, tokens: usize) -> Result<ArrayD<f32>> {
        let features = match self.output {
            FeatureOutput::Sequence => {
                let (bt, f) = rows.dim();
                rows.into_shape_with_order((bt / tokens, tokens, f))?.into_dyn()
            }
            FeatureOutput::Pooled => rows.into_dyn(),
        };

        Ok(features)
    }
}

impl FeatureExtractor for PatchEncoder {
    fn input_shape(&self) -> (usize, usize, usize) {
        self.embed.input_shape()
    }

    fn width(&self) -> usize {
        self.embed.width()
    }

    fn layers(&self) -> Vec<LayerInfo> {
        let first_trainable = self.first_trainable();

        let blocks = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, block)| {
                LayerInfo::new(format!("blocks.{i}"), block.size(), i >= first_trainable)
            });

        std::iter::once(LayerInfo::new("patch_embed", self.embed.size(), false))
            .chain(blocks)
            .collect()
    }

    fn forward(
        &mut self,
        params: &mut FrontIter<'_>,
        images: ArrayView4<f32>,
    ) -> Result<ArrayD<f32>> {
        let (mut x, tokens) = self.tokens_as_rows(params, images)?;
        let first_trainable = self.first_trainable();

        for (i, block) in self.blocks.iter_mut().enumerate() {
            let block_params = params.next(block.size())?;

            x = if i < first_trainable {
                block.apply(block_params, x.view())?
            } else {
                block.forward(block_params, x.view())?
            };
        }

        self.rows_as_output(x, tokens)
    }

    fn apply(&self, params: &mut FrontIter<'_>, images: ArrayView4<f32>) -> Result<ArrayD<f32>> {
        let (mut x, tokens) = self.tokens_as_rows(params, images)?;

        for block in &self.blocks {
            x = block.apply(params.next(block.size())?, x.view())?;
        }

        self.rows_as_output(x, tokens)
    }

    fn backward(&mut self, params: &mut BackIter<'_>, d: ArrayD<f32>) -> Result<()> {
        let width = self.width();
        let rows = d.len() / width;
        let mut d = d.into_shape_with_order((rows, width))?;

        let first_trainable = self.first_trainable();

        for block in self.blocks[first_trainable..].iter_mut().rev() {
            let (block_params, grad) = params.next(block.size())?;
            d = block.backward(block_params, grad, d)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray_rand::{RandomExt, rand_distr::StandardNormal};

    use super::*;
    use crate::params::{ParamLayout, ParamManager};

    fn encoder(output: FeatureOutput) -> PatchEncoder {
        let embed = PatchEmbed::new(3, 8, 4, 6).unwrap();
        PatchEncoder::with_depth(embed, 3, 10, ActFn::gelu(), 2, output).unwrap()
    }

    fn manager(encoder: &PatchEncoder) -> ParamManager {
        let layout = ParamLayout::new(encoder.layers()).unwrap();
        let params = (0..layout.size())
            .map(|i| ((i * 31 % 17) as f32 - 8.) / 40.)
            .collect();

        ParamManager::new(layout, params).unwrap()
    }

    #[test]
    fn layers_freeze_the_embedding_and_the_first_blocks() {
        let layers = encoder(FeatureOutput::Sequence).layers();
        let names: Vec<_> = layers.iter().map(|l| (l.name.as_str(), l.trainable)).collect();

        assert_eq!(
            names,
            [
                ("patch_embed", false),
                ("blocks.0", false),
                ("blocks.1", true),
                ("blocks.2", true)
            ]
        );
    }

    #[test]
    fn too_many_trainable_blocks() {
        let embed = PatchEmbed::new(3, 8, 4, 6).unwrap();

        assert!(matches!(
            PatchEncoder::with_depth(embed, 1, 4, ActFn::relu(), 2, FeatureOutput::Pooled),
            Err(MlErr::InvalidSpec(_))
        ));
    }

    #[test]
    fn pooled_output_is_the_summary_token_of_the_sequence() {
        let sequence = encoder(FeatureOutput::Sequence);
        let pooled = encoder(FeatureOutput::Pooled);
        let manager = manager(&sequence);
        let images = Array4::random((2, 3, 8, 8), StandardNormal);

        let tokens = sequence.apply(&mut manager.front(), images.view()).unwrap();
        let summary = pooled.apply(&mut manager.front(), images.view()).unwrap();

        assert_eq!(tokens.shape(), [2, 5, 6]);
        assert_eq!(summary.shape(), [2, 6]);

        let first = tokens.slice(s![.., 0, ..]);
        for (a, b) in first.iter().zip(summary.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn forward_and_apply_agree() {
        let mut encoder = encoder(FeatureOutput::Sequence);
        let manager = manager(&encoder);
        let images = Array4::random((1, 3, 8, 8), StandardNormal);

        let applied = encoder.apply(&mut manager.front(), images.view()).unwrap();
        let forwarded = encoder.forward(&mut manager.front(), images.view()).unwrap();

        assert_eq!(applied, forwarded);
    }
}
