use std::{cell::RefCell, rc::Rc};

use rand::Rng;
use specs::machine_learning::{ActFnSpec, DistributionSpec, EmbedderSpec, FeatureOutputSpec};

use super::{
    Embedder,
    activations::ActFn,
    extractor::{FeatureOutput, PatchEncoder},
    layers::PatchEmbed,
};
use crate::{
    MlErr, Result,
    initialization::{ChainedWeightGen, ConstWeightGen, RandWeightGen, WeightGen},
    params::{ParamLayout, ParamManager, TrainableSet},
};

/// The standard deviation of the positional and class embeddings.
const EMBEDDING_STD_DEV: f32 = 0.02;

/// An embedder together with its parameters and the handles it is fine-tuned through.
#[derive(Debug)]
pub struct BuiltEmbedder {
    pub embedder: Embedder,
    pub params: ParamManager,
    pub trainable: TrainableSet,
}

/// Builds `Embedder`s given a specification.
#[derive(Default)]
pub struct EmbedderBuilder;

impl EmbedderBuilder {
    /// Creates a new `EmbedderBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new, freshly initialized `Embedder` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the embedder.
    /// * `rng` - The random number generator every weight is sampled with.
    ///
    /// # Returns
    /// The embedder, its parameters and its trainable set, or an error if the spec is invalid.
    pub fn build<R>(&self, spec: &EmbedderSpec, rng: &Rc<RefCell<R>>) -> Result<BuiltEmbedder>
    where
        R: Rng + 'static,
    {
        let embedder = self.resolve_embedder(spec)?;
        let layout = ParamLayout::new(embedder.layers())?;

        let weight_gens = self.resolve_weight_gens(spec, &embedder, rng)?;
        let mut weight_gen = ChainedWeightGen::new(weight_gens);
        let params = weight_gen.sample(layout.size()).unwrap_or_default();

        self.terminate_build(embedder, layout, params)
    }

    /// Rebuilds an `Embedder` from a spec and a parameter snapshot.
    ///
    /// # Arguments
    /// * `spec` - The specification the snapshot was trained with.
    /// * `params` - The flat parameter snapshot.
    pub fn restore(&self, spec: &EmbedderSpec, params: Vec<f32>) -> Result<BuiltEmbedder> {
        let embedder = self.resolve_embedder(spec)?;
        let layout = ParamLayout::new(embedder.layers())?;
        self.terminate_build(embedder, layout, params)
    }

    /// The parameter layout of the `Embedder` a spec describes, without allocating it.
    pub fn layout(&self, spec: &EmbedderSpec) -> Result<ParamLayout> {
        ParamLayout::new(self.resolve_embedder(spec)?.layers())
    }

    fn terminate_build(
        &self,
        embedder: Embedder,
        layout: ParamLayout,
        params: Vec<f32>,
    ) -> Result<BuiltEmbedder> {
        let trainable = layout.trainable_set();
        let params = ParamManager::new(layout, params)?;

        Ok(BuiltEmbedder {
            embedder,
            params,
            trainable,
        })
    }

    fn resolve_embedder(&self, spec: &EmbedderSpec) -> Result<Embedder> {
        let ex = &spec.extractor;

        let embed = PatchEmbed::new(ex.channels, ex.image_size, ex.patch_size, ex.width)?;
        let output = match ex.output {
            FeatureOutputSpec::Sequence => FeatureOutput::Sequence,
            FeatureOutputSpec::Pooled => FeatureOutput::Pooled,
        };

        if ex.hidden == 0 {
            return Err(MlErr::InvalidSpec("the block hidden width must be positive".into()));
        }

        if output == FeatureOutput::Pooled && spec.summary_token != 0 {
            return Err(MlErr::InvalidSpec(
                "a pooled extractor only has the summary token 0".into(),
            ));
        }

        if spec.summary_token >= embed.num_tokens() {
            return Err(MlErr::InvalidSpec(format!(
                "summary token {} is out of range for {} tokens",
                spec.summary_token,
                embed.num_tokens()
            )));
        }

        let encoder = PatchEncoder::with_depth(
            embed,
            ex.depth,
            ex.hidden,
            self.resolve_act_fn(ex.act_fn),
            spec.trainable_blocks,
            output,
        )?;

        Embedder::new(encoder, spec.embedding_dim, spec.summary_token)
    }

    fn resolve_act_fn(&self, spec: ActFnSpec) -> ActFn {
        match spec {
            ActFnSpec::Sigmoid { amp } => ActFn::sigmoid(amp),
            ActFnSpec::Relu => ActFn::relu(),
            ActFnSpec::Gelu => ActFn::gelu(),
        }
    }

    /// One generator per parameter segment, in layout order.
    fn resolve_weight_gens<R>(
        &self,
        spec: &EmbedderSpec,
        embedder: &Embedder,
        rng: &Rc<RefCell<R>>,
    ) -> Result<Vec<Box<dyn WeightGen>>>
    where
        R: Rng + 'static,
    {
        let encoder = embedder.extractor();
        let embed = encoder.patch_embed();
        let [_, bias, pos, cls] = embed.part_sizes();
        let normal = |limit| -> Result<Box<dyn WeightGen>> {
            let weight_gen = RandWeightGen::normal(rng.clone(), limit, 0., EMBEDDING_STD_DEV)?;
            Ok(Box::new(weight_gen))
        };

        let mut weight_gens: Vec<Box<dyn WeightGen>> = vec![
            self.resolve_dense_gen(spec.init, (embed.patch_dim(), embed.width()), rng)?,
            Box::new(ConstWeightGen::new(0., bias)),
            normal(pos)?,
            normal(cls)?,
        ];

        for block in encoder.blocks() {
            for dense in block.layers() {
                weight_gens.push(self.resolve_dense_gen(spec.init, dense.dim(), rng)?);
                weight_gens.push(Box::new(ConstWeightGen::new(0., dense.dim().1)));
            }
        }

        let head = (embed.width(), spec.embedding_dim);
        weight_gens.push(self.resolve_dense_gen(spec.init, head, rng)?);
        weight_gens.push(Box::new(ConstWeightGen::new(0., head.1)));

        Ok(weight_gens)
    }

    /// The generator of a dense layer's `[fan_in, fan_out]` weights.
    fn resolve_dense_gen<R>(
        &self,
        spec: DistributionSpec,
        (fan_in, fan_out): (usize, usize),
        rng: &Rc<RefCell<R>>,
    ) -> Result<Box<dyn WeightGen>>
    where
        R: Rng + 'static,
    {
        let rng = rng.clone();
        let limit = fan_in * fan_out;

        let weight_gen: Box<dyn WeightGen> = match spec {
            DistributionSpec::Const { value } => Box::new(ConstWeightGen::new(value, limit)),
            DistributionSpec::Uniform { low, high } => {
                Box::new(RandWeightGen::uniform(rng, limit, low, high)?)
            }
            DistributionSpec::UniformInclusive { low, high } => {
                Box::new(RandWeightGen::uniform_inclusive(rng, limit, low, high)?)
            }
            DistributionSpec::XavierUniform => {
                Box::new(RandWeightGen::xavier_uniform(rng, limit, fan_in, fan_out)?)
            }
            DistributionSpec::LecunUniform => {
                Box::new(RandWeightGen::lecun_uniform(rng, limit, fan_in)?)
            }
            DistributionSpec::Normal { mean, std_dev } => {
                Box::new(RandWeightGen::normal(rng, limit, mean, std_dev)?)
            }
            DistributionSpec::Kaiming => Box::new(RandWeightGen::kaiming(rng, limit, fan_in)?),
            DistributionSpec::Xavier => {
                Box::new(RandWeightGen::xavier(rng, limit, fan_in, fan_out)?)
            }
            DistributionSpec::Lecun => Box::new(RandWeightGen::lecun(rng, limit, fan_in)?),
        };

        Ok(weight_gen)
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};
    use specs::machine_learning::ExtractorSpec;

    use super::*;
    use crate::arch::HEAD;

    fn spec() -> EmbedderSpec {
        EmbedderSpec {
            extractor: ExtractorSpec {
                channels: 3,
                image_size: 8,
                patch_size: 4,
                width: 6,
                hidden: 12,
                depth: 3,
                act_fn: ActFnSpec::Gelu,
                output: FeatureOutputSpec::Sequence,
            },
            embedding_dim: 5,
            trainable_blocks: 1,
            summary_token: 0,
            init: DistributionSpec::XavierUniform,
        }
    }

    fn rng(seed: u64) -> Rc<RefCell<StdRng>> {
        Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
    }

    #[test]
    fn trainable_set_is_the_last_blocks_and_the_head() {
        let built = EmbedderBuilder::new().build(&spec(), &rng(0)).unwrap();
        let names: Vec<_> = built.trainable.handles().iter().map(|h| h.name.as_str()).collect();

        assert_eq!(names, ["blocks.2", HEAD]);
    }

    #[test]
    fn biases_start_at_zero() {
        let built = EmbedderBuilder::new().build(&spec(), &rng(0)).unwrap();
        let head = built.params.segment_params(HEAD).unwrap();

        assert_eq!(head.len(), 6 * 5 + 5);
        assert!(head[30..].iter().all(|&b| b == 0.));
        assert!(head[..30].iter().any(|&w| w != 0.));
    }

    #[test]
    fn same_seed_same_parameters() {
        let a = EmbedderBuilder::new().build(&spec(), &rng(7)).unwrap();
        let b = EmbedderBuilder::new().build(&spec(), &rng(7)).unwrap();
        let c = EmbedderBuilder::new().build(&spec(), &rng(8)).unwrap();

        assert_eq!(a.params.params(), b.params.params());
        assert_ne!(a.params.params(), c.params.params());
    }

    #[test]
    fn restore_checks_the_snapshot_size() {
        let builder = EmbedderBuilder::new();
        let built = builder.build(&spec(), &rng(0)).unwrap();

        let restored = builder.restore(&spec(), built.params.snapshot()).unwrap();
        assert_eq!(restored.params.params(), built.params.params());

        assert!(builder.restore(&spec(), vec![0.; 3]).is_err());
        assert_eq!(builder.layout(&spec()).unwrap(), *built.params.layout());
    }

    #[test]
    fn invalid_specs() {
        let builder = EmbedderBuilder::new();

        let mut bad = spec();
        bad.trainable_blocks = 4;
        assert!(matches!(builder.build(&bad, &rng(0)), Err(MlErr::InvalidSpec(_))));

        let mut bad = spec();
        bad.extractor.patch_size = 3;
        assert!(matches!(builder.build(&bad, &rng(0)), Err(MlErr::InvalidSpec(_))));

        let mut bad = spec();
        bad.summary_token = 5;
        assert!(matches!(builder.build(&bad, &rng(0)), Err(MlErr::InvalidSpec(_))));

        let mut bad = spec();
        bad.init = DistributionSpec::Uniform { low: 1., high: 0. };
        assert!(matches!(builder.build(&bad, &rng(0)), Err(MlErr::InvalidInit(_))));
    }
}
