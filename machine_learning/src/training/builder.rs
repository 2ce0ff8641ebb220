use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use rand::{SeedableRng, rngs::StdRng};
use specs::machine_learning::{DegeneratePolicySpec, OptimizerSpec, TrainerSpec};

use super::{DegeneratePolicy, Trainer};
use crate::{
    MlErr, Result,
    arch::{BuiltEmbedder, EmbedderBuilder, extractor::PatchEncoder, loss::PrototypicalLoss},
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
    params::TrainableSet,
};

/// The trainer every `TrainerSpec` resolves to.
pub type PrototypicalTrainer =
    Trainer<PatchEncoder, Box<dyn Optimizer + Send>, PrototypicalLoss, StdRng>;

/// Builds `Trainer`s given a specification.
#[derive(Default)]
pub struct TrainerBuilder;

impl TrainerBuilder {
    /// Creates a new `TrainerBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Trainer` with a freshly initialized embedder following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the trainer.
    ///
    /// # Returns
    /// The trainer, or an error if the spec is invalid.
    pub fn build(&self, spec: &TrainerSpec) -> Result<PrototypicalTrainer> {
        let mut rng = self.generate_rng(spec.seed);

        let init_rng = Rc::new(RefCell::new(StdRng::from_rng(&mut rng)));
        let built = EmbedderBuilder::new().build(&spec.embedder, &init_rng)?;

        self.terminate_build(spec, built, rng)
    }

    fn terminate_build(
        &self,
        spec: &TrainerSpec,
        built: BuiltEmbedder,
        rng: StdRng,
    ) -> Result<PrototypicalTrainer> {
        let batch_size = NonZeroUsize::new(spec.batch_size)
            .ok_or_else(|| MlErr::InvalidSpec("the batch size must be positive".into()))?;

        if spec.epochs == 0 {
            return Err(MlErr::InvalidSpec("at least one epoch is needed".into()));
        }

        if !spec.distance_floor.is_finite() || spec.distance_floor <= 0. {
            return Err(MlErr::InvalidSpec(format!(
                "the distance floor must be finite and positive, got {}",
                spec.distance_floor
            )));
        }

        let optimizers = self.resolve_optimizers(spec.optimizer, &built.trainable)?;
        let loss_fn = PrototypicalLoss::new(spec.distance_floor);
        let policy = match spec.degenerate_batches {
            DegeneratePolicySpec::Skip => DegeneratePolicy::Skip,
            DegeneratePolicySpec::Fail => DegeneratePolicy::Fail,
        };

        Trainer::new(
            built.embedder,
            built.params,
            built.trainable,
            optimizers,
            loss_fn,
            spec.epochs,
            batch_size,
            policy,
            rng,
        )
    }

    /// One optimizer per trainable handle, each sized after its handle.
    fn resolve_optimizers(
        &self,
        spec: OptimizerSpec,
        trainable: &TrainableSet,
    ) -> Result<Vec<Box<dyn Optimizer + Send>>> {
        let learning_rate = match spec {
            OptimizerSpec::Adam { learning_rate, .. }
            | OptimizerSpec::GradientDescent { learning_rate }
            | OptimizerSpec::GradientDescentWithMomentum { learning_rate, .. } => learning_rate,
        };

        if !(learning_rate > 0.) || !learning_rate.is_finite() {
            return Err(MlErr::InvalidSpec(format!(
                "the learning rate must be positive, got {learning_rate}"
            )));
        }

        let optimizers = trainable
            .handles()
            .iter()
            .map(|handle| {
                let len = handle.range.len();

                let optimizer: Box<dyn Optimizer + Send> = match spec {
                    OptimizerSpec::Adam {
                        learning_rate,
                        beta1,
                        beta2,
                        epsilon,
                    } => Box::new(Adam::new(len, learning_rate, beta1, beta2, epsilon)),
                    OptimizerSpec::GradientDescent { learning_rate } => {
                        Box::new(GradientDescent::new(learning_rate))
                    }
                    OptimizerSpec::GradientDescentWithMomentum {
                        learning_rate,
                        momentum,
                    } => Box::new(GradientDescentWithMomentum::new(len, learning_rate, momentum)),
                };

                optimizer
            })
            .collect();

        Ok(optimizers)
    }

    fn generate_rng(&self, seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}
