use std::num::NonZeroUsize;

use log::{debug, info, warn};
use rand::Rng;

use super::{EpochMetrics, MetricsSink, RunningMetrics};
use crate::{
    MlErr, Result,
    arch::{
        Embedder,
        extractor::FeatureExtractor,
        loss::{EpisodeStats, EpisodicLoss},
    },
    data::{Batch, DataLoader, ImageDataset},
    optimization::Optimizer,
    params::{ParamManager, TrainableSet},
    prototypes::{PrototypeAccumulator, PrototypeTable},
};

/// What to do with a training batch that holds a single class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DegeneratePolicy {
    /// Log it, count it and move on without an optimizer step.
    #[default]
    Skip,
    /// Abort the epoch.
    Fail,
}

/// Fine-tunes an `Embedder` episodically, every batch being its own classification task.
pub struct Trainer<E, O, L, R>
where
    E: FeatureExtractor,
    O: Optimizer,
    L: EpisodicLoss,
    R: Rng,
{
    embedder: Embedder<E>,
    params: ParamManager,
    trainable: TrainableSet,
    optimizers: Vec<O>,
    loss_fn: L,

    epochs: usize,
    batch_size: NonZeroUsize,
    policy: DegeneratePolicy,
    rng: R,
}

impl<E, O, L, R> Trainer<E, O, L, R>
where
    E: FeatureExtractor,
    O: Optimizer + Send,
    L: EpisodicLoss,
    R: Rng,
{
    /// Returns a new `Trainer`.
    ///
    /// # Arguments
    /// * `embedder` - The model that will be trained.
    /// * `params` - The model's parameters.
    /// * `trainable` - The handles the optimizers update, every other parameter stays frozen.
    /// * `optimizers` - A list of optimizers, one per trainable handle.
    /// * `loss_fn` - The episodic loss minimized on every batch.
    /// * `epochs` - The amount of passes over the training data.
    /// * `batch_size` - The size of every episode.
    /// * `policy` - What to do with single class batches.
    /// * `rng` - The random number generator the data is shuffled with.
    ///
    /// # Returns
    /// An error if the optimizers don't match the trainable handles.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Embedder<E>,
        params: ParamManager,
        trainable: TrainableSet,
        optimizers: Vec<O>,
        loss_fn: L,
        epochs: usize,
        batch_size: NonZeroUsize,
        policy: DegeneratePolicy,
        rng: R,
    ) -> Result<Self> {
        if optimizers.len() != trainable.len() {
            return Err(MlErr::SizeMismatch {
                what: "optimizers",
                got: optimizers.len(),
                expected: trainable.len(),
            });
        }

        Ok(Self {
            embedder,
            params,
            trainable,
            optimizers,
            loss_fn,
            epochs,
            batch_size,
            policy,
            rng,
        })
    }

    pub fn embedder(&self) -> &Embedder<E> {
        &self.embedder
    }

    pub fn params(&self) -> &ParamManager {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamManager {
        &mut self.params
    }

    pub fn trainable(&self) -> &TrainableSet {
        &self.trainable
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Consumes the trainer, returning the trained model and its parameters.
    pub fn into_parts(self) -> (Embedder<E>, ParamManager) {
        (self.embedder, self.params)
    }

    /// Runs every epoch, each one a training pass over `train` followed by an evaluation
    /// pass over `test`.
    ///
    /// # Arguments
    /// * `train` - The data the model is fitted to.
    /// * `test` - The held-out data, only used for monitoring.
    /// * `sink` - Receives the metrics of every epoch as soon as it finishes.
    ///
    /// # Returns
    /// The metrics of every epoch, or the error that aborted one.
    pub fn fit(
        &mut self,
        train: &ImageDataset,
        test: &ImageDataset,
        sink: &mut dyn MetricsSink,
    ) -> Result<Vec<EpochMetrics>> {
        info!(
            "training for {} epochs over {} samples, {} trainable parameters",
            self.epochs,
            train.len(),
            self.trainable.size()
        );

        let mut history = Vec::with_capacity(self.epochs);

        for epoch in 0..self.epochs {
            let trained = self.train_epoch(epoch, train)?;
            let evaluated = self.evaluate(test)?;

            let metrics = EpochMetrics {
                epoch,
                train_loss: trained.loss(),
                train_acc: trained.accuracy(),
                test_loss: evaluated.loss(),
                test_acc: evaluated.accuracy(),
                skipped_batches: trained.skipped(),
            };

            sink.record(&metrics);
            history.push(metrics);
        }

        Ok(history)
    }

    /// Performs a single training pass over `dataset` in a fresh random order.
    ///
    /// # Returns
    /// The running metrics of the epoch, or `EpochAborted` if a batch failed.
    pub fn train_epoch(&mut self, epoch: usize, dataset: &ImageDataset) -> Result<RunningMetrics> {
        let loader = DataLoader::shuffled(dataset, self.batch_size, &mut self.rng);
        let mut running = RunningMetrics::new();

        for (i, batch) in loader.enumerate() {
            match self.step(&batch) {
                Ok(stats) => running.record(stats, batch.len()),
                Err(e) if e.is_degenerate() && self.policy == DegeneratePolicy::Skip => {
                    warn!(epoch = epoch, batch = i; "skipping batch: {e}");
                    running.skip();
                }
                Err(e) => {
                    return Err(MlErr::EpochAborted {
                        epoch,
                        batch: i,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(running)
    }

    /// Evaluates the loss over `dataset` without computing gradients.
    ///
    /// Single class batches carry no signal here and are always skipped.
    pub fn evaluate(&self, dataset: &ImageDataset) -> Result<RunningMetrics> {
        let mut running = RunningMetrics::new();

        for batch in DataLoader::sequential(dataset, self.batch_size) {
            let embeddings = self.embedder.embed(&self.params, batch.images.view())?;

            match self.loss_fn.loss(embeddings.view(), &batch.labels) {
                Ok(stats) => running.record(stats, batch.len()),
                Err(e) if e.is_degenerate() => {
                    debug!("not evaluating batch: {e}");
                    running.skip();
                }
                Err(e) => return Err(e),
            }
        }

        Ok(running)
    }

    /// Computes the persistent prototype of every class of `dataset`.
    ///
    /// # Returns
    /// The table, or `MissingClasses` if a class below `dataset.num_classes()` has no sample.
    pub fn build_prototypes(&self, dataset: &ImageDataset) -> Result<PrototypeTable> {
        let mut accumulator = PrototypeAccumulator::new();

        for batch in DataLoader::sequential(dataset, self.batch_size) {
            let embeddings = self.embedder.embed(&self.params, batch.images.view())?;
            accumulator.extend(embeddings.view(), &batch.labels)?;
        }

        let table = accumulator.finalize_expecting(0..dataset.num_classes())?;
        info!("built {} prototypes", table.len());

        Ok(table)
    }

    /// A forward pass, a backward pass and an optimizer step over one episode.
    fn step(&mut self, batch: &Batch) -> Result<EpisodeStats> {
        self.params.zero_grad();

        let embeddings = self.embedder.forward(&self.params, batch.images.view())?;
        let (stats, d) = self.loss_fn.loss_prime(embeddings.view(), &batch.labels)?;

        self.embedder.backward(&mut self.params, d)?;
        self.params.optimize(&self.trainable, &mut self.optimizers)?;

        Ok(stats)
    }
}
