use ndarray::Array4;
use specs::machine_learning::{
    ActFnSpec, DegeneratePolicySpec, DistributionSpec, EmbedderSpec, ExtractorSpec,
    OptimizerSpec, TrainerSpec,
};

use machine_learning::{
    arch::HEAD,
    data::ImageDataset,
    training::{EpochMetrics, TrainerBuilder},
};

const CLASSES: usize = 3;
const PER_CLASS: usize = 8;

fn spec(batch_size: usize, epochs: usize) -> TrainerSpec {
    TrainerSpec {
        embedder: EmbedderSpec {
            extractor: ExtractorSpec {
                channels: 3,
                image_size: 8,
                patch_size: 4,
                width: 16,
                hidden: 32,
                depth: 2,
                act_fn: ActFnSpec::Gelu,
                output: Default::default(),
            },
            embedding_dim: 8,
            trainable_blocks: 1,
            summary_token: 0,
            init: DistributionSpec::XavierUniform,
        },
        optimizer: OptimizerSpec::Adam {
            learning_rate: 1e-2,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        },
        epochs,
        batch_size,
        distance_floor: 1e-8,
        degenerate_batches: DegeneratePolicySpec::Skip,
        seed: Some(42),
    }
}

/// Every class lights up its own channel, over a deterministic texture.
fn dataset() -> ImageDataset {
    let n = CLASSES * PER_CLASS;
    let labels: Vec<usize> = (0..n).map(|i| i % CLASSES).collect();

    let images = Array4::from_shape_fn((n, 3, 8, 8), |(i, c, y, x)| {
        let texture = ((i * 31 + c * 17 + y * 7 + x * 3) % 13) as f32 / 13. - 0.5;
        let signal = if c == labels[i] { 1. } else { 0. };
        signal + 0.3 * texture
    });

    ImageDataset::new(images, labels).unwrap()
}

#[test]
fn frozen_parameters_never_change() {
    let mut trainer = TrainerBuilder::new().build(&spec(6, 1)).unwrap();
    let data = dataset();
    let before = trainer.params().snapshot();

    trainer.train_epoch(0, &data).unwrap();

    let after = trainer.params().snapshot();
    let layout = trainer.params().layout();

    for segment in layout.segments() {
        let range = segment.range();
        if segment.trainable {
            assert_ne!(before[range.clone()], after[range], "{} didn't move", segment.name);
        } else {
            assert_eq!(before[range.clone()], after[range], "{} moved", segment.name);
        }
    }

    assert!(trainer.trainable().contains(HEAD));
    assert!(trainer.trainable().contains("blocks.1"));
    assert!(!trainer.trainable().contains("blocks.0"));
}

#[test]
fn seeded_training_lowers_the_loss() {
    let mut trainer = TrainerBuilder::new().build(&spec(CLASSES * PER_CLASS, 20)).unwrap();
    let data = dataset();

    let mut sink: Vec<EpochMetrics> = Vec::new();
    let history = trainer.fit(&data, &data, &mut sink).unwrap();

    let first = history.first().unwrap();
    let last = history.last().unwrap();

    assert_eq!(sink.len(), 20);
    assert!(history.iter().all(|m| m.skipped_batches == 0));
    assert!(last.train_loss < first.train_loss, "{first:?} -> {last:?}");
    assert!(last.test_loss < first.test_loss, "{first:?} -> {last:?}");

    let table = trainer.build_prototypes(&data).unwrap();
    assert_eq!(table.labels(), vec![0, 1, 2]);
    assert!(table.iter().all(|p| p.support == PER_CLASS));
}

#[test]
fn seeded_runs_are_reproducible() {
    let data = dataset();

    let run = || {
        let mut trainer = TrainerBuilder::new().build(&spec(6, 2)).unwrap();
        trainer.fit(&data, &data, &mut Vec::new()).unwrap();
        trainer.params().snapshot()
    };

    assert_eq!(run(), run());
}
