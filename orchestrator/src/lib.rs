pub mod checkpoint;
pub mod dataset;
pub mod error;
mod tensors;

use std::{collections::BTreeSet, fs, path::Path};

use machine_learning::{
    MlErr,
    data::{ImageDataset, ImageTransform, RawImage},
    training::{EpochMetrics, LogSink, MetricsSink, TrainerBuilder},
};
use safetensors::{Dtype, SafeTensors};
use specs::run::{ManifestSpec, RunSpec};

pub use checkpoint::load_classifier;
pub use error::{OrchestratorError, Result};

/// The name of the `U8` `[H, W, 3]` tensor of a single image file.
pub const IMAGE: &str = "image";

/// What a finished training run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub history: Vec<EpochMetrics>,
    pub classes: usize,
}

/// Reads a run specification from a JSON file.
pub fn load_run_spec(path: &Path) -> Result<RunSpec> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

/// Trains a model as described by `spec` and writes its checkpoint, logging the metrics of
/// every epoch.
///
/// # Errors
/// Returns an `OrchestratorError` if the spec is inconsistent, a file can't be read or
/// written, or training fails.
pub fn train(spec: &RunSpec) -> Result<RunSummary> {
    train_with_sink(spec, &mut LogSink)
}

/// Like `train`, but the metrics of every epoch go to `sink`.
pub fn train_with_sink(spec: &RunSpec, sink: &mut dyn MetricsSink) -> Result<RunSummary> {
    let transform = ImageTransform::from_spec(&spec.transform)?;
    validate(spec, &transform)?;

    log::info!("loading datasets");
    let mut train = dataset::load_dataset(&spec.dataset.train, &transform)?;
    let test = dataset::load_dataset(&spec.dataset.test, &transform)?;
    check_splits(&train, &test)?;

    let names = match &spec.dataset.class_names {
        Some(path) => Some(dataset::load_class_names(path)?),
        None => None,
    };

    if let Some(names) = &names {
        if names.len() < train.num_classes() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{} class names for {} classes",
                names.len(),
                train.num_classes()
            )));
        }

        train = train.with_num_classes(names.len())?;
    }

    check_classes(&train)?;

    let mut trainer = TrainerBuilder::new().build(&spec.trainer)?;
    if let Some(path) = &spec.pretrained {
        checkpoint::load_pretrained(path, trainer.params_mut())?;
    }

    let history = trainer.fit(&train, &test, sink)?;

    let mut table = trainer.build_prototypes(&train)?;
    if let Some(names) = names {
        table = table.with_names(names);
    }

    let manifest = ManifestSpec {
        format_version: checkpoint::FORMAT_VERSION,
        embedder: spec.trainer.embedder.clone(),
        transform: transform.spec(),
    };
    checkpoint::save_checkpoint(&spec.output, &manifest, trainer.params(), &table)?;

    Ok(RunSummary {
        history,
        classes: table.len(),
    })
}

/// Reads a single RGB image.
///
/// A `.safetensors` file must hold a `U8` `[H, W, 3]` tensor named `image`; anything else is
/// decoded as a PNG or JPEG and converted to RGB.
pub fn load_image(path: &Path) -> Result<RawImage> {
    if !is_safetensors(path) {
        let image = image::open(path)?.to_rgb8();
        return Ok(RawImage::from_rgb(image)?);
    }

    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let view = tensors::get(&tensors, IMAGE)?;
    tensors::expect(&view, IMAGE, Dtype::U8, 3)?;

    let &[h, w, 3] = view.shape() else {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{IMAGE} must be [H, W, 3], got {:?}",
            view.shape()
        )));
    };

    Ok(RawImage::new(w, h, view.data().to_vec())?)
}

/// Writes a single RGB image in a format `load_image` reads back, chosen by the extension.
pub fn save_image(path: &Path, image: &RawImage) -> Result<()> {
    if !is_safetensors(path) {
        image.as_rgb().save(path)?;
        return Ok(());
    }

    let shape = vec![image.height(), image.width(), 3];
    let view = tensors::view(Dtype::U8, shape, image.pixels())?;
    tensors::write(path, vec![(IMAGE.to_string(), view)])
}

fn is_safetensors(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "safetensors")
}

fn validate(spec: &RunSpec, transform: &ImageTransform) -> Result<()> {
    let extractor = &spec.trainer.embedder.extractor;

    if extractor.channels != 3 {
        return Err(OrchestratorError::InvalidConfig(format!(
            "images are RGB but the extractor expects {} channels",
            extractor.channels
        )));
    }

    if transform.size() != extractor.image_size {
        return Err(OrchestratorError::InvalidConfig(format!(
            "the transform outputs {0}x{0} images but the extractor expects {1}x{1}",
            transform.size(),
            extractor.image_size
        )));
    }

    Ok(())
}

/// Prototypes only come from the training split, so every test class must be in it.
fn check_splits(train: &ImageDataset, test: &ImageDataset) -> Result<()> {
    let known: BTreeSet<_> = train.classes().into_iter().collect();
    let unknown: Vec<_> = test
        .classes()
        .into_iter()
        .filter(|label| !known.contains(label))
        .collect();

    if !unknown.is_empty() {
        return Err(OrchestratorError::InvalidConfig(format!(
            "test classes {unknown:?} are absent from the training split"
        )));
    }

    Ok(())
}

/// Every class needs a prototype, so every class needs a training sample.
fn check_classes(train: &ImageDataset) -> Result<()> {
    let present: BTreeSet<_> = train.classes().into_iter().collect();
    let missing: Vec<_> = (0..train.num_classes())
        .filter(|label| !present.contains(label))
        .collect();

    if !missing.is_empty() {
        return Err(MlErr::MissingClasses { missing }.into());
    }

    Ok(())
}
