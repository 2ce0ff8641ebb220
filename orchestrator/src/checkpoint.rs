use std::{fs, path::Path};

use log::{info, warn};
use machine_learning::{
    arch::EmbedderBuilder,
    data::ImageTransform,
    inference::PrototypeClassifier,
    params::{ParamLayout, ParamManager},
    prototypes::{Prototype, PrototypeTable},
};
use ndarray::Array1;
use safetensors::{Dtype, SafeTensors};
use specs::run::ManifestSpec;

use crate::{OrchestratorError, Result, tensors};

/// The version of the checkpoint directory layout.
pub const FORMAT_VERSION: u32 = 1;

pub const MODEL_FILE: &str = "model.safetensors";
pub const PROTOTYPES_FILE: &str = "prototypes.safetensors";
pub const CLASSES_FILE: &str = "classes.json";
pub const MANIFEST_FILE: &str = "run.json";

const LABELS: &str = "labels";
const SUPPORT: &str = "support";
const VECTORS: &str = "vectors";

/// Writes every layer of `params` as its own `F32` tensor, named after the layer.
pub fn save_params(path: &Path, params: &ParamManager) -> Result<()> {
    let layout = params.layout();

    let tensors = layout
        .segments()
        .iter()
        .map(|segment| {
            let data = bytemuck::cast_slice(&params.params()[segment.range()]);
            let view = tensors::view(Dtype::F32, vec![segment.size], data)?;
            Ok((segment.name.clone(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    tensors::write(path, tensors)
}

/// Reads a full parameter snapshot laid out as `layout`.
///
/// # Returns
/// The flat parameters, or an error if a layer is missing or has the wrong size.
pub fn load_params(path: &Path, layout: &ParamLayout) -> Result<Vec<f32>> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let mut params = Vec::with_capacity(layout.size());

    for segment in layout.segments() {
        let values = tensors::read_f32(&tensors::get(&tensors, &segment.name)?, &segment.name)?;

        if values.len() != segment.size {
            return Err(OrchestratorError::InvalidConfig(format!(
                "layer {} holds {} parameters, expected {}",
                segment.name,
                values.len(),
                segment.size
            )));
        }

        params.extend(values);
    }

    Ok(params)
}

/// Loads pretrained weights into the layers of `params` that share a name with them.
///
/// # Returns
/// The amount of layers loaded, or an error if none matched or a size is off.
pub fn load_pretrained(path: &Path, params: &mut ParamManager) -> Result<usize> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;
    let mut loaded = 0;

    for (name, view) in tensors.tensors() {
        if params.layout().segment(&name).is_none() {
            warn!("pretrained tensor {name} matches no layer, ignoring it");
            continue;
        }

        let values = tensors::read_f32(&view, &name)?;
        params.load_segment(&name, &values)?;
        loaded += 1;
    }

    if loaded == 0 {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{} holds no tensor named after a layer",
            path.display()
        )));
    }

    info!("loaded {loaded} pretrained layers from {}", path.display());
    Ok(loaded)
}

/// Writes the prototype table as `labels` and `support` (`I64`, `[C]`) and `vectors`
/// (`F32`, `[C, D]`).
pub fn save_prototypes(path: &Path, table: &PrototypeTable) -> Result<()> {
    let labels = tensors::labels_to_i64(table.labels());
    let support = tensors::labels_to_i64(table.iter().map(|p| p.support));
    let matrix = table.matrix();
    let vectors = matrix.as_slice().unwrap_or_default();

    tensors::write(
        path,
        vec![
            (
                LABELS.to_string(),
                tensors::view(Dtype::I64, vec![labels.len()], bytemuck::cast_slice(&labels))?,
            ),
            (
                SUPPORT.to_string(),
                tensors::view(Dtype::I64, vec![support.len()], bytemuck::cast_slice(&support))?,
            ),
            (
                VECTORS.to_string(),
                tensors::view(
                    Dtype::F32,
                    vec![table.len(), table.dim()],
                    bytemuck::cast_slice(vectors),
                )?,
            ),
        ],
    )
}

/// Reads a prototype table written by `save_prototypes`.
pub fn load_prototypes(path: &Path) -> Result<PrototypeTable> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let labels = tensors::read_labels(&tensors::get(&tensors, LABELS)?, LABELS)?;
    let support = tensors::read_labels(&tensors::get(&tensors, SUPPORT)?, SUPPORT)?;
    let view = tensors::get(&tensors, VECTORS)?;
    tensors::expect(&view, VECTORS, Dtype::F32, 2)?;
    let dim = view.shape()[1];
    let vectors = tensors::read_f32(&view, VECTORS)?;

    if support.len() != labels.len() || view.shape()[0] != labels.len() {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{} holds {} labels, {} supports and {} vectors",
            path.display(),
            labels.len(),
            support.len(),
            view.shape()[0]
        )));
    }

    if dim == 0 && !labels.is_empty() {
        return Err(OrchestratorError::InvalidConfig(format!(
            "{} holds prototypes of dimension 0",
            path.display()
        )));
    }

    let prototypes = labels
        .into_iter()
        .zip(support)
        .zip(vectors.chunks_exact(dim.max(1)))
        .map(|((label, support), vector)| Prototype {
            label,
            vector: Array1::from(vector.to_vec()),
            support,
        });

    Ok(PrototypeTable::from_prototypes(prototypes)?)
}

/// Writes a whole checkpoint directory, creating it if needed.
///
/// # Arguments
/// * `dir` - The checkpoint directory.
/// * `manifest` - What inference needs to rebuild the model.
/// * `params` - The trained parameters.
/// * `table` - The persistent prototypes, with their class names if any.
pub fn save_checkpoint(
    dir: &Path,
    manifest: &ManifestSpec,
    params: &ParamManager,
    table: &PrototypeTable,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    save_params(&dir.join(MODEL_FILE), params)?;
    save_prototypes(&dir.join(PROTOTYPES_FILE), table)?;

    if let Some(names) = table.names() {
        fs::write(dir.join(CLASSES_FILE), serde_json::to_string_pretty(names)?)?;
    }

    fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(manifest)?)?;

    info!("checkpoint written to {}", dir.display());
    Ok(())
}

/// Reads the manifest of a checkpoint directory.
pub fn load_manifest(dir: &Path) -> Result<ManifestSpec> {
    let file = fs::File::open(dir.join(MANIFEST_FILE))?;
    let manifest: ManifestSpec = serde_json::from_reader(file)?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(OrchestratorError::InvalidConfig(format!(
            "checkpoint format {} is not supported, expected {FORMAT_VERSION}",
            manifest.format_version
        )));
    }

    Ok(manifest)
}

/// Rebuilds the classifier stored in a checkpoint directory.
pub fn load_classifier(dir: &Path) -> Result<PrototypeClassifier> {
    let manifest = load_manifest(dir)?;
    let transform = ImageTransform::from_spec(&manifest.transform)?;

    let builder = EmbedderBuilder::new();
    let layout = builder.layout(&manifest.embedder)?;
    let params = load_params(&dir.join(MODEL_FILE), &layout)?;
    let built = builder.restore(&manifest.embedder, params)?;

    let mut table = load_prototypes(&dir.join(PROTOTYPES_FILE))?;
    let classes = dir.join(CLASSES_FILE);
    if classes.exists() {
        let file = fs::File::open(classes)?;
        table = table.with_names(serde_json::from_reader(file)?);
    }

    Ok(PrototypeClassifier::new(
        built.embedder,
        built.params,
        table,
        transform,
    )?)
}
