use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::machine_learning::{EmbedderSpec, TrainerSpec, TransformSpec};

/// Where the data of a run lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Safetensors file with `images` (`U8`, `[N, H, W, 3]`) and `labels` (`I64`, `[N]`).
    pub train: PathBuf,
    /// Held-out split with the same layout, used for monitoring only.
    pub test: PathBuf,
    /// Optional JSON list of class names, indexed by label.
    #[serde(default)]
    pub class_names: Option<PathBuf>,
}

/// A complete training run: what to train, on what, and where to leave the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    pub trainer: TrainerSpec,
    #[serde(default)]
    pub transform: TransformSpec,
    pub dataset: DatasetSpec,
    /// Safetensors file with backbone weights named after the extractor layers.
    #[serde(default)]
    pub pretrained: Option<PathBuf>,
    /// Checkpoint directory.
    pub output: PathBuf,
}

/// The part of a run that inference needs to rebuild the model, stored next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSpec {
    pub format_version: u32,
    pub embedder: EmbedderSpec,
    pub transform: TransformSpec,
}
