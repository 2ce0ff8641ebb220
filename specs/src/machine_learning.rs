use serde::{Deserialize, Serialize};

/// The specification for the `ActFn` enum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnSpec {
    Sigmoid { amp: f32 },
    Relu,
    Gelu,
}

/// The distribution the weights of a layer are sampled from.
///
/// Fan-in and fan-out are not part of the spec, they are derived from the dimensions of the
/// layer being initialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionSpec {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    UniformInclusive { low: f32, high: f32 },
    XavierUniform,
    LecunUniform,
    Normal { mean: f32, std_dev: f32 },
    Kaiming,
    Xavier,
    Lecun,
}

/// What the feature extractor hands over to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureOutputSpec {
    /// The whole token sequence, `[B, T, F]`.
    #[default]
    Sequence,
    /// Only the summary token, `[B, F]`.
    Pooled,
}

/// The specification for the patch encoder feature extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorSpec {
    pub channels: usize,
    pub image_size: usize,
    pub patch_size: usize,
    pub width: usize,
    pub hidden: usize,
    pub depth: usize,
    pub act_fn: ActFnSpec,
    #[serde(default)]
    pub output: FeatureOutputSpec,
}

/// The specification for the `Embedder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderSpec {
    pub extractor: ExtractorSpec,
    pub embedding_dim: usize,
    /// How many of the last extractor blocks are fine-tuned, the projection head always is.
    pub trainable_blocks: usize,
    #[serde(default)]
    pub summary_token: usize,
    pub init: DistributionSpec,
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}

/// What the trainer does with a batch holding a single class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicySpec {
    #[default]
    Skip,
    Fail,
}

/// The specification for the `Trainer` struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSpec {
    pub embedder: EmbedderSpec,
    pub optimizer: OptimizerSpec,
    pub epochs: usize,
    pub batch_size: usize,
    #[serde(default = "default_distance_floor")]
    pub distance_floor: f32,
    #[serde(default)]
    pub degenerate_batches: DegeneratePolicySpec,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// The specification for the image preprocessing transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub version: u32,
    pub size: usize,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            version: 1,
            size: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

fn default_distance_floor() -> f32 {
    1e-8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trainer_spec_defaults() {
        let json = r#"{
            "embedder": {
                "extractor": {
                    "channels": 3,
                    "image_size": 32,
                    "patch_size": 8,
                    "width": 64,
                    "hidden": 128,
                    "depth": 4,
                    "act_fn": "gelu"
                },
                "embedding_dim": 128,
                "trainable_blocks": 2,
                "init": "xavier_uniform"
            },
            "optimizer": { "adam": { "learning_rate": 0.001, "beta1": 0.9, "beta2": 0.999, "epsilon": 1e-8 } },
            "epochs": 10,
            "batch_size": 32
        }"#;

        let spec: TrainerSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.distance_floor, 1e-8);
        assert_eq!(spec.degenerate_batches, DegeneratePolicySpec::Skip);
        assert_eq!(spec.seed, None);
        assert_eq!(spec.embedder.summary_token, 0);
        assert_eq!(spec.embedder.extractor.output, FeatureOutputSpec::Sequence);
        assert_eq!(spec.embedder.extractor.act_fn, ActFnSpec::Gelu);
    }

    #[test]
    fn tagged_variants() {
        let spec: DistributionSpec =
            serde_json::from_str(r#"{ "normal": { "mean": 0.0, "std_dev": 0.02 } }"#).unwrap();
        assert_eq!(
            spec,
            DistributionSpec::Normal {
                mean: 0.0,
                std_dev: 0.02
            }
        );

        let spec: ActFnSpec = serde_json::from_str(r#"{ "sigmoid": { "amp": 1.0 } }"#).unwrap();
        assert_eq!(spec, ActFnSpec::Sigmoid { amp: 1.0 });
    }
}
