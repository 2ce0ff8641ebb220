use std::{cell::RefCell, rc::Rc};

use ndarray::{Array4, ArrayView4};
use rand::{SeedableRng, rngs::StdRng};
use specs::machine_learning::{
    ActFnSpec, DistributionSpec, EmbedderSpec, ExtractorSpec, FeatureOutputSpec,
};

use machine_learning::{
    arch::{
        BuiltEmbedder, EmbedderBuilder,
        loss::{EpisodicLoss, PrototypicalLoss},
    },
    params::ParamManager,
};

const H: f32 = 1e-2;

fn spec(output: FeatureOutputSpec, act_fn: ActFnSpec, summary_token: usize) -> EmbedderSpec {
    EmbedderSpec {
        extractor: ExtractorSpec {
            channels: 3,
            image_size: 4,
            patch_size: 2,
            width: 4,
            hidden: 6,
            depth: 2,
            act_fn,
            output,
        },
        embedding_dim: 3,
        trainable_blocks: 1,
        summary_token,
        init: DistributionSpec::XavierUniform,
    }
}

fn images() -> Array4<f32> {
    Array4::from_shape_fn((4, 3, 4, 4), |(i, c, y, x)| {
        ((i * 13 + c * 7 + y * 5 + x * 3) % 17) as f32 / 17. - 0.5
    })
}

fn loss(built: &BuiltEmbedder, images: ArrayView4<f32>, labels: &[usize]) -> f32 {
    let embeddings = built.embedder.embed(&built.params, images).unwrap();
    PrototypicalLoss::default()
        .loss(embeddings.view(), labels)
        .unwrap()
        .loss
}

fn numeric_grad(
    built: &mut BuiltEmbedder,
    i: usize,
    images: ArrayView4<f32>,
    labels: &[usize],
) -> f32 {
    let original = built.params.params()[i];

    built.params.params_mut()[i] = original + H;
    let plus = loss(built, images, labels);
    built.params.params_mut()[i] = original - H;
    let minus = loss(built, images, labels);
    built.params.params_mut()[i] = original;

    (plus - minus) / (2. * H)
}

fn analytic_grad(
    built: &mut BuiltEmbedder,
    images: ArrayView4<f32>,
    labels: &[usize],
) -> Vec<f32> {
    let params: &mut ParamManager = &mut built.params;
    params.zero_grad();

    let embeddings = built.embedder.forward(params, images).unwrap();
    let (_, d) = PrototypicalLoss::default()
        .loss_prime(embeddings.view(), labels)
        .unwrap();
    built.embedder.backward(params, d).unwrap();

    params.grad().to_vec()
}

fn check(spec: EmbedderSpec) {
    let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(17)));
    let mut built = EmbedderBuilder::new().build(&spec, &rng).unwrap();
    let images = images();
    let labels = [0, 1, 0, 1];

    let grad = analytic_grad(&mut built, images.view(), &labels);
    let first_trainable = built.trainable.handles()[0].range.start;

    assert!(grad[..first_trainable].iter().all(|&g| g == 0.));
    assert!(grad[first_trainable..].iter().any(|&g| g != 0.));

    for i in (first_trainable..grad.len()).step_by(5) {
        let numeric = numeric_grad(&mut built, i, images.view(), &labels);
        let tolerance = 5e-3 + 5e-2 * numeric.abs();

        assert!(
            (grad[i] - numeric).abs() <= tolerance,
            "param {i}: analytic {} numeric {numeric}",
            grad[i]
        );
    }
}

#[test]
fn sequence_output_gradient_matches_finite_differences() {
    check(spec(FeatureOutputSpec::Sequence, ActFnSpec::Gelu, 0));
}

#[test]
fn non_default_summary_token_gradient_matches_finite_differences() {
    check(spec(FeatureOutputSpec::Sequence, ActFnSpec::Gelu, 3));
}

#[test]
fn pooled_output_gradient_matches_finite_differences() {
    check(spec(FeatureOutputSpec::Pooled, ActFnSpec::Sigmoid { amp: 1. }, 0));
}
