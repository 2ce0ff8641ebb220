use std::{env, path::Path, process};

use anyhow::Context;
use log::info;

const USAGE: &str = "usage:
    protonet train <run.json>
    protonet classify <checkpoint dir> <image.png|.jpg|.safetensors>";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["train", spec] => train(Path::new(spec)),
        ["classify", dir, image] => classify(Path::new(dir), Path::new(image)),
        _ => {
            eprintln!("{USAGE}");
            process::exit(2);
        }
    }
}

fn train(spec_path: &Path) -> anyhow::Result<()> {
    let spec = orchestrator::load_run_spec(spec_path)
        .with_context(|| format!("reading {}", spec_path.display()))?;

    let summary = orchestrator::train(&spec)?;

    if let Some(last) = summary.history.last() {
        info!(
            "finished: train_loss={:.4} test_acc={:.4}, {} prototypes written to {}",
            last.train_loss,
            last.test_acc,
            summary.classes,
            spec.output.display()
        );
    }

    Ok(())
}

fn classify(dir: &Path, image_path: &Path) -> anyhow::Result<()> {
    let classifier = orchestrator::load_classifier(dir)
        .with_context(|| format!("loading the checkpoint in {}", dir.display()))?;
    let image = orchestrator::load_image(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?;

    let result = classifier.classify_raw(&image)?;

    let distances: serde_json::Map<_, _> = result
        .distances
        .iter()
        .map(|(label, distance)| (label.to_string(), serde_json::json!(distance)))
        .collect();

    let output = serde_json::json!({
        "label": result.label,
        "name": result.name,
        "distances": distances,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
