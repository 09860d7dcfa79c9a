//! Classifies individual image files with a trained checkpoint.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use detector::config::PipelineConfig;
use detector::vision::{Classifier, ImageClassifier, Preprocessor};
use ndarray::Axis;
use tch::Device;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Images to classify
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// Pipeline config (YAML); only the preprocessing section is used
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "best_model.safetensors")]
    checkpoint: PathBuf,

    /// Label manifest; defaults to the one next to the checkpoint
    #[arg(long)]
    labels: Option<PathBuf>,

    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let pipeline = PipelineConfig::load_or_default(cli.config.as_deref())?;
    let device = if cli.cpu { Device::Cpu } else { Device::cuda_if_available() };
    let (classifier, manifest) =
        Classifier::load_with_manifest(&cli.checkpoint, cli.labels.as_deref(), device)?;
    let preprocessing = match &manifest {
        Some(manifest) => manifest.preprocessing(&pipeline.preprocessing),
        None => pipeline.preprocessing,
    };
    let preprocessor = Preprocessor::new(&preprocessing);

    let mut failures = 0;
    for path in &cli.images {
        let prediction = preprocessor
            .preprocess_path(path)
            .map_err(anyhow::Error::from)
            .and_then(|tensor| {
                let batch = tensor.insert_axis(Axis(0));
                Ok(classifier.predict(batch.view())?)
            });
        match prediction.map(|mut p| p.pop()) {
            Ok(Some(prediction)) => println!(
                "{}: {} ({:.3}%)",
                path.display(),
                prediction.label.display_name(),
                prediction.confidence
            ),
            Ok(None) => {
                failures += 1;
                log::error!("{}: model returned no prediction", path.display());
            }
            Err(e) => {
                failures += 1;
                log::error!("{}: {:#}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} images could not be classified", failures, cli.images.len());
    }
    Ok(())
}
