//! Fine-tunes EfficientNet-B0 on `<data-dir>/{fake,real}` and keeps the best
//! checkpoint with its label manifest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use detector::config::PipelineConfig;
use detector::dataset::ImageFolder;
use detector::training::{Trainer, TrainingOutcome};
use detector::vision::Classifier;
use tch::Device;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pipeline config (YAML); every field is optional
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Training root with one subdirectory per class
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Where the best checkpoint is written
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Pretrained ImageNet backbone weights (.safetensors or .ot)
    #[arg(long)]
    backbone: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Train on the CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,

    /// Hide progress bars
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let pipeline = PipelineConfig::load_or_default(cli.config.as_deref())?;
    let mut training = pipeline.training;
    if let Some(dir) = cli.data_dir {
        training.data_dir = dir;
    }
    if let Some(checkpoint) = cli.checkpoint {
        training.checkpoint = checkpoint;
    }
    if let Some(backbone) = cli.backbone {
        training.backbone_weights = Some(backbone);
    }
    if let Some(epochs) = cli.epochs {
        training.epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        training.batch_size = batch_size;
    }
    if let Some(seed) = cli.seed {
        training.seed = seed;
    }

    let device = if cli.cpu { Device::Cpu } else { Device::cuda_if_available() };
    let dataset = ImageFolder::open(&training.data_dir)
        .with_context(|| format!("Failed to open training data at {}", training.data_dir.display()))?;
    log::info!(
        "Found {} images in classes {:?}",
        dataset.len(),
        dataset.labels().names()
    );

    let mut classifier = Classifier::with_labels(dataset.labels().clone(), device);
    match &training.backbone_weights {
        Some(weights) => {
            let copied = classifier.load_backbone(weights)?;
            log::info!("Initialized {} backbone tensors from {}", copied, weights.display());
        }
        None => log::warn!("No backbone weights given, training from random initialization"),
    }
    let trainable = classifier.apply_transfer_policy();
    log::info!("{} trainable tensors", trainable);

    let checkpoint = training.checkpoint.clone();
    let mut trainer = Trainer::new(classifier, pipeline.preprocessing, training).quiet(cli.quiet);
    let summary = trainer.run(&dataset)?;

    let reason = match summary.outcome {
        TrainingOutcome::Converged => "training accuracy reached 100%",
        TrainingOutcome::EarlyStopped => "accuracy stopped improving",
        TrainingOutcome::Exhausted => "all epochs completed",
    };
    println!(
        "Finished after {} epochs ({}). Best training accuracy {:.2}%, checkpoint at {}",
        summary.epochs_run,
        reason,
        summary.best_accuracy,
        checkpoint.display()
    );
    Ok(())
}
