//! Scores a checkpoint on `<data-dir>/{fake,real}` and reports per-class
//! metrics and a few misclassified images.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use detector::config::PipelineConfig;
use detector::dataset::ImageFolder;
use detector::evaluation::Evaluator;
use detector::vision::{Classifier, Preprocessor};
use tch::Device;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pipeline config (YAML); every field is optional
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Test root with one subdirectory per class
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Label manifest; defaults to the one next to the checkpoint
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Export misclassified inputs as PNG into this directory
    #[arg(long)]
    samples_dir: Option<PathBuf>,

    /// Write the full report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    cpu: bool,

    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let pipeline = PipelineConfig::load_or_default(cli.config.as_deref())?;
    let mut evaluation = pipeline.evaluation;
    if let Some(dir) = cli.data_dir {
        evaluation.data_dir = dir;
    }
    if let Some(checkpoint) = cli.checkpoint {
        evaluation.checkpoint = checkpoint;
    }
    if let Some(dir) = cli.samples_dir {
        evaluation.samples_dir = Some(dir);
    }
    if let Some(report) = cli.report {
        evaluation.report = Some(report);
    }
    if let Some(batch_size) = cli.batch_size {
        evaluation.batch_size = batch_size;
    }

    let device = if cli.cpu { Device::Cpu } else { Device::cuda_if_available() };
    let (classifier, manifest) =
        Classifier::load_with_manifest(&evaluation.checkpoint, cli.labels.as_deref(), device)?;
    let preprocessing = match &manifest {
        Some(manifest) => manifest.preprocessing(&pipeline.preprocessing),
        None => pipeline.preprocessing,
    };

    let dataset = ImageFolder::open(&evaluation.data_dir)
        .with_context(|| format!("Failed to open test data at {}", evaluation.data_dir.display()))?;
    log::info!("Evaluating {} images", dataset.len());

    let result = Evaluator::new(&classifier, Preprocessor::new(&preprocessing), &evaluation)
        .quiet(cli.quiet)
        .run(&dataset)?;

    println!("{}", result.report);
    println!("Confusion matrix:\n{}", result.confusion);
    println!("Accuracy: {:.2}%", result.report.accuracy * 100.0);
    for miss in &result.misclassified {
        println!(
            "Misclassified as {} ({:.3}%): {}",
            miss.predicted,
            miss.confidence,
            miss.path.display()
        );
    }

    if let Some(path) = &evaluation.report {
        result.save_json(path)?;
        log::info!("Report written to {}", path.display());
    }
    Ok(())
}
