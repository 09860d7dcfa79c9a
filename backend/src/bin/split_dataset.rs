//! Moves `Fake/` and `Real/` into a seeded 80/20 `Train`/`Test` layout.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use detector::config::PipelineConfig;
use detector::dataset::split::plan_split;
use detector::progress;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    fake_dir: Option<PathBuf>,

    #[arg(long)]
    real_dir: Option<PathBuf>,

    /// Receives `Train/<class>` and `Test/<class>`
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    train_ratio: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Print the split without moving any file
    #[arg(long)]
    dry_run: bool,

    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let mut split = PipelineConfig::load_or_default(cli.config.as_deref())?
        .dataset
        .split;
    if let Some(dir) = cli.fake_dir {
        split.fake_dir = dir;
    }
    if let Some(dir) = cli.real_dir {
        split.real_dir = dir;
    }
    if let Some(dir) = cli.output_dir {
        split.output_dir = dir;
    }
    if let Some(ratio) = cli.train_ratio {
        anyhow::ensure!((0.0..=1.0).contains(&ratio), "train ratio must be within [0, 1]");
        split.train_ratio = ratio;
    }
    if let Some(seed) = cli.seed {
        split.seed = seed;
    }

    let plan = plan_split(&split)?;
    println!("{}", plan);
    if cli.dry_run {
        for file_move in &plan.moves {
            println!("  would move {} -> {}", file_move.from.display(), file_move.to.display());
        }
        return Ok(());
    }

    let bar = progress::bar(plan.moves.len(), "Moving", cli.quiet);
    let moved = plan.apply(&bar)?;
    bar.finish_and_clear();
    log::info!("Moved {} files into {}", moved, plan.output_dir.display());
    Ok(())
}
