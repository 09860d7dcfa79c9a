//! Repairs dataset roots in place: shrinks decompression-bomb sized images
//! and deletes files that fail to decode.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use detector::config::PipelineConfig;
use detector::dataset::DatasetError;
use detector::dataset::check::IntegrityChecker;
use detector::progress;
use detector::vision::Preprocessor;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dataset roots whose class subdirectories are scanned
    #[arg(value_name = "ROOT")]
    roots: Vec<PathBuf>,

    /// Pipeline config (YAML); every field is optional
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the planned repairs without touching any file
    #[arg(long)]
    dry_run: bool,

    /// Worker threads (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let pipeline = PipelineConfig::load_or_default(cli.config.as_deref())?;
    let roots = if cli.roots.is_empty() {
        pipeline.dataset.check_roots
    } else {
        cli.roots
    };
    let checker = IntegrityChecker::new(Preprocessor::new(&pipeline.preprocessing), cli.threads)?;

    for root in &roots {
        let files = match checker.collect(root) {
            Ok(files) => files,
            Err(DatasetError::NotFound(dir)) => {
                log::warn!("Directory not found: {}", dir.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        log::info!("Checking {} images in {}", files.len(), root.display());

        let bar = progress::bar(files.len(), format!("Scanning {}", root.display()), cli.quiet);
        let plan = checker.plan(&files, &bar);
        bar.finish_and_clear();

        println!(
            "{}: {} scanned, {} to resize, {} to delete",
            root.display(),
            plan.scanned,
            plan.resizes(),
            plan.deletions()
        );
        if cli.dry_run {
            for action in &plan.actions {
                println!("  would {}", action);
            }
            continue;
        }

        let bar = progress::bar(plan.actions.len(), "Repairing", cli.quiet);
        let report = checker.apply(&plan, &bar);
        bar.finish_and_clear();
        println!(
            "{}: {} resized, {} deleted, {} failed",
            root.display(),
            report.resized,
            report.deleted,
            report.failed
        );
    }
    Ok(())
}
