//! Prints the number of images in each class directory.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use detector::config::PipelineConfig;
use detector::dataset::count::count_directories;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directories to count; defaults to the train/test class directories
    #[arg(value_name = "DIR")]
    dirs: Vec<PathBuf>,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    let cli = Cli::parse();

    let dirs = if cli.dirs.is_empty() {
        PipelineConfig::load_or_default(cli.config.as_deref())?
            .dataset
            .count_dirs
    } else {
        cli.dirs
    };

    let counts = count_directories(&dirs)?;
    for count in &counts {
        println!("{}", count);
    }
    println!("Total: {}", counts.iter().map(|c| c.count()).sum::<usize>());
    Ok(())
}
