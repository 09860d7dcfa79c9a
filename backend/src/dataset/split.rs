use std::fmt;
use std::fs;
use std::path::PathBuf;

use indicatif::ProgressBar;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use shared::ClassLabel;

use super::{DatasetError, SPLIT_EXTENSIONS, list_images, move_file};
use crate::config::SplitConfig;

pub const TRAIN_DIR: &str = "Train";
pub const TEST_DIR: &str = "Test";

/// Shuffles `items` and cuts them at `floor(len * train_ratio)`.
pub fn split_files<T, R: rand::Rng + ?Sized>(
    mut items: Vec<T>,
    train_ratio: f64,
    rng: &mut R,
) -> (Vec<T>, Vec<T>) {
    items.shuffle(rng);
    let split_point = (items.len() as f64 * train_ratio.clamp(0.0, 1.0)).floor() as usize;
    let test = items.split_off(split_point.min(items.len()));
    (items, test)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMove {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSplit {
    pub label: ClassLabel,
    pub source: PathBuf,
    pub train: usize,
    pub test: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPlan {
    pub output_dir: PathBuf,
    pub classes: Vec<ClassSplit>,
    /// Source directories that do not exist.
    pub missing: Vec<PathBuf>,
    pub moves: Vec<FileMove>,
}

impl SplitPlan {
    pub fn train_total(&self) -> usize {
        self.classes.iter().map(|c| c.train).sum()
    }

    pub fn test_total(&self) -> usize {
        self.classes.iter().map(|c| c.test).sum()
    }

    fn destination_dirs(&self) -> Vec<PathBuf> {
        [TRAIN_DIR, TEST_DIR]
            .iter()
            .flat_map(|split| {
                [ClassLabel::Fake, ClassLabel::Real]
                    .map(|label| self.output_dir.join(split).join(label.to_string()))
            })
            .collect()
    }

    /// Creates the destination tree and performs every move. Returns the
    /// number of files moved.
    pub fn apply(&self, progress: &ProgressBar) -> Result<usize, DatasetError> {
        for dir in self.destination_dirs() {
            fs::create_dir_all(&dir).map_err(|e| DatasetError::io(&dir, e))?;
        }
        for file_move in &self.moves {
            move_file(&file_move.from, &file_move.to)?;
            progress.inc(1);
        }
        Ok(self.moves.len())
    }
}

impl fmt::Display for SplitPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dir in &self.missing {
            writeln!(f, "Directory not found: {}", dir.display())?;
        }
        for class in &self.classes {
            writeln!(
                f,
                "{} split: {} for training, {} for testing",
                class.label,
                class.train,
                class.test
            )?;
        }
        let count = |label: ClassLabel, train: bool| {
            self.classes
                .iter()
                .filter(|c| c.label == label)
                .map(|c| if train { c.train } else { c.test })
                .sum::<usize>()
        };
        writeln!(
            f,
            "Training data: {} ({} fake, {} real)",
            self.train_total(),
            count(ClassLabel::Fake, true),
            count(ClassLabel::Real, true)
        )?;
        writeln!(
            f,
            "Testing data: {} ({} fake, {} real)",
            self.test_total(),
            count(ClassLabel::Fake, false),
            count(ClassLabel::Real, false)
        )?;
        write!(f, "Total data: {}", self.train_total() + self.test_total())
    }
}

/// Plans the seeded train/test split of the flat `Fake`/`Real` source
/// directories. Fake is shuffled before real from one RNG stream, so a plan is
/// fully determined by the seed and the sorted file names.
pub fn plan_split(config: &SplitConfig) -> Result<SplitPlan, DatasetError> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut plan = SplitPlan {
        output_dir: config.output_dir.clone(),
        ..SplitPlan::default()
    };

    for (label, source) in [
        (ClassLabel::Fake, &config.fake_dir),
        (ClassLabel::Real, &config.real_dir),
    ] {
        let files = match list_images(source, SPLIT_EXTENSIONS) {
            Ok(files) => files,
            Err(DatasetError::NotFound(dir)) => {
                log::warn!("Directory not found: {}", dir.display());
                plan.missing.push(dir);
                continue;
            }
            Err(e) => return Err(e),
        };
        log::info!("{}: {} images in {}", label, files.len(), source.display());

        let (train, test) = split_files(files, config.train_ratio, &mut rng);
        plan.classes.push(ClassSplit {
            label,
            source: source.clone(),
            train: train.len(),
            test: test.len(),
        });
        for (split, files) in [(TRAIN_DIR, train), (TEST_DIR, test)] {
            let dest = config.output_dir.join(split).join(label.to_string());
            plan.moves.extend(files.into_iter().filter_map(|from| {
                let name = from.file_name()?.to_owned();
                Some(FileMove {
                    to: dest.join(name),
                    from,
                })
            }));
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::touch;
    use super::*;
    use std::path::Path;

    fn seeded_sources(root: &Path, fakes: usize, reals: usize) -> SplitConfig {
        for i in 0..fakes {
            touch(&root.join(format!("Fake/f{:03}.png", i)), b"f");
        }
        for i in 0..reals {
            touch(&root.join(format!("Real/r{:03}.jpg", i)), b"r");
        }
        touch(&root.join("Fake/readme.txt"), b"skip");
        SplitConfig {
            fake_dir: root.join("Fake"),
            real_dir: root.join("Real"),
            output_dir: root.join("data"),
            ..SplitConfig::default()
        }
    }

    #[test]
    fn split_point_is_floored() {
        let mut rng = ChaCha8Rng::seed_from_u64(20);
        let (train, test) = split_files((0..9).collect::<Vec<_>>(), 0.8, &mut rng);
        assert_eq!((train.len(), test.len()), (7, 2));
        let (train, test) = split_files(Vec::<u8>::new(), 0.8, &mut rng);
        assert!(train.is_empty() && test.is_empty());
    }

    #[test]
    fn same_seed_same_plan() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let plan_a = plan_split(&seeded_sources(a.path(), 25, 10)).unwrap();
        let plan_b = plan_split(&seeded_sources(b.path(), 25, 10)).unwrap();

        let names = |plan: &SplitPlan, root: &Path| -> Vec<PathBuf> {
            plan.moves
                .iter()
                .map(|m| m.to.strip_prefix(root).unwrap().to_path_buf())
                .collect()
        };
        assert_eq!(names(&plan_a, a.path()), names(&plan_b, b.path()));

        let other_seed = SplitConfig {
            seed: 21,
            ..seeded_sources(a.path(), 0, 0)
        };
        assert_ne!(
            names(&plan_split(&other_seed).unwrap(), a.path()),
            names(&plan_a, a.path())
        );
    }

    #[test]
    fn apply_moves_every_file_and_conserves_counts() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_sources(dir.path(), 11, 5);
        let plan = plan_split(&config).unwrap();
        assert_eq!(plan.train_total(), 8 + 4);
        assert_eq!(plan.test_total(), 3 + 1);

        let moved = plan.apply(&ProgressBar::hidden()).unwrap();
        assert_eq!(moved, 16);
        let count = |p: &str| list_images(&dir.path().join(p), SPLIT_EXTENSIONS).unwrap().len();
        assert_eq!(count("data/Train/fake"), 8);
        assert_eq!(count("data/Test/fake"), 3);
        assert_eq!(count("data/Train/real"), 4);
        assert_eq!(count("data/Test/real"), 1);
        assert_eq!(count("Fake"), 0);
        assert!(dir.path().join("Fake/readme.txt").exists());

        let rerun = plan_split(&config).unwrap();
        assert!(rerun.moves.is_empty());
    }

    #[test]
    fn dry_run_plan_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = seeded_sources(dir.path(), 4, 4);
        let plan = plan_split(&config).unwrap();
        assert_eq!(plan.moves.len(), 8);
        assert!(!dir.path().join("data").exists());
        assert!(plan.moves.iter().all(|m| m.from.exists()));
        assert!(plan.moves.iter().all(|m| m.to.starts_with(&config.output_dir)));
    }

    #[test]
    fn missing_source_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Real/r.png"), b"r");
        let config = SplitConfig {
            fake_dir: dir.path().join("Fake"),
            real_dir: dir.path().join("Real"),
            output_dir: dir.path().join("data"),
            ..SplitConfig::default()
        };
        let plan = plan_split(&config).unwrap();
        assert_eq!(plan.missing, vec![dir.path().join("Fake")]);
        assert_eq!(plan.classes.len(), 1);
        assert_eq!(plan.classes[0].label, ClassLabel::Real);
        assert!(plan.to_string().contains("Directory not found"));
    }
}
