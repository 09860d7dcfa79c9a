use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use indicatif::ProgressBar;
use rayon::prelude::*;

use super::{DatasetError, INTEGRITY_EXTENSIONS, class_dirs, list_images};
use crate::vision::preprocess::{Preprocessor, bounded_dimensions, exceeds_pixel_limit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityAction {
    Resize {
        path: PathBuf,
        from: (u32, u32),
        to: (u32, u32),
    },
    Delete {
        path: PathBuf,
        reason: String,
    },
}

impl IntegrityAction {
    pub fn path(&self) -> &Path {
        match self {
            IntegrityAction::Resize { path, .. } | IntegrityAction::Delete { path, .. } => path,
        }
    }
}

impl fmt::Display for IntegrityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityAction::Resize { path, from, to } => write!(
                f,
                "resize {} ({}x{} -> {}x{})",
                path.display(),
                from.0,
                from.1,
                to.0,
                to.1
            ),
            IntegrityAction::Delete { path, reason } => {
                write!(f, "delete {} ({})", path.display(), reason)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityPlan {
    pub scanned: usize,
    pub actions: Vec<IntegrityAction>,
}

impl IntegrityPlan {
    pub fn resizes(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, IntegrityAction::Resize { .. }))
            .count()
    }

    pub fn deletions(&self) -> usize {
        self.actions.len() - self.resizes()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub resized: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Finds undecodable and decompression-bomb sized images under dataset roots
/// and repairs them in place: bombs are shrunk, corrupt files are deleted.
pub struct IntegrityChecker {
    preprocessor: Preprocessor,
    pool: rayon::ThreadPool,
}

impl IntegrityChecker {
    /// `threads == 0` uses one worker per core.
    pub fn new(preprocessor: Preprocessor, threads: usize) -> Result<Self, DatasetError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("integrity-{}", i))
            .build()
            .map_err(|e| DatasetError::Pool(e.to_string()))?;
        Ok(Self {
            preprocessor: preprocessor.unbounded(),
            pool,
        })
    }

    /// Images inside the class subdirectories of `root`.
    pub fn collect(&self, root: &Path) -> Result<Vec<PathBuf>, DatasetError> {
        let mut files = Vec::new();
        for dir in class_dirs(root)? {
            files.extend(list_images(&dir, INTEGRITY_EXTENSIONS)?);
        }
        Ok(files)
    }

    pub fn plan(&self, files: &[PathBuf], progress: &ProgressBar) -> IntegrityPlan {
        let mut actions: Vec<IntegrityAction> = self.pool.install(|| {
            files
                .par_iter()
                .filter_map(|path| {
                    let action = self.inspect(path);
                    progress.inc(1);
                    action
                })
                .collect()
        });
        actions.sort_by(|a, b| a.path().cmp(b.path()));
        IntegrityPlan {
            scanned: files.len(),
            actions,
        }
    }

    fn inspect(&self, path: &Path) -> Option<IntegrityAction> {
        match self.preprocessor.open(path) {
            Ok(image) => self.resize_action(path, &image),
            Err(e) => {
                log::warn!("Corrupted image found: {} ({})", path.display(), e);
                Some(IntegrityAction::Delete {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn resize_action(&self, path: &Path, image: &DynamicImage) -> Option<IntegrityAction> {
        let (width, height) = (image.width(), image.height());
        if !exceeds_pixel_limit(width, height, self.preprocessor.max_pixels()) {
            return None;
        }
        log::info!("Large image found: {} ({}x{})", path.display(), width, height);
        Some(IntegrityAction::Resize {
            path: path.to_path_buf(),
            from: (width, height),
            to: bounded_dimensions(width, height, self.preprocessor.bomb_max_edge()),
        })
    }

    pub fn apply(&self, plan: &IntegrityPlan, progress: &ProgressBar) -> IntegrityReport {
        let outcomes: Vec<(bool, bool)> = self.pool.install(|| {
            plan.actions
                .par_iter()
                .map(|action| {
                    let ok = match self.execute(action) {
                        Ok(()) => true,
                        Err(e) => {
                            log::error!("Failed to {}: {}", action, e);
                            false
                        }
                    };
                    progress.inc(1);
                    (matches!(action, IntegrityAction::Resize { .. }), ok)
                })
                .collect()
        });

        let mut report = IntegrityReport::default();
        for (resize, ok) in outcomes {
            match (resize, ok) {
                (_, false) => report.failed += 1,
                (true, true) => report.resized += 1,
                (false, true) => report.deleted += 1,
            }
        }
        report
    }

    fn execute(&self, action: &IntegrityAction) -> Result<(), DatasetError> {
        match action {
            IntegrityAction::Resize { path, to, .. } => {
                let image = self
                    .preprocessor
                    .open(path)
                    .map_err(|source| DatasetError::Image {
                        path: path.clone(),
                        source,
                    })?;
                let resized = self.preprocessor.guard_bomb(image).to_rgb8();
                debug_assert_eq!(resized.dimensions(), *to);
                DynamicImage::ImageRgb8(resized)
                    .save(path)
                    .map_err(|source| DatasetError::Image {
                        path: path.clone(),
                        source: source.into(),
                    })?;
                log::info!("Resize completed: {} ({}x{})", path.display(), to.0, to.1);
                Ok(())
            }
            IntegrityAction::Delete { path, .. } => {
                fs::remove_file(path).map_err(|e| DatasetError::io(path, e))?;
                log::info!("Deletion completed: {}", path.display());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{touch, write_png};
    use super::*;
    use crate::config::PreprocessingConfig;

    fn checker(max_pixels: u64, bomb_max_edge: u32) -> IntegrityChecker {
        let config = PreprocessingConfig {
            max_pixels,
            bomb_max_edge,
            ..PreprocessingConfig::default()
        };
        IntegrityChecker::new(Preprocessor::new(&config), 2).unwrap()
    }

    #[test]
    fn plans_delete_for_corrupt_and_resize_for_oversized() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("real/ok.png"), 10, 10);
        write_png(&dir.path().join("real/big.png"), 60, 30);
        touch(&dir.path().join("fake/broken.jpg"), b"\xff\xd8 truncated");
        touch(&dir.path().join("fake/notes.txt"), b"ignored");

        let checker = checker(1000, 40);
        let files = checker.collect(dir.path()).unwrap();
        assert_eq!(files.len(), 3);

        let plan = checker.plan(&files, &ProgressBar::hidden());
        assert_eq!(plan.scanned, 3);
        assert_eq!(plan.resizes(), 1);
        assert_eq!(plan.deletions(), 1);
        assert!(plan.actions.contains(&IntegrityAction::Resize {
            path: dir.path().join("real/big.png"),
            from: (60, 30),
            to: (40, 20),
        }));
    }

    #[test]
    fn apply_repairs_in_place_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("real/big.png");
        let broken = dir.path().join("fake/broken.png");
        write_png(&big, 30, 90);
        touch(&broken, b"");

        let checker = checker(1000, 45);
        let files = checker.collect(dir.path()).unwrap();
        let plan = checker.plan(&files, &ProgressBar::hidden());
        let report = checker.apply(&plan, &ProgressBar::hidden());

        assert_eq!(
            report,
            IntegrityReport {
                resized: 1,
                deleted: 1,
                failed: 0
            }
        );
        assert!(!broken.exists());
        let resized = image::open(&big).unwrap();
        assert_eq!((resized.width(), resized.height()), (15, 45));

        let files = checker.collect(dir.path()).unwrap();
        assert!(checker.plan(&files, &ProgressBar::hidden()).actions.is_empty());
    }

    #[test]
    fn failed_delete_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let plan = IntegrityPlan {
            scanned: 1,
            actions: vec![IntegrityAction::Delete {
                path: dir.path().join("already-gone.png"),
                reason: "corrupt".into(),
            }],
        };
        let report = checker(1000, 40).apply(&plan, &ProgressBar::hidden());
        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 0);
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            checker(1000, 40).collect(&dir.path().join("Train")),
            Err(DatasetError::NotFound(_))
        ));
    }
}
