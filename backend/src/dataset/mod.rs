pub mod check;
pub mod count;
pub mod loader;
pub mod split;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use shared::ClassLabel;

use crate::vision::labels::{LabelError, LabelMap};
use crate::vision::preprocess::PreprocessError;

/// Formats the integrity checker looks at.
pub const INTEGRITY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff"];
/// Formats counted and moved by the count and split tools.
pub const SPLIT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
/// Formats the training and evaluation loader reads.
pub const LOADER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "tif"];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Directory not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Unknown class directory {name:?} in {}", root.display())]
    UnknownClass { root: PathBuf, name: String },
    #[error("No images found under {}", .0.display())]
    Empty(PathBuf),
    #[error("Failed to load {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: PreprocessError,
    },
    #[error(transparent)]
    Labels(#[from] LabelError),
    #[error("Failed to assemble batch: {0}")]
    Batch(#[from] ndarray::ShapeError),
    #[error("Worker pool error: {0}")]
    Pool(String),
}

impl DatasetError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        DatasetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Case-insensitive extension match.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Regular files directly inside `dir` with one of `extensions`, sorted by path.
pub fn list_images(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, DatasetError> {
    if !dir.is_dir() {
        return Err(DatasetError::NotFound(dir.to_path_buf()));
    }
    let mut images = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| DatasetError::io(dir, e))? {
        let path = entry.map_err(|e| DatasetError::io(dir, e))?.path();
        if path.is_file() && has_extension(&path, extensions) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Immediate subdirectories of `root`, sorted by name.
pub fn class_dirs(root: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    if !root.is_dir() {
        return Err(DatasetError::NotFound(root.to_path_buf()));
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| DatasetError::io(root, e))? {
        let path = entry.map_err(|e| DatasetError::io(root, e))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: ClassLabel,
    /// Output index of `label` in the dataset's label map.
    pub target: usize,
}

/// `root/<class>/<image>` layout. Class directories are taken in sorted
/// order, so `fake` maps to 0 and `real` to 1.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    labels: LabelMap,
    samples: Vec<Sample>,
}

impl ImageFolder {
    pub fn open(root: &Path) -> Result<Self, DatasetError> {
        let mut classes = Vec::new();
        let mut files = Vec::new();
        for dir in class_dirs(root)? {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let label = ClassLabel::from_str(&name).map_err(|_| DatasetError::UnknownClass {
                root: root.to_path_buf(),
                name: name.clone(),
            })?;
            classes.push(label);
            files.push((label, list_images(&dir, LOADER_EXTENSIONS)?));
        }

        let labels = LabelMap::new(classes)?;
        let mut samples = Vec::new();
        for (label, paths) in files {
            let target = labels.index_of(label).unwrap_or_default();
            samples.extend(paths.into_iter().map(|path| Sample {
                path,
                label,
                target,
            }));
        }
        if samples.is_empty() {
            return Err(DatasetError::Empty(root.to_path_buf()));
        }

        log::info!(
            "Found {} images in {} ({})",
            samples.len(),
            root.display(),
            labels
                .classes()
                .iter()
                .map(|&c| format!("{}: {}", c, samples.iter().filter(|s| s.label == c).count()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            root: root.to_path_buf(),
            labels,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Moves a file, falling back to copy and remove when a rename crosses
/// filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<(), DatasetError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|e| DatasetError::io(from, e))?;
    fs::remove_file(from).map_err(|e| DatasetError::io(from, e))
}


#[cfg(test)]
mod tests {
    use super::test_support::{touch, write_png};
    use super::*;

    #[test]
    fn extension_match_ignores_case() {
        assert!(has_extension(Path::new("a/B.JPG"), SPLIT_EXTENSIONS));
        assert!(has_extension(Path::new("x.Tif"), LOADER_EXTENSIONS));
        assert!(!has_extension(Path::new("x.tif"), INTEGRITY_EXTENSIONS));
        assert!(!has_extension(Path::new("x.bmp"), SPLIT_EXTENSIONS));
        assert!(!has_extension(Path::new("README"), SPLIT_EXTENSIONS));
    }

    #[test]
    fn list_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.png"), b"");
        touch(&dir.path().join("a.JPEG"), b"");
        touch(&dir.path().join("notes.txt"), b"");
        std::fs::create_dir(dir.path().join("sub.png")).unwrap();

        let images = list_images(dir.path(), SPLIT_EXTENSIONS).unwrap();
        let names: Vec<_> = images
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPEG", "b.png"]);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            list_images(&dir.path().join("nope"), SPLIT_EXTENSIONS),
            Err(DatasetError::NotFound(_))
        ));
    }

    #[test]
    fn image_folder_assigns_alphabetical_targets() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("real/r1.png"), 4, 4);
        write_png(&dir.path().join("fake/f1.png"), 4, 4);
        write_png(&dir.path().join("fake/f2.png"), 4, 4);

        let folder = ImageFolder::open(dir.path()).unwrap();
        assert_eq!(folder.len(), 3);
        assert_eq!(folder.labels(), &LabelMap::default());
        let real = folder.samples().iter().find(|s| s.label == ClassLabel::Real).unwrap();
        assert_eq!(real.target, 1);
        assert!(folder.samples().iter().filter(|s| s.target == 0).count() == 2);
    }

    #[test]
    fn image_folder_rejects_unknown_class() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("fake/f.png"), 4, 4);
        write_png(&dir.path().join("cats/c.png"), 4, 4);
        assert!(matches!(
            ImageFolder::open(dir.path()),
            Err(DatasetError::UnknownClass { name, .. }) if name == "cats"
        ));
    }

    #[test]
    fn move_file_creates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.png");
        touch(&from, b"data");
        let to = dir.path().join("out/train/a.png");
        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"data");
    }
}
