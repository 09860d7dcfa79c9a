use std::fmt;
use std::path::{Path, PathBuf};

use super::{DatasetError, SPLIT_EXTENSIONS, list_images};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryCount {
    pub dir: PathBuf,
    /// `None` when the directory does not exist.
    pub images: Option<usize>,
}

impl DirectoryCount {
    pub fn count(&self) -> usize {
        self.images.unwrap_or(0)
    }
}

impl fmt::Display for DirectoryCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.images {
            Some(n) => write!(f, "Number of images in {}: {}", self.dir.display(), n),
            None => write!(f, "Directory not found: {}", self.dir.display()),
        }
    }
}

pub fn count_images(dir: &Path) -> Result<DirectoryCount, DatasetError> {
    let images = match list_images(dir, SPLIT_EXTENSIONS) {
        Ok(files) => Some(files.len()),
        Err(DatasetError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };
    Ok(DirectoryCount {
        dir: dir.to_path_buf(),
        images,
    })
}

pub fn count_directories(dirs: &[PathBuf]) -> Result<Vec<DirectoryCount>, DatasetError> {
    dirs.iter().map(|dir| count_images(dir)).collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::touch;
    use super::*;

    #[test]
    fn counts_only_split_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("Train/real");
        for name in ["a.jpg", "b.JPEG", "c.png", "d.bmp", "e.tiff", "f.txt"] {
            touch(&real.join(name), b"");
        }
        let count = count_images(&real).unwrap();
        assert_eq!(count.images, Some(3));
        assert_eq!(
            count.to_string(),
            format!("Number of images in {}: 3", real.display())
        );
    }

    #[test]
    fn missing_directory_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = vec![dir.path().join("Test/fake"), dir.path().to_path_buf()];
        let counts = count_directories(&dirs).unwrap();
        assert_eq!(counts[0].images, None);
        assert_eq!(counts[0].count(), 0);
        assert!(counts[0].to_string().starts_with("Directory not found"));
        assert_eq!(counts[1].images, Some(0));
    }
}
