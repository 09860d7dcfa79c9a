use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::ClassLabel;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::IntoEnumIterator;

use crate::config::PreprocessingConfig;

pub const MANIFEST_VERSION: u32 = 1;
const MANIFEST_SUFFIX: &str = ".labels.yaml";

#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("Unknown class name: {0}")]
    UnknownClass(String),
    #[error("Label map must list every class exactly once, got {0:?}")]
    InvalidClasses(Vec<ClassLabel>),
    #[error("Unsupported label manifest version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("Checkpoint digest mismatch: manifest has {expected}, file is {actual}")]
    DigestMismatch { expected: String, actual: String },
    #[error("Label manifest I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Label manifest format error: {0}")]
    Format(#[from] serde_yaml::Error),
}

/// Output index to class mapping of a classifier head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    classes: Vec<ClassLabel>,
}

impl Default for LabelMap {
    /// Alphabetical directory order: `fake` = 0, `real` = 1.
    fn default() -> Self {
        Self {
            classes: ClassLabel::iter().collect(),
        }
    }
}

impl LabelMap {
    pub fn new(classes: Vec<ClassLabel>) -> Result<Self, LabelError> {
        let complete = ClassLabel::iter().all(|label| classes.iter().filter(|&&c| c == label).count() == 1);
        if !complete || classes.len() != ClassLabel::iter().count() {
            return Err(LabelError::InvalidClasses(classes));
        }
        Ok(Self { classes })
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, LabelError> {
        let classes = names
            .iter()
            .map(|name| {
                ClassLabel::from_str(name.as_ref())
                    .map_err(|_| LabelError::UnknownClass(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(classes)
    }

    pub fn classes(&self) -> &[ClassLabel] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<ClassLabel> {
        self.classes.get(index).copied()
    }

    pub fn index_of(&self, label: ClassLabel) -> Option<usize> {
        self.classes.iter().position(|&c| c == label)
    }

    pub fn names(&self) -> Vec<String> {
        self.classes.iter().map(ToString::to_string).collect()
    }
}

/// Sidecar written next to every checkpoint. Pins the class order and the
/// preprocessing constants to the exact weights file they were trained with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelManifest {
    pub version: u32,
    pub classes: Vec<ClassLabel>,
    pub image_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub checkpoint_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl LabelManifest {
    pub fn for_checkpoint(
        checkpoint: &Path,
        labels: &LabelMap,
        preprocessing: &PreprocessingConfig,
    ) -> Result<Self, LabelError> {
        Ok(Self {
            version: MANIFEST_VERSION,
            classes: labels.classes().to_vec(),
            image_size: preprocessing.image_size,
            mean: preprocessing.mean,
            std: preprocessing.std,
            checkpoint_sha256: file_sha256(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// `best_model.safetensors` -> `best_model.safetensors.labels.yaml`
    pub fn path_for(checkpoint: &Path) -> PathBuf {
        let mut name = checkpoint
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(MANIFEST_SUFFIX);
        checkpoint.with_file_name(name)
    }

    pub fn load(path: &Path) -> Result<Self, LabelError> {
        let manifest_str = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&manifest_str)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), LabelError> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Checks the manifest belongs to `checkpoint` and returns its label map.
    pub fn verify(&self, checkpoint: &Path) -> Result<LabelMap, LabelError> {
        if self.version != MANIFEST_VERSION {
            return Err(LabelError::UnsupportedVersion {
                found: self.version,
                expected: MANIFEST_VERSION,
            });
        }
        let actual = file_sha256(checkpoint)?;
        if !actual.eq_ignore_ascii_case(&self.checkpoint_sha256) {
            return Err(LabelError::DigestMismatch {
                expected: self.checkpoint_sha256.clone(),
                actual,
            });
        }
        LabelMap::new(self.classes.clone())
    }

    /// `base` with the image size and normalization the checkpoint was trained with.
    pub fn preprocessing(&self, base: &PreprocessingConfig) -> PreprocessingConfig {
        PreprocessingConfig {
            image_size: self.image_size,
            mean: self.mean,
            std: self.std,
            ..base.clone()
        }
    }
}

pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_order_is_alphabetical() {
        let labels = LabelMap::default();
        assert_eq!(labels.label(0), Some(ClassLabel::Fake));
        assert_eq!(labels.label(1), Some(ClassLabel::Real));
        assert_eq!(labels.index_of(ClassLabel::Real), Some(1));
        assert_eq!(labels.names(), vec!["fake", "real"]);
    }

    #[test]
    fn label_map_rejects_duplicates_and_unknowns() {
        assert!(matches!(
            LabelMap::new(vec![ClassLabel::Fake, ClassLabel::Fake]),
            Err(LabelError::InvalidClasses(_))
        ));
        assert!(matches!(
            LabelMap::from_names(&["fake", "cat"]),
            Err(LabelError::UnknownClass(name)) if name == "cat"
        ));
        let reversed = LabelMap::from_names(&["Real", "Fake"]).unwrap();
        assert_eq!(reversed.index_of(ClassLabel::Fake), Some(1));
    }

    #[test]
    fn manifest_path_sits_beside_checkpoint() {
        assert_eq!(
            LabelManifest::path_for(Path::new("models/best_model.safetensors")),
            PathBuf::from("models/best_model.safetensors.labels.yaml")
        );
    }

    #[test]
    fn manifest_round_trip_and_digest_check() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = dir.path().join("model.ot");
        std::fs::write(&checkpoint, b"weights v1").unwrap();

        let labels = LabelMap::from_names(&["real", "fake"]).unwrap();
        let manifest =
            LabelManifest::for_checkpoint(&checkpoint, &labels, &PreprocessingConfig::default())
                .unwrap();
        let manifest_path = LabelManifest::path_for(&checkpoint);
        manifest.save(&manifest_path).unwrap();

        let loaded = LabelManifest::load(&manifest_path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.verify(&checkpoint).unwrap(), labels);

        std::fs::write(&checkpoint, b"weights v2").unwrap();
        assert!(matches!(
            loaded.verify(&checkpoint),
            Err(LabelError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn sha256_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
