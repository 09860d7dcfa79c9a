use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::Axis;
use serde::Serialize;
use shared::ClassLabel;

use super::metrics::{ClassificationReport, ConfusionMatrix};
use crate::config::EvaluationConfig;
use crate::dataset::loader::{BatchLoader, LoaderOptions};
use crate::dataset::{DatasetError, ImageFolder};
use crate::progress;
use crate::vision::model::{ImageClassifier, InferenceError};
use crate::vision::preprocess::Preprocessor;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Model predicts {model:?} but the dataset has {dataset:?}")]
    LabelMismatch {
        model: Vec<String>,
        dataset: Vec<String>,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Misclassified {
    pub path: PathBuf,
    pub actual: ClassLabel,
    pub predicted: ClassLabel,
    pub confidence: f64,
    /// Denormalized input written to the samples directory, if any.
    pub exported: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub report: ClassificationReport,
    pub confusion: ConfusionMatrix,
    pub misclassified: Vec<Misclassified>,
}

impl EvaluationReport {
    pub fn save_json(&self, path: &Path) -> Result<(), EvaluationError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Runs a classifier over a held-out [`ImageFolder`] with the deterministic
/// pipeline and collects metrics plus a few misclassified examples per
/// predicted class.
pub struct Evaluator<'a, C: ImageClassifier + ?Sized> {
    classifier: &'a C,
    preprocessor: Preprocessor,
    options: LoaderOptions,
    per_class_limit: usize,
    samples_dir: Option<PathBuf>,
    quiet: bool,
}

impl<'a, C: ImageClassifier + ?Sized> Evaluator<'a, C> {
    pub fn new(classifier: &'a C, preprocessor: Preprocessor, config: &EvaluationConfig) -> Self {
        Self {
            classifier,
            preprocessor,
            options: LoaderOptions::evaluation(config.batch_size, config.num_workers),
            per_class_limit: config.misclassified_per_class,
            samples_dir: config.samples_dir.clone(),
            quiet: false,
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn run(&self, dataset: &ImageFolder) -> Result<EvaluationReport, EvaluationError> {
        let labels = dataset.labels();
        if labels.len() != self.classifier.labels().len() {
            return Err(EvaluationError::LabelMismatch {
                model: self.classifier.labels().names(),
                dataset: labels.names(),
            });
        }
        if let Some(dir) = &self.samples_dir {
            std::fs::create_dir_all(dir)?;
        }

        let loader = BatchLoader::new(
            dataset.samples().to_vec(),
            self.preprocessor.clone(),
            &self.options,
            0,
        );
        let bar = progress::bar(loader.len(), "Evaluating", self.quiet);

        let mut confusion = ConfusionMatrix::new(labels.classes().to_vec());
        let mut misclassified = Vec::new();
        let mut kept: HashMap<ClassLabel, usize> = HashMap::new();

        for batch in loader {
            let batch = batch?;
            let predictions = self.classifier.predict(batch.images.view())?;
            for (i, prediction) in predictions.iter().enumerate() {
                let actual_index = batch.targets[i] as usize;
                let predicted_index = labels.index_of(prediction.label).unwrap_or_default();
                confusion.record(actual_index, predicted_index);
                if actual_index == predicted_index {
                    continue;
                }

                let count = kept.entry(prediction.label).or_default();
                if *count >= self.per_class_limit {
                    continue;
                }
                *count += 1;

                let exported = match &self.samples_dir {
                    Some(dir) => {
                        let name = format!(
                            "pred_{}_{:02}_{}.png",
                            prediction.label,
                            count,
                            batch.paths[i]
                                .file_stem()
                                .map(|s| s.to_string_lossy().into_owned())
                                .unwrap_or_default()
                        );
                        let path = dir.join(name);
                        self.preprocessor
                            .denormalize(batch.images.index_axis(Axis(0), i))
                            .save(&path)
                            .map_err(|source| EvaluationError::Export {
                                path: path.clone(),
                                source,
                            })?;
                        Some(path)
                    }
                    None => None,
                };

                let actual = labels.label(actual_index).unwrap_or(prediction.label);
                log::info!(
                    "Misclassified as {}: {} (actual {}, confidence {:.3}%)",
                    prediction.label,
                    batch.paths[i].display(),
                    actual,
                    prediction.confidence
                );
                misclassified.push(Misclassified {
                    path: batch.paths[i].clone(),
                    actual,
                    predicted: prediction.label,
                    confidence: prediction.confidence,
                    exported,
                });
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        Ok(EvaluationReport {
            report: ClassificationReport::from_confusion(&confusion),
            confusion,
            misclassified,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PreprocessingConfig;
    use crate::vision::labels::LabelMap;
    use image::{Rgb, RgbImage};
    use ndarray::{Array2, ArrayView4};

    /// Calls bright images fake and dark images real.
    struct BrightnessClassifier {
        labels: LabelMap,
    }

    impl ImageClassifier for BrightnessClassifier {
        fn labels(&self) -> &LabelMap {
            &self.labels
        }

        fn logits(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, InferenceError> {
            let n = batch.shape()[0];
            Ok(Array2::from_shape_fn((n, 2), |(i, j)| {
                let mean = batch.index_axis(Axis(0), i).mean().unwrap_or(0.0);
                if j == 0 { mean } else { -mean }
            }))
        }
    }

    fn write(path: &Path, value: u8) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(12, 12, Rgb([value, value, value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn collects_metrics_and_misclassified_samples() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("Test");
        write(&data.join("fake/a.png"), 250);
        write(&data.join("fake/b.png"), 240);
        write(&data.join("real/c.png"), 10);
        write(&data.join("real/d.png"), 255);
        let dataset = ImageFolder::open(&data).unwrap();

        let samples_dir = dir.path().join("samples");
        let config = EvaluationConfig {
            batch_size: 3,
            num_workers: 2,
            samples_dir: Some(samples_dir.clone()),
            ..EvaluationConfig::default()
        };
        let preprocessor = Preprocessor::new(&PreprocessingConfig {
            image_size: 8,
            ..PreprocessingConfig::default()
        });
        let classifier = BrightnessClassifier {
            labels: LabelMap::default(),
        };

        let result = Evaluator::new(&classifier, preprocessor, &config)
            .quiet(true)
            .run(&dataset)
            .unwrap();

        assert_eq!(result.confusion.count(0, 0), 2);
        assert_eq!(result.confusion.count(1, 0), 1);
        assert_eq!(result.confusion.count(1, 1), 1);
        assert!((result.report.accuracy - 0.75).abs() < 1e-9);
        assert!((result.report.classes[0].precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((result.report.classes[1].recall - 0.5).abs() < 1e-9);

        assert_eq!(result.misclassified.len(), 1);
        let miss = &result.misclassified[0];
        assert_eq!(miss.path, data.join("real/d.png"));
        assert_eq!(miss.actual, ClassLabel::Real);
        assert_eq!(miss.predicted, ClassLabel::Fake);
        let exported = miss.exported.as_ref().unwrap();
        assert!(exported.starts_with(&samples_dir));
        let image = image::open(exported).unwrap();
        assert_eq!((image.width(), image.height()), (8, 8));

        let report_path = dir.path().join("report.json");
        result.save_json(&report_path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(json["misclassified"][0]["predicted"], "fake");
    }

    #[test]
    fn misclassified_list_is_capped_per_predicted_class() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("Test");
        write(&data.join("fake/keep.png"), 200);
        for i in 0..4 {
            write(&data.join(format!("real/bright{}.png", i)), 230);
        }
        let dataset = ImageFolder::open(&data).unwrap();
        let config = EvaluationConfig {
            batch_size: 2,
            num_workers: 1,
            misclassified_per_class: 2,
            ..EvaluationConfig::default()
        };
        let classifier = BrightnessClassifier {
            labels: LabelMap::default(),
        };
        let preprocessor = Preprocessor::new(&PreprocessingConfig {
            image_size: 8,
            ..PreprocessingConfig::default()
        });

        let result = Evaluator::new(&classifier, preprocessor, &config)
            .quiet(true)
            .run(&dataset)
            .unwrap();
        assert_eq!(result.confusion.count(1, 0), 4);
        assert_eq!(result.misclassified.len(), 2);
        assert!(result.misclassified.iter().all(|m| m.exported.is_none()));
    }
}
