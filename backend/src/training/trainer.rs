use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Local;
use tch::nn::{self, OptimizerConfig};
use tch::{Kind, TchError, Tensor};

use super::scaler::LossScaler;
use super::schedule::{EarlyStopping, EpochVerdict, StepLr, estimate_remaining, format_duration};
use crate::config::{PreprocessingConfig, TrainingConfig};
use crate::dataset::loader::{Batch, BatchLoader, LoaderOptions};
use crate::dataset::{DatasetError, ImageFolder};
use crate::progress;
use crate::vision::labels::{LabelError, LabelManifest};
use crate::vision::model::{Classifier, ImageClassifier, InferenceError, ModelError};
use crate::vision::preprocess::Preprocessor;

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Labels(#[from] LabelError),
    #[error("Torch error: {0}")]
    Torch(#[from] TchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Dataset classes {dataset:?} do not match model classes {model:?}")]
    LabelMismatch {
        dataset: Vec<String>,
        model: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingOutcome {
    /// Training accuracy reached 100%.
    Converged,
    /// Accuracy stopped improving for `patience` epochs.
    EarlyStopped,
    /// Ran every configured epoch.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    /// 1-based.
    pub epoch: usize,
    pub loss: f64,
    /// Percent.
    pub accuracy: f64,
    pub learning_rate: f64,
    pub duration: Duration,
    pub skipped_steps: usize,
    pub saved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub outcome: TrainingOutcome,
    pub epochs_run: usize,
    pub best_accuracy: f64,
    pub history: Vec<EpochStats>,
}

/// Fine-tunes a [`Classifier`] on an [`ImageFolder`], checkpointing the best
/// epoch by training accuracy.
pub struct Trainer {
    classifier: Classifier,
    preprocessor: Preprocessor,
    preprocessing: PreprocessingConfig,
    config: TrainingConfig,
    quiet: bool,
}

impl Trainer {
    pub fn new(
        classifier: Classifier,
        preprocessing: PreprocessingConfig,
        config: TrainingConfig,
    ) -> Self {
        Self {
            classifier,
            preprocessor: Preprocessor::new(&preprocessing),
            preprocessing,
            config,
            quiet: false,
        }
    }

    /// Hides progress bars.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn run(&mut self, dataset: &ImageFolder) -> Result<TrainingSummary, TrainingError> {
        if dataset.labels() != self.classifier.labels() {
            return Err(TrainingError::LabelMismatch {
                dataset: dataset.labels().names(),
                model: self.classifier.labels().names(),
            });
        }

        let device = self.classifier.device();
        let mixed_precision = self.config.mixed_precision && device.is_cuda();
        let mut scaler = LossScaler::new(mixed_precision);
        let schedule = StepLr::new(
            self.config.learning_rate,
            self.config.lr_step_size,
            self.config.lr_gamma,
        );
        let mut stopper = EarlyStopping::new(self.config.patience);
        let mut optimizer = nn::AdamW {
            wd: self.config.weight_decay,
            ..Default::default()
        }
        .build(self.classifier.var_store(), self.config.learning_rate)?;
        let parameters = self.classifier.var_store().trainable_variables();

        let options = LoaderOptions::training(
            self.config.batch_size,
            self.config.num_workers,
            self.config.prefetch_batches,
            self.config.seed,
        );

        log::info!(
            "Training on {} images for up to {} epochs ({:?}, mixed precision: {})",
            dataset.len(),
            self.config.epochs,
            device,
            mixed_precision
        );
        log::warn!("Early stopping monitors training accuracy; no validation split is held out");

        let started = Instant::now();
        let mut history = Vec::new();
        let mut outcome = TrainingOutcome::Exhausted;

        for epoch in 0..self.config.epochs {
            let epoch_started = Instant::now();
            let learning_rate = schedule.lr(epoch);
            optimizer.set_lr(learning_rate);

            let loader = BatchLoader::new(
                dataset.samples().to_vec(),
                self.preprocessor.clone(),
                &options,
                epoch as u64,
            );
            let bar = progress::bar(
                loader.len(),
                format!("Epoch {}/{}", epoch + 1, self.config.epochs),
                self.quiet,
            );

            let mut totals = EpochTotals::default();
            for batch in loader {
                let batch = batch?;
                let step = self.train_step(&batch, &mut optimizer, &mut scaler, &parameters)?;
                totals.add(&step, batch.len());
                bar.inc(1);
                bar.set_message(format!(
                    "loss {:.4} acc {:.2}%",
                    totals.loss(),
                    totals.accuracy()
                ));
            }
            bar.finish_and_clear();

            let verdict = stopper.observe(totals.accuracy());
            let saved = verdict.is_improvement();
            if saved {
                self.save_checkpoint()?;
            }

            let epochs_done = epoch + 1;
            let remaining = estimate_remaining(started.elapsed(), epochs_done, self.config.epochs);
            let eta = Local::now() + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
            log::info!(
                "Epoch {}/{} - loss: {:.4}, acc: {:.2}%, lr: {:.6}, progress: {:.1}%, ETA: {} (remaining {}){}",
                epochs_done,
                self.config.epochs,
                totals.loss(),
                totals.accuracy(),
                learning_rate,
                100.0 * epochs_done as f64 / self.config.epochs as f64,
                eta.format("%H:%M:%S"),
                format_duration(remaining),
                if saved { " [saved]" } else { "" }
            );

            history.push(EpochStats {
                epoch: epochs_done,
                loss: totals.loss(),
                accuracy: totals.accuracy(),
                learning_rate,
                duration: epoch_started.elapsed(),
                skipped_steps: totals.skipped,
                saved,
            });

            match verdict {
                EpochVerdict::Converged => {
                    log::info!("Training accuracy reached 100%, stopping");
                    outcome = TrainingOutcome::Converged;
                    break;
                }
                EpochVerdict::Stop => {
                    log::info!(
                        "No improvement for {} epochs, stopping early",
                        self.config.patience
                    );
                    outcome = TrainingOutcome::EarlyStopped;
                    break;
                }
                EpochVerdict::Stalled(n) => log::info!("No improvement for {} epoch(s)", n),
                EpochVerdict::Improved => {}
            }
        }

        let summary = TrainingSummary {
            outcome,
            epochs_run: history.len(),
            best_accuracy: stopper.best().unwrap_or(0.0),
            history,
        };
        log::info!(
            "Training finished ({:?}) after {} epochs in {}, best accuracy {:.2}%",
            summary.outcome,
            summary.epochs_run,
            format_duration(started.elapsed()),
            summary.best_accuracy
        );
        Ok(summary)
    }

    fn train_step(
        &self,
        batch: &Batch,
        optimizer: &mut nn::Optimizer,
        scaler: &mut LossScaler,
        parameters: &[Tensor],
    ) -> Result<StepResult, TrainingError> {
        let device = self.classifier.device();
        let images = self.classifier.array_to_tensor(batch.images.view())?;
        let targets = Tensor::from_slice(&batch.targets).to_device(device);

        let logits = tch::autocast(scaler.is_enabled(), || self.classifier.forward_train(&images))?;
        let loss = logits.to_kind(Kind::Float).cross_entropy_for_logits(&targets);

        optimizer.zero_grad();
        scaler.scale_loss(&loss).backward();
        let finite = scaler.unscale(parameters);
        let stepped = scaler.update(finite);
        if stepped {
            optimizer.step();
        }

        let correct = logits
            .argmax(-1, false)
            .eq_tensor(&targets)
            .sum(Kind::Int64)
            .int64_value(&[]);
        Ok(StepResult {
            loss: loss.double_value(&[]),
            correct: correct as usize,
            stepped,
        })
    }

    fn save_checkpoint(&self) -> Result<(), TrainingError> {
        let path: &Path = &self.config.checkpoint;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.classifier.save(path)?;
        let manifest =
            LabelManifest::for_checkpoint(path, self.classifier.labels(), &self.preprocessing)?;
        manifest.save(&LabelManifest::path_for(path))?;
        log::debug!("Saved checkpoint to {}", path.display());
        Ok(())
    }
}

struct StepResult {
    loss: f64,
    correct: usize,
    stepped: bool,
}

#[derive(Default)]
struct EpochTotals {
    loss_sum: f64,
    correct: usize,
    seen: usize,
    skipped: usize,
}

impl EpochTotals {
    fn add(&mut self, step: &StepResult, batch_len: usize) {
        self.loss_sum += step.loss * batch_len as f64;
        self.correct += step.correct;
        self.seen += batch_len;
        if !step.stepped {
            self.skipped += 1;
        }
    }

    fn loss(&self) -> f64 {
        if self.seen == 0 { 0.0 } else { self.loss_sum / self.seen as f64 }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.0
        } else {
            100.0 * self.correct as f64 / self.seen as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::write_png;
    use tch::Device;

    #[test]
    fn epoch_totals_weight_loss_by_batch() {
        let mut totals = EpochTotals::default();
        totals.add(
            &StepResult {
                loss: 1.0,
                correct: 2,
                stepped: true,
            },
            4,
        );
        totals.add(
            &StepResult {
                loss: 0.25,
                correct: 1,
                stepped: false,
            },
            2,
        );
        assert!((totals.loss() - 4.5 / 6.0).abs() < 1e-12);
        assert!((totals.accuracy() - 50.0).abs() < 1e-12);
        assert_eq!(totals.skipped, 1);
    }

    #[test]
    fn short_cpu_run_checkpoints_first_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("Train");
        for i in 0..2 {
            write_png(&data.join(format!("fake/{}.png", i)), 70, 64);
            write_png(&data.join(format!("real/{}.png", i)), 64, 70);
        }
        let dataset = ImageFolder::open(&data).unwrap();
        let checkpoint = dir.path().join("model/best.safetensors");

        let preprocessing = PreprocessingConfig {
            image_size: 64,
            ..PreprocessingConfig::default()
        };
        let config = TrainingConfig {
            checkpoint: checkpoint.clone(),
            batch_size: 2,
            num_workers: 2,
            epochs: 2,
            ..TrainingConfig::default()
        };
        let mut classifier = Classifier::with_labels(dataset.labels().clone(), Device::Cpu);
        assert!(classifier.apply_transfer_policy() > 0);
        let snapshot = |classifier: &Classifier, name: &str| {
            classifier.var_store().variables()[name].detach().copy()
        };
        let head_before = snapshot(&classifier, "classifier.1.weight");
        let stem_before = snapshot(&classifier, "features.0.0.weight");

        let mut trainer = Trainer::new(classifier, preprocessing, config).quiet(true);
        let summary = trainer.run(&dataset).unwrap();

        let head_after = snapshot(trainer.classifier(), "classifier.1.weight");
        let stem_after = snapshot(trainer.classifier(), "features.0.0.weight");
        let moved = |a: &Tensor, b: &Tensor| (a - b).abs().max().double_value(&[]);
        assert!(moved(&head_before, &head_after) > 0.0);
        assert_eq!(moved(&stem_before, &stem_after), 0.0);

        assert!(summary.epochs_run >= 1 && summary.epochs_run <= 2);
        assert_eq!(summary.history.len(), summary.epochs_run);
        assert!(summary.history[0].saved);
        assert!(summary.history.iter().all(|e| e.loss.is_finite()));
        assert!(checkpoint.exists());

        let manifest = LabelManifest::load(&LabelManifest::path_for(&checkpoint)).unwrap();
        assert_eq!(manifest.image_size, 64);
        assert_eq!(&manifest.verify(&checkpoint).unwrap(), dataset.labels());
    }
}
