use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{Array2, ArrayView4};
use tch::nn::{self, ModuleT};
use tch::{Device, Kind, TchError, Tensor};

use super::labels::{LabelError, LabelManifest, LabelMap};
use super::prediction::{Prediction, PredictionError};

/// First `features.<i>` module left trainable. `features.0` is the stem,
/// 1..=7 the MBConv stages and 8 the head conv, so 6..=8 are the last three.
pub const FIRST_TRAINABLE_STAGE: usize = 6;
const FEATURES_PREFIX: &str = "features.";
const HEAD_PREFIX: &str = "classifier.";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model checkpoint not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to load weights from {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: TchError,
    },
    #[error("Failed to save weights to {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: TchError,
    },
    #[error("Backbone tensor {name} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
    #[error("Pretrained weights are missing {0} backbone tensors")]
    MissingBackbone(usize),
    #[error(transparent)]
    Labels(#[from] LabelError),
    #[error("Model error: {0}")]
    Torch(#[from] TchError),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model error: {0}")]
    Model(#[from] TchError),
    #[error("Unexpected output shape {0:?}")]
    Shape(Vec<i64>),
    #[error("Input batch is not contiguous")]
    Layout,
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("Model lock poisoned")]
    Poisoned,
}

/// What the HTTP layer and the evaluator need from a model.
pub trait ImageClassifier: Send + Sync {
    fn labels(&self) -> &LabelMap;

    /// Raw logits `(N, classes)` for a normalized `(N, 3, H, W)` batch.
    fn logits(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, InferenceError>;

    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Vec<Prediction>, InferenceError> {
        let logits = self.logits(batch)?;
        logits
            .rows()
            .into_iter()
            .map(|row| Ok(Prediction::from_logits(&row.to_vec(), self.labels())?))
            .collect()
    }
}

/// EfficientNet-B0 with a two-logit head.
pub struct Classifier {
    vs: nn::VarStore,
    net: Mutex<Box<dyn ModuleT + Send>>,
    labels: LabelMap,
    device: Device,
}

impl Classifier {
    pub fn new(device: Device) -> Self {
        Self::with_labels(LabelMap::default(), device)
    }

    pub fn with_labels(labels: LabelMap, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let net = tch::vision::efficientnet::b0(&vs.root(), labels.len() as i64);
        Self {
            vs,
            net: Mutex::new(Box::new(net)),
            labels,
            device,
        }
    }

    /// Rebuilds the architecture and loads every variable from `checkpoint`.
    pub fn load(checkpoint: &Path, labels: LabelMap, device: Device) -> Result<Self, ModelError> {
        if !checkpoint.exists() {
            return Err(ModelError::NotFound(checkpoint.to_path_buf()));
        }
        let mut classifier = Self::with_labels(labels, device);
        classifier
            .vs
            .load(checkpoint)
            .map_err(|source| ModelError::Load {
                path: checkpoint.to_path_buf(),
                source,
            })?;
        classifier.vs.freeze();
        log::info!(
            "Loaded {} tensors from {} on {:?}",
            classifier.vs.len(),
            checkpoint.display(),
            device
        );
        Ok(classifier)
    }

    /// Loads `checkpoint` with the class order from its label manifest
    /// (`labels_path`, or the sidecar next to the checkpoint). A missing
    /// manifest falls back to the default order; a mismatching one is an error.
    pub fn load_with_manifest(
        checkpoint: &Path,
        labels_path: Option<&Path>,
        device: Device,
    ) -> Result<(Self, Option<LabelManifest>), ModelError> {
        let manifest_path = labels_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| LabelManifest::path_for(checkpoint));

        let manifest = if manifest_path.exists() {
            Some(LabelManifest::load(&manifest_path)?)
        } else {
            log::warn!(
                "No label manifest at {}, assuming class order {:?}",
                manifest_path.display(),
                LabelMap::default().names()
            );
            None
        };
        let labels = match &manifest {
            Some(manifest) => manifest.verify(checkpoint)?,
            None => LabelMap::default(),
        };

        let classifier = Self::load(checkpoint, labels, device)?;
        Ok((classifier, manifest))
    }

    /// Copies pretrained ImageNet weights into every backbone variable. The
    /// head keeps its fresh initialization.
    pub fn load_backbone(&mut self, weights: &Path) -> Result<usize, ModelError> {
        let load_err = |source| ModelError::Load {
            path: weights.to_path_buf(),
            source,
        };
        let pretrained = match weights.extension().and_then(|e| e.to_str()) {
            Some("safetensors") => Tensor::read_safetensors(weights).map_err(load_err)?,
            _ => Tensor::load_multi(weights).map_err(load_err)?,
        };
        let pretrained: std::collections::HashMap<_, _> = pretrained.into_iter().collect();

        let mut copied = 0;
        let mut missing = 0;
        for (name, mut var) in self.vs.variables() {
            if name.starts_with(HEAD_PREFIX) {
                continue;
            }
            let Some(source) = pretrained.get(&name) else {
                log::warn!("Pretrained weights have no tensor {}", name);
                missing += 1;
                continue;
            };
            if source.size() != var.size() {
                return Err(ModelError::ShapeMismatch {
                    name,
                    expected: var.size(),
                    found: source.size(),
                });
            }
            tch::no_grad(|| var.f_copy_(&source.to_device(self.device)))?;
            copied += 1;
        }
        if missing > 0 {
            return Err(ModelError::MissingBackbone(missing));
        }
        log::info!("Copied {} pretrained tensors from {}", copied, weights.display());
        Ok(copied)
    }

    /// Freezes the backbone except the last feature stages, the head conv
    /// and the classifier. Returns the number of trainable tensors.
    pub fn apply_transfer_policy(&mut self) -> usize {
        let mut trainable = 0;
        for (name, var) in named_parameters(&self.vs) {
            let train = is_trainable(&name);
            let _ = var.set_requires_grad(train);
            if train {
                trainable += 1;
            }
        }
        log::info!("Transfer policy: {} trainable tensors", trainable);
        trainable
    }

    pub fn forward_train(&self, batch: &Tensor) -> Result<Tensor, InferenceError> {
        let net = self.net.lock().map_err(|_| InferenceError::Poisoned)?;
        Ok(net.forward_t(batch, true))
    }

    /// Eval-mode forward pass without autograd.
    pub fn infer(&self, batch: &Tensor) -> Result<Tensor, InferenceError> {
        let net = self.net.lock().map_err(|_| InferenceError::Poisoned)?;
        Ok(tch::no_grad(|| net.forward_t(batch, false)))
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        self.vs.save(path).map_err(|source| ModelError::Save {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn array_to_tensor(&self, batch: ArrayView4<'_, f32>) -> Result<Tensor, InferenceError> {
        array_to_tensor(batch, self.device)
    }
}

impl ImageClassifier for Classifier {
    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn logits(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, InferenceError> {
        let input = self.array_to_tensor(batch)?;
        let output = self.infer(&input)?;
        tensor_to_array2(&output)
    }
}

/// Parameters sorted by name. Batch-norm running statistics are buffers and
/// never take gradients.
fn named_parameters(vs: &nn::VarStore) -> Vec<(String, Tensor)> {
    let mut vars: Vec<_> = vs
        .variables()
        .into_iter()
        .filter(|(name, _)| !name.ends_with(".running_mean") && !name.ends_with(".running_var"))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

pub fn is_trainable(name: &str) -> bool {
    if let Some(rest) = name.strip_prefix(FEATURES_PREFIX) {
        return rest
            .split('.')
            .next()
            .and_then(|index| index.parse::<usize>().ok())
            .is_some_and(|index| index >= FIRST_TRAINABLE_STAGE);
    }
    name.starts_with(HEAD_PREFIX)
}

pub fn array_to_tensor(batch: ArrayView4<'_, f32>, device: Device) -> Result<Tensor, InferenceError> {
    let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
    let contiguous = batch.as_standard_layout();
    let data = contiguous.as_slice().ok_or(InferenceError::Layout)?;
    Ok(Tensor::from_slice(data).view(shape.as_slice()).to_device(device))
}

pub fn tensor_to_array2(output: &Tensor) -> Result<Array2<f32>, InferenceError> {
    let (rows, cols) = output.size2().map_err(|_| InferenceError::Shape(output.size()))?;
    let flat = output
        .to_kind(Kind::Float)
        .to_device(Device::Cpu)
        .contiguous()
        .view([-1]);
    let values = Vec::<f32>::try_from(&flat)?;
    Array2::from_shape_vec((rows as usize, cols as usize), values)
        .map_err(|_| InferenceError::Shape(output.size()))
}
