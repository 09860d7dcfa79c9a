use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tch::Device;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },
}

/// Everything the offline tools need. Each section defaults to the values the
/// published model was trained with, so an empty file is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub preprocessing: PreprocessingConfig,
    pub training: TrainingConfig,
    pub evaluation: EvaluationConfig,
    pub dataset: DatasetConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = serde_yaml::from_str(&config_str)?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                log::info!("Loading pipeline config from {}", path.display());
                Self::load(path)
            }
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub image_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Pixel count above which an image is treated as a decompression bomb.
    pub max_pixels: u64,
    /// Long edge an oversized image is shrunk to.
    pub bomb_max_edge: u32,
    /// Decoder allocation cap in bytes; `None` decodes without limits.
    pub max_decode_alloc: Option<u64>,
    pub horizontal_flip_prob: f64,
    pub max_rotation_degrees: f32,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            image_size: 300,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            max_pixels: 89_478_485,
            bomb_max_edge: 3000,
            max_decode_alloc: Some(512 * 1024 * 1024),
            horizontal_flip_prob: 0.5,
            max_rotation_degrees: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub checkpoint: PathBuf,
    /// Pretrained ImageNet weights for the backbone (`.safetensors` or `.ot`).
    pub backbone_weights: Option<PathBuf>,
    pub batch_size: usize,
    pub num_workers: usize,
    pub prefetch_batches: usize,
    pub epochs: usize,
    pub patience: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub lr_step_size: usize,
    pub lr_gamma: f64,
    pub seed: u64,
    pub mixed_precision: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/Train"),
            checkpoint: PathBuf::from("best_model.safetensors"),
            backbone_weights: None,
            batch_size: 320,
            num_workers: 8,
            prefetch_batches: 2,
            epochs: 100,
            patience: 3,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            lr_step_size: 5,
            lr_gamma: 0.1,
            seed: 20,
            mixed_precision: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    pub data_dir: PathBuf,
    pub checkpoint: PathBuf,
    pub batch_size: usize,
    pub num_workers: usize,
    pub misclassified_per_class: usize,
    pub samples_dir: Option<PathBuf>,
    pub report: Option<PathBuf>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/Test"),
            checkpoint: PathBuf::from("best_model.safetensors"),
            batch_size: 320,
            num_workers: 8,
            misclassified_per_class: 5,
            samples_dir: None,
            report: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    pub check_roots: Vec<PathBuf>,
    pub count_dirs: Vec<PathBuf>,
    pub split: SplitConfig,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            check_roots: vec![PathBuf::from("./Train"), PathBuf::from("./Test")],
            count_dirs: ["./Train/real", "./Train/fake", "./Test/real", "./Test/fake"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            split: SplitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitConfig {
    pub fake_dir: PathBuf,
    pub real_dir: PathBuf,
    pub output_dir: PathBuf,
    pub train_ratio: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            fake_dir: PathBuf::from("./Fake"),
            real_dir: PathBuf::from("./Real"),
            output_dir: PathBuf::from("./data"),
            train_ratio: 0.8,
            seed: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    pub fn device(self) -> Device {
        match self {
            DevicePreference::Auto => Device::cuda_if_available(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda => Device::Cuda(0),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            other => Err(other.to_string()),
        }
    }
}

/// Settings for the HTTP server, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    pub frontend_dir: Option<PathBuf>,
    pub device: DevicePreference,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::Env {
                name: "PORT",
                value,
            })?,
            None => 8000,
        };
        let device = match lookup("DEVICE") {
            Some(value) => value.parse().map_err(|value| ConfigError::Env {
                name: "DEVICE",
                value,
            })?,
            None => DevicePreference::Auto,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            model_path: lookup("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("best_model.safetensors")),
            labels_path: lookup("LABELS_PATH").map(PathBuf::from),
            frontend_dir: lookup("FRONTEND_DIR").map(PathBuf::from),
            device,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
