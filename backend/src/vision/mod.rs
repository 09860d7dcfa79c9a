pub mod augmentations;
pub mod labels;
pub mod model;
pub mod prediction;
pub mod preprocess;

pub use labels::{LabelManifest, LabelMap};
pub use model::{Classifier, ImageClassifier, InferenceError, ModelError};
pub use prediction::Prediction;
pub use preprocess::{PreprocessError, Preprocessor};
