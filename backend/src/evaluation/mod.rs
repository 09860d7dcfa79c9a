pub mod evaluator;
pub mod metrics;

pub use evaluator::{EvaluationError, EvaluationReport, Evaluator, Misclassified};
pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix};
