pub mod scaler;
pub mod schedule;
pub mod trainer;

pub use trainer::{EpochStats, Trainer, TrainingError, TrainingOutcome, TrainingSummary};
