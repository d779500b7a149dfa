/// Training infrastructure for recurrent sequence models

pub mod checkpoint;
pub mod early_stopping;
pub mod loss;
pub mod trainer;

pub use checkpoint::{Checkpoint, CheckpointMetadata};
pub use early_stopping::{EarlyStopper, EarlyStopping};
pub use loss::Criterion;
pub use trainer::{EpochLoss, Trainer, TrainingConfig, TrainingReport};
