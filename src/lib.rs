//! Recurrent sequence regression - Rust implementation
//!
//! Trains a recurrent network (simple tanh RNN, GRU or LSTM) to predict a
//! bounded scalar for every timestep of a single-feature input sequence.
//!
//! # Architecture
//!
//! - **Model**: one recurrent stack, a linear projection and a sigmoid
//! - **Trainer**: epoch / validation loop driving candle's AdamW
//! - **Early stopping**: checkpoints the best validation loss and restores it
//!   once patience runs out
//!
//! # Example
//!
//! ```ignore
//! use recurrent_seq::{ModelConfig, RnnType};
//! use recurrent_seq::training::{Trainer, TrainingConfig, EarlyStopping};
//!
//! let config = ModelConfig { rnn_type: RnnType::Lstm, hidden_dim: 32, ..Default::default() };
//! let mut trainer = Trainer::new(config, TrainingConfig::default(), Device::Cpu)?;
//! let mut stopper = EarlyStopping::from_config(trainer.config());
//! let report = trainer.train(&mut train, &mut val, &mut test, &mut stopper)?;
//! ```

pub mod config;
pub mod data;
pub mod layers;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::{ModelConfig, RnnType};
pub use layers::HiddenState;
pub use models::RnnModel;

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum SeqError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NumPy error: {0}")]
    Npy(String),
}

pub type Result<T> = std::result::Result<T, SeqError>;
