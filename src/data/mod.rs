/// Data loading modules for sequence regression
pub mod sequence_dataset;

pub use sequence_dataset::{SequenceDataset, SequenceDataLoader};

use candle_core::{Result, Tensor, Device};

/// Generic data loader trait
pub trait BatchDataLoader {
    /// Get next batch of (input, target) tensors, both [batch, seq_len]
    fn next_batch(&mut self, device: &Device) -> Result<Option<(Tensor, Tensor)>>;

    /// Reset loader for new epoch
    fn reset(&mut self);

    /// Get total number of batches
    fn num_batches(&self) -> usize;
}
