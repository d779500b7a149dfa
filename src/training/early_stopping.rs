/// Early stopping on validation loss with best-model checkpointing
use std::path::{Path, PathBuf};
use candle_core::Device;
use candle_nn::VarMap;

use super::checkpoint::{Checkpoint, CheckpointMetadata};
use super::trainer::TrainingConfig;
use crate::config::ModelConfig;

/// Decides when training should halt and owns the best-model checkpoint
pub trait EarlyStopper {
    /// Record the validation loss of `epoch` (1-based); may checkpoint `varmap`
    fn observe(&mut self, val_loss: f64, epoch: usize, varmap: &VarMap) -> crate::Result<()>;

    /// True once patience is exhausted
    fn should_stop(&self) -> bool;

    /// Load the last saved checkpoint back into `varmap`
    fn restore(&self, varmap: &VarMap) -> crate::Result<()>;
}

/// Patience-based early stopping
///
/// The score is `-val_loss`. An epoch improves on the best score only if it
/// beats it by more than `delta`; every improvement resets the wait counter
/// and rewrites the checkpoint at `path`. A NaN loss never improves.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    delta: f64,
    path: PathBuf,
    verbose: bool,
    counter: usize,
    best_score: Option<f64>,
    best_epoch: Option<usize>,
    val_loss_min: f64,
    early_stop: bool,
    model_config: Option<String>,
}

impl EarlyStopping {
    /// Create new early stopping tracker
    ///
    /// # Arguments
    /// * `path` - Checkpoint file written on every improvement
    /// * `patience` - Non-improving epochs tolerated before stopping
    /// * `delta` - Minimum decrease in validation loss counted as improvement
    /// * `verbose` - Log every improvement and counter increment at info level
    pub fn new<P: AsRef<Path>>(path: P, patience: usize, delta: f64, verbose: bool) -> Self {
        Self {
            patience,
            delta,
            path: path.as_ref().to_path_buf(),
            verbose,
            counter: 0,
            best_score: None,
            best_epoch: None,
            val_loss_min: f64::INFINITY,
            early_stop: false,
            model_config: None,
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(
            &config.checkpoint_path,
            config.patience,
            config.min_delta,
            config.verbose,
        )
    }

    /// Record the model configuration in every checkpoint's metadata
    pub fn with_model_config(mut self, config: &ModelConfig) -> crate::Result<Self> {
        self.model_config = Some(serde_json::to_string(config)?);
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    /// Epoch of the last saved checkpoint
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn val_loss_min(&self) -> f64 {
        self.val_loss_min
    }

    fn save_checkpoint(&mut self, val_loss: f64, epoch: usize, varmap: &VarMap) -> crate::Result<()> {
        let message = format!(
            "Validation loss decreased ({:.6} --> {:.6}).  Saving model to {}",
            self.val_loss_min,
            val_loss,
            self.path.display()
        );
        if self.verbose {
            log::info!("{}", message);
        } else {
            log::debug!("{}", message);
        }

        let metadata = CheckpointMetadata {
            epoch,
            val_loss: Some(val_loss),
            config: self.model_config.clone(),
        };
        Checkpoint::from_varmap(varmap, metadata)?.save(&self.path)?;

        self.val_loss_min = val_loss;
        self.best_epoch = Some(epoch);
        Ok(())
    }
}

impl EarlyStopper for EarlyStopping {
    fn observe(&mut self, val_loss: f64, epoch: usize, varmap: &VarMap) -> crate::Result<()> {
        let score = -val_loss;

        let improved = match self.best_score {
            _ if score.is_nan() => false,
            None => true,
            Some(best) => score > best + self.delta,
        };

        if improved {
            self.best_score = Some(score);
            self.save_checkpoint(val_loss, epoch, varmap)?;
            self.counter = 0;
        } else {
            self.counter += 1;
            if self.verbose {
                log::info!("EarlyStopping counter: {} out of {}", self.counter, self.patience);
            }
            if self.counter >= self.patience {
                self.early_stop = true;
            }
        }

        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.early_stop
    }

    fn restore(&self, varmap: &VarMap) -> crate::Result<()> {
        if self.best_epoch.is_none() {
            return Err(crate::SeqError::Training(
                "No checkpoint saved yet, nothing to restore".to_string(),
            ));
        }

        let device = varmap
            .all_vars()
            .first()
            .map(|v| v.device().clone())
            .unwrap_or(Device::Cpu);

        let checkpoint = Checkpoint::load(&self.path, &device)?;
        log::debug!(
            "Restoring checkpoint from epoch {} (val_loss={:?})",
            checkpoint.metadata.epoch,
            checkpoint.metadata.val_loss
        );
        checkpoint.restore_into(varmap)
    }
}
