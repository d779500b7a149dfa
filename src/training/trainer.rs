/// Training loop for RnnModel
use std::time::Instant;
use candle_core::{Device, DType, Tensor};
use candle_nn::{VarMap, VarBuilder, AdamW, ParamsAdamW, Optimizer};

use crate::config::ModelConfig;
use crate::data::BatchDataLoader;
use crate::layers::HiddenState;
use crate::models::RnnModel;
use crate::utils::epoch_time;
use super::early_stopping::EarlyStopper;
use super::loss::Criterion;

/// Training configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Maximum number of training epochs
    pub n_epochs: usize,
    /// Batch size used when building loaders
    pub batch_size: usize,
    /// AdamW learning rate
    pub learning_rate: f64,
    /// AdamW decoupled weight decay
    pub weight_decay: f64,
    /// Non-improving epochs tolerated before stopping
    pub patience: usize,
    /// Minimum validation-loss decrease counted as improvement
    pub min_delta: f64,
    /// Only train on every `short_train_stride`-th batch
    pub short_train: bool,
    /// Batch stride for short training
    pub short_train_stride: usize,
    /// Best-model checkpoint file
    pub checkpoint_path: String,
    /// Loss function
    pub criterion: Criterion,
    /// Report epoch summaries at info level (debug otherwise)
    pub verbose: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            patience: 5,
            min_delta: 0.0,
            short_train: false,
            short_train_stride: 50,
            checkpoint_path: "checkpoint.safetensors".to_string(),
            criterion: Criterion::Mse,
            verbose: true,
        }
    }
}

impl TrainingConfig {
    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(crate::SeqError::Config(
                "batch_size must be > 0".to_string(),
            ));
        }

        if self.short_train_stride == 0 {
            return Err(crate::SeqError::Config(
                "short_train_stride must be > 0".to_string(),
            ));
        }

        if self.learning_rate.is_nan() || self.learning_rate < 0.0 {
            return Err(crate::SeqError::Config(format!(
                "learning_rate must be >= 0, got {}",
                self.learning_rate
            )));
        }

        Ok(())
    }
}

/// Mean loss of one training epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLoss {
    /// Mean over processed batches (NaN if none were processed)
    pub mean: f64,
    /// Number of batches that received an optimizer step
    pub batches: usize,
}

/// Outcome of [`Trainer::train`]
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    /// Epochs actually run
    pub epochs_run: usize,
    /// Whether the early stopper ended the run (and the best checkpoint was reloaded)
    pub stopped_early: bool,
    pub test_loss: f64,
}

/// Trainer for RnnModel
pub struct Trainer {
    model: RnnModel,
    varmap: VarMap,
    optimizer: AdamW,
    config: TrainingConfig,
    device: Device,
    last_hidden: Option<HiddenState>,
    step: usize,
}

impl Trainer {
    /// Create new trainer
    pub fn new(
        model_config: ModelConfig,
        training_config: TrainingConfig,
        device: Device,
    ) -> crate::Result<Self> {
        training_config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = RnnModel::new(model_config, vb)?;

        let optimizer_params = ParamsAdamW {
            lr: training_config.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: training_config.weight_decay,
        };
        let optimizer = AdamW::new(varmap.all_vars(), optimizer_params)?;

        log::debug!(
            "Trainer ready: {} ({} parameters)",
            model.config().rnn_type,
            crate::utils::count_parameters(&varmap)
        );

        Ok(Self {
            model,
            varmap,
            optimizer,
            config: training_config,
            device,
            last_hidden: None,
            step: 0,
        })
    }

    pub fn model(&self) -> &RnnModel {
        &self.model
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Total optimizer steps taken
    pub fn step(&self) -> usize {
        self.step
    }

    /// Detached hidden state of the last training batch
    pub fn last_hidden(&self) -> Option<&HiddenState> {
        self.last_hidden.as_ref()
    }

    /// Forward a batch from a fresh zero state and score it
    fn batch_loss(
        &self,
        input: &Tensor,
        target: &Tensor,
        train: bool,
    ) -> candle_core::Result<(Tensor, HiddenState)> {
        let hidden = self.model.init_hidden(input.dim(0)?)?;
        let (output, hidden) = self.model.forward(input, &hidden, train)?;
        let loss = self.config.criterion.loss(&output, target)?;
        Ok((loss, hidden))
    }

    /// Training step
    pub fn train_step(&mut self, input: &Tensor, target: &Tensor) -> crate::Result<f64> {
        let (loss, hidden) = self.batch_loss(input, target, true)?;

        // Gradients must not reach into earlier batches through the recurrent state
        self.last_hidden = Some(hidden.detach());

        let loss_val = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;

        self.optimizer.backward_step(&loss)?;
        self.step += 1;

        Ok(loss_val)
    }

    /// Train for one epoch
    ///
    /// With `short_train` only batches whose index is a multiple of
    /// `short_train_stride` are used.
    pub fn train_epoch(&mut self, dataloader: &mut impl BatchDataLoader) -> crate::Result<EpochLoss> {
        let mut total_loss = 0.0;
        let mut num_batches = 0;

        dataloader.reset();

        let mut batch_idx = 0;
        while let Some((input, target)) = dataloader.next_batch(&self.device)? {
            let selected = !self.config.short_train || batch_idx % self.config.short_train_stride == 0;
            batch_idx += 1;
            if !selected {
                continue;
            }

            let loss = self.train_step(&input, &target)?;
            total_loss += loss;
            num_batches += 1;

            log::debug!("Batch {} complete, loss: {:.4}", batch_idx, loss);
        }

        let mean = if num_batches > 0 {
            total_loss / num_batches as f64
        } else {
            f64::NAN
        };

        Ok(EpochLoss {
            mean,
            batches: num_batches,
        })
    }

    /// Mean loss over every batch of `dataloader`, without parameter updates
    /// or dropout
    pub fn evaluate(&self, dataloader: &mut impl BatchDataLoader) -> crate::Result<f64> {
        let mut total_loss = 0.0;
        let mut num_batches = 0;

        dataloader.reset();

        while let Some((input, target)) = dataloader.next_batch(&self.device)? {
            let (loss, _hidden) = self.batch_loss(&input, &target, false)?;
            total_loss += loss.detach().to_dtype(DType::F64)?.to_scalar::<f64>()?;
            num_batches += 1;
        }

        if num_batches == 0 {
            return Ok(f64::NAN);
        }

        Ok(total_loss / num_batches as f64)
    }

    /// Full training loop
    ///
    /// Runs up to `n_epochs` epochs, consulting `stopper` after every
    /// validation pass. When it signals stop, the best checkpoint is
    /// reloaded before the final test evaluation.
    pub fn train(
        &mut self,
        train_loader: &mut impl BatchDataLoader,
        val_loader: &mut impl BatchDataLoader,
        test_loader: &mut impl BatchDataLoader,
        stopper: &mut impl EarlyStopper,
    ) -> crate::Result<TrainingReport> {
        let level = if self.config.verbose {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        log::log!(level, "Starting training for up to {} epochs", self.config.n_epochs);
        log::log!(level, "Training batches per epoch: {}", train_loader.num_batches());

        let mut train_losses = Vec::with_capacity(self.config.n_epochs);
        let mut val_losses = Vec::with_capacity(self.config.n_epochs);
        let mut stopped_early = false;

        for epoch in 0..self.config.n_epochs {
            let start = Instant::now();
            let train_loss = self.train_epoch(train_loader)?;
            let val_loss = self.evaluate(val_loader)?;
            let (epoch_min, epoch_sec) = epoch_time(start.elapsed());

            log::log!(level, "Epoch: {:02} | Time: {}m {}s", epoch + 1, epoch_min, epoch_sec);
            log::log!(level, "\tTrain Loss: {:.3}", train_loss.mean);
            log::log!(level, "\t Val. Loss: {:.3}", val_loss);

            train_losses.push(train_loss.mean);
            val_losses.push(val_loss);

            stopper.observe(val_loss, epoch + 1, &self.varmap)?;
            if stopper.should_stop() {
                log::info!("Early stopping, reloading checkpoint model");
                stopper.restore(&self.varmap)?;
                stopped_early = true;
                break;
            }
        }

        let test_loss = self.evaluate(test_loader)?;
        log::info!("Test Loss: {:.3}", test_loss);

        Ok(TrainingReport {
            epochs_run: train_losses.len(),
            train_losses,
            val_losses,
            stopped_early,
            test_loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use crate::config::RnnType;
    use crate::data::{SequenceDataLoader, SequenceDataset};
    use crate::training::EarlyStopping;

    fn dataset(n: usize, seq_len: usize) -> SequenceDataset {
        let inputs: Vec<Vec<f32>> = (0..n)
            .map(|i| (0..seq_len).map(|t| ((i + t) as f32 * 0.3).sin()).collect())
            .collect();
        let targets = inputs
            .iter()
            .map(|row| row.iter().map(|x| if *x > 0.0 { 1.0 } else { 0.0 }).collect())
            .collect();
        SequenceDataset::from_rows(inputs, targets).unwrap()
    }

    fn loader(n: usize, batch_size: usize) -> SequenceDataLoader {
        SequenceDataLoader::new(dataset(n, 5), batch_size, false).unwrap()
    }

    fn small_model() -> ModelConfig {
        ModelConfig {
            hidden_dim: 4,
            rnn_type: RnnType::Gru,
            ..Default::default()
        }
    }

    /// Stops after a fixed number of observations and records restores
    struct ScriptedStopper {
        stop_after: usize,
        observed: Vec<f64>,
        restored: Cell<bool>,
    }

    impl EarlyStopper for ScriptedStopper {
        fn observe(&mut self, val_loss: f64, _epoch: usize, _varmap: &VarMap) -> crate::Result<()> {
            self.observed.push(val_loss);
            Ok(())
        }

        fn should_stop(&self) -> bool {
            self.observed.len() >= self.stop_after
        }

        fn restore(&self, _varmap: &VarMap) -> crate::Result<()> {
            self.restored.set(true);
            Ok(())
        }
    }

    /// Real early stopping that captures the parameters it is about to overwrite
    struct SnapshotBeforeRestore {
        inner: EarlyStopping,
        before_restore: RefCell<Option<crate::training::Checkpoint>>,
    }

    impl EarlyStopper for SnapshotBeforeRestore {
        fn observe(&mut self, val_loss: f64, epoch: usize, varmap: &VarMap) -> crate::Result<()> {
            self.inner.observe(val_loss, epoch, varmap)
        }

        fn should_stop(&self) -> bool {
            self.inner.should_stop()
        }

        fn restore(&self, varmap: &VarMap) -> crate::Result<()> {
            let snapshot = crate::training::Checkpoint::from_varmap(varmap, Default::default())?;
            *self.before_restore.borrow_mut() = Some(snapshot);
            self.inner.restore(varmap)
        }
    }

    #[test]
    fn test_short_train_uses_every_fiftieth_batch() -> crate::Result<()> {
        let config = TrainingConfig {
            short_train: true,
            ..Default::default()
        };
        let mut trainer = Trainer::new(small_model(), config, Device::Cpu)?;

        let mut train = loader(120, 1);
        let epoch = trainer.train_epoch(&mut train)?;
        assert_eq!(epoch.batches, 3); // batches 0, 50, 100
        assert_eq!(trainer.step(), 3);
        assert!(epoch.mean.is_finite());
        Ok(())
    }

    #[test]
    fn test_full_train_uses_every_batch() -> crate::Result<()> {
        let mut trainer = Trainer::new(small_model(), TrainingConfig::default(), Device::Cpu)?;

        let mut train = loader(120, 8);
        let epoch = trainer.train_epoch(&mut train)?;
        assert_eq!(epoch.batches, 15);
        assert_eq!(trainer.step(), 15);
        Ok(())
    }

    #[test]
    fn test_evaluate_does_not_update_parameters() -> crate::Result<()> {
        let trainer = Trainer::new(small_model(), TrainingConfig::default(), Device::Cpu)?;
        let before = crate::training::Checkpoint::from_varmap(trainer.varmap(), Default::default())?;

        let mut val = loader(10, 4);
        let first = trainer.evaluate(&mut val)?;
        let second = trainer.evaluate(&mut val)?;
        assert!(first.is_finite());
        assert_eq!(first, second);
        assert_eq!(trainer.step(), 0);

        let after = crate::training::Checkpoint::from_varmap(trainer.varmap(), Default::default())?;
        for (name, tensor) in &before.tensors {
            let diff = tensor.sub(&after.tensors[name])?.abs()?.sum_all()?.to_scalar::<f32>()?;
            assert_eq!(diff, 0.0, "{name}");
        }
        Ok(())
    }

    #[test]
    fn test_empty_epoch_is_nan() -> crate::Result<()> {
        let mut trainer = Trainer::new(small_model(), TrainingConfig::default(), Device::Cpu)?;
        let mut empty = loader(0, 4);
        assert!(trainer.train_epoch(&mut empty)?.mean.is_nan());
        assert!(trainer.evaluate(&mut empty)?.is_nan());
        Ok(())
    }

    #[test]
    fn test_training_reduces_loss() -> crate::Result<()> {
        let config = TrainingConfig {
            learning_rate: 0.05,
            ..Default::default()
        };
        let mut trainer = Trainer::new(small_model(), config, Device::Cpu)?;
        let mut train = loader(32, 8);

        let before = trainer.evaluate(&mut train)?;
        for _ in 0..15 {
            trainer.train_epoch(&mut train)?;
        }
        let after = trainer.evaluate(&mut train)?;
        assert!(after < before, "loss went from {before} to {after}");
        Ok(())
    }

    #[test]
    fn test_train_stops_when_stopper_signals() -> crate::Result<()> {
        let config = TrainingConfig {
            n_epochs: 10,
            verbose: false,
            ..Default::default()
        };
        let mut trainer = Trainer::new(small_model(), config, Device::Cpu)?;
        let mut stopper = ScriptedStopper {
            stop_after: 2,
            observed: Vec::new(),
            restored: Cell::new(false),
        };

        let report = trainer.train(&mut loader(8, 4), &mut loader(4, 4), &mut loader(4, 4), &mut stopper)?;
        assert_eq!(report.epochs_run, 2);
        assert!(report.stopped_early);
        assert_eq!(stopper.observed, report.val_losses);
        assert!(stopper.restored.get());
        assert!(report.test_loss.is_finite());
        Ok(())
    }

    #[test]
    fn test_train_runs_full_budget_without_stop() -> crate::Result<()> {
        let config = TrainingConfig {
            n_epochs: 3,
            verbose: false,
            ..Default::default()
        };
        let mut trainer = Trainer::new(small_model(), config, Device::Cpu)?;
        let mut stopper = ScriptedStopper {
            stop_after: usize::MAX,
            observed: Vec::new(),
            restored: Cell::new(false),
        };

        let report = trainer.train(&mut loader(8, 4), &mut loader(4, 4), &mut loader(4, 4), &mut stopper)?;
        assert_eq!(report.epochs_run, 3);
        assert!(!report.stopped_early);
        assert_eq!(report.train_losses.len(), 3);
        assert!(!stopper.restored.get());
        Ok(())
    }

    #[test]
    fn test_early_stopping_halts_and_restores_best() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = TrainingConfig {
            n_epochs: 10,
            learning_rate: 0.05,
            // no later epoch can beat epoch 1 by this much
            min_delta: 1e6,
            patience: 1,
            checkpoint_path: dir.path().join("best.safetensors").display().to_string(),
            verbose: false,
            ..Default::default()
        };
        let mut trainer = Trainer::new(small_model(), config.clone(), Device::Cpu)?;
        let mut stopper = SnapshotBeforeRestore {
            inner: EarlyStopping::from_config(&config),
            before_restore: RefCell::new(None),
        };

        let report = trainer.train(&mut loader(8, 4), &mut loader(4, 4), &mut loader(4, 4), &mut stopper)?;
        assert!(report.stopped_early);
        assert_eq!(report.epochs_run, 2);
        assert_eq!(stopper.inner.best_epoch(), Some(1));

        let saved = crate::training::Checkpoint::load(stopper.inner.path(), &Device::Cpu)?;
        let before = stopper
            .before_restore
            .into_inner()
            .expect("restore was not called");
        let current = crate::training::Checkpoint::from_varmap(trainer.varmap(), Default::default())?;

        let mut moved = 0.0f32;
        for (name, tensor) in &saved.tensors {
            moved += tensor.sub(&before.tensors[name])?.abs()?.sum_all()?.to_scalar::<f32>()?;
            let diff = tensor.sub(&current.tensors[name])?.abs()?.sum_all()?.to_scalar::<f32>()?;
            assert_eq!(diff, 0.0, "{name}");
        }
        assert!(moved > 0.0, "epoch 2 left the parameters unchanged");
        Ok(())
    }

    #[test]
    fn test_invalid_training_config() {
        let config = TrainingConfig {
            short_train_stride: 0,
            ..Default::default()
        };
        assert!(matches!(
            Trainer::new(small_model(), config, Device::Cpu),
            Err(crate::SeqError::Config(_))
        ));

        for learning_rate in [-1e-3, f64::NAN] {
            let config = TrainingConfig {
                learning_rate,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(crate::SeqError::Config(_))));
        }
        assert!(TrainingConfig::default().validate().is_ok());
    }
}
