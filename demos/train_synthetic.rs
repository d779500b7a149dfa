/// Train a recurrent regressor end to end with early stopping
///
/// Usage: train_synthetic [DATA_DIR] [MODEL_CONFIG_JSON]
///
/// DATA_DIR must hold `inputs.npy` and `targets.npy`; without it a noisy
/// sine dataset is generated where the target marks rising timesteps.
use candle_core::Device;
use rand::Rng;
use recurrent_seq::data::{SequenceDataLoader, SequenceDataset};
use recurrent_seq::training::{EarlyStopping, Trainer, TrainingConfig};
use recurrent_seq::{ModelConfig, RnnType};

fn synthetic_dataset(n: usize, seq_len: usize) -> recurrent_seq::Result<SequenceDataset> {
    let mut rng = rand::thread_rng();
    let mut inputs = Vec::with_capacity(n);
    let mut targets = Vec::with_capacity(n);

    for _ in 0..n {
        let phase: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
        let freq: f32 = rng.gen_range(0.2..0.6);
        let row: Vec<f32> = (0..seq_len)
            .map(|t| (phase + freq * t as f32).sin() + rng.gen_range(-0.05..0.05))
            .collect();
        let target: Vec<f32> = (0..seq_len)
            .map(|t| if t > 0 && row[t] > row[t - 1] { 1.0 } else { 0.0 })
            .collect();
        inputs.push(row);
        targets.push(target);
    }

    SequenceDataset::from_rows(inputs, targets)
}

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("=== Recurrent sequence regression ===");

    // Device setup - Try CUDA first, fallback to CPU
    let device = if candle_core::utils::cuda_is_available() {
        Device::new_cuda(0)?
    } else {
        Device::Cpu
    };
    log::info!("Using device: {:?}", device);

    let mut args = std::env::args().skip(1);
    let dataset = match args.next() {
        Some(dir) => SequenceDataset::from_directory(dir)?,
        None => {
            log::info!("No data directory given, generating synthetic sine dataset");
            synthetic_dataset(2000, 40)?
        }
    };

    let model_config = match args.next() {
        Some(path) => ModelConfig::from_json_file(path)?,
        None => ModelConfig {
            hidden_dim: 32,
            rnn_type: RnnType::Lstm,
            bidirectional: true,
            num_layers: 2,
            dropout: 0.1,
        },
    };
    log::info!("Model configuration: {:#?}", model_config);

    let training_config = TrainingConfig {
        n_epochs: 30,
        batch_size: 32,
        learning_rate: 3e-3,
        patience: 4,
        checkpoint_path: "checkpoints/best_rnn.safetensors".to_string(),
        ..Default::default()
    };

    let (train_set, val_set, test_set) = dataset.split(0.7, 0.15)?;
    log::info!(
        "Split: {} train / {} val / {} test sequences of length {}",
        train_set.len(),
        val_set.len(),
        test_set.len(),
        train_set.seq_len()
    );

    let mut train_loader = SequenceDataLoader::new(train_set, training_config.batch_size, true)?;
    let mut val_loader = SequenceDataLoader::new(val_set, training_config.batch_size, false)?;
    let mut test_loader = SequenceDataLoader::new(test_set, training_config.batch_size, false)?;

    let mut trainer = Trainer::new(model_config.clone(), training_config.clone(), device)?;
    log::info!(
        "Parameters: {}",
        recurrent_seq::utils::count_parameters(trainer.varmap())
    );

    let mut stopper = EarlyStopping::from_config(&training_config).with_model_config(&model_config)?;

    let report = trainer.train(&mut train_loader, &mut val_loader, &mut test_loader, &mut stopper)?;

    log::info!("=== Training Complete ===");
    log::info!(
        "Epochs run: {} (early stop: {}), best epoch: {:?}",
        report.epochs_run,
        report.stopped_early,
        stopper.best_epoch()
    );
    log::info!("Best checkpoint: {}", stopper.path().display());

    Ok(())
}
