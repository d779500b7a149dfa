/// In-memory sequence dataset and batch loader (.npy or vectors)
use candle_core::{Result, Tensor, Device};
use ndarray::{Array2, ArrayView1, Axis};
use ndarray_npy::ReadNpyExt;
use rand::seq::SliceRandom;
use std::fs::File;
use std::path::Path;

/// Equal-length scalar input sequences with per-timestep targets
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    inputs: Array2<f32>,  // [N, seq_len]
    targets: Array2<f32>, // [N, seq_len]
}

impl SequenceDataset {
    /// Create from input/target matrices of identical shape
    pub fn from_arrays(inputs: Array2<f32>, targets: Array2<f32>) -> crate::Result<Self> {
        if inputs.shape() != targets.shape() {
            return Err(crate::SeqError::Config(format!(
                "Shape mismatch: inputs {:?} != targets {:?}",
                inputs.shape(),
                targets.shape()
            )));
        }

        Ok(Self { inputs, targets })
    }

    /// Create from row vectors; every row must share one length
    pub fn from_rows(inputs: Vec<Vec<f32>>, targets: Vec<Vec<f32>>) -> crate::Result<Self> {
        let inputs = rows_to_array(inputs, "inputs")?;
        let targets = rows_to_array(targets, "targets")?;
        Self::from_arrays(inputs, targets)
    }

    /// Load from directory containing `inputs.npy` and `targets.npy`
    ///
    /// Both files are 2-D float64 arrays (NumPy's default), cast to f32.
    pub fn from_directory<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let dir = path.as_ref();

        log::info!("Loading sequence dataset from: {:?}", dir);

        let inputs = read_npy_f64(&dir.join("inputs.npy"))?;
        log::info!("Loaded inputs: shape {:?}", inputs.shape());

        let targets = read_npy_f64(&dir.join("targets.npy"))?;
        log::info!("Loaded targets: shape {:?}", targets.shape());

        let dataset = Self::from_arrays(inputs, targets)?;

        log::info!(
            "Dataset loaded: {} sequences, seq_len={}",
            dataset.len(),
            dataset.seq_len()
        );

        Ok(dataset)
    }

    /// Get number of sequences
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }

    /// Get sequence length
    pub fn seq_len(&self) -> usize {
        self.inputs.ncols()
    }

    /// Get input at index
    pub fn get_input(&self, idx: usize) -> ArrayView1<f32> {
        self.inputs.row(idx)
    }

    /// Get target at index
    pub fn get_target(&self, idx: usize) -> ArrayView1<f32> {
        self.targets.row(idx)
    }

    /// Dataset holding the given rows, in order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            inputs: self.inputs.select(Axis(0), indices),
            targets: self.targets.select(Axis(0), indices),
        }
    }

    /// Shuffle rows and split into (train, validation, test)
    ///
    /// The test set receives whatever the two fractions leave over.
    pub fn split(&self, train_fraction: f64, val_fraction: f64) -> crate::Result<(Self, Self, Self)> {
        if !(0.0..=1.0).contains(&train_fraction)
            || !(0.0..=1.0).contains(&val_fraction)
            || train_fraction + val_fraction > 1.0
        {
            return Err(crate::SeqError::Config(format!(
                "Invalid split fractions: train={} val={}",
                train_fraction, val_fraction
            )));
        }

        let total = self.len();
        let mut indices: Vec<usize> = (0..total).collect();
        indices.shuffle(&mut rand::thread_rng());

        let n_train = ((total as f64) * train_fraction).round() as usize;
        let n_val = (((total as f64) * val_fraction).round() as usize).min(total - n_train.min(total));
        let n_train = n_train.min(total);

        let (train_idx, rest) = indices.split_at(n_train);
        let (val_idx, test_idx) = rest.split_at(n_val);

        log::debug!(
            "Dataset split: {} train, {} validation, {} test",
            train_idx.len(),
            val_idx.len(),
            test_idx.len()
        );

        Ok((self.select(train_idx), self.select(val_idx), self.select(test_idx)))
    }
}

fn rows_to_array(rows: Vec<Vec<f32>>, what: &str) -> crate::Result<Array2<f32>> {
    let n = rows.len();
    let seq_len = rows.first().map_or(0, Vec::len);

    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != seq_len) {
        return Err(crate::SeqError::Config(format!(
            "{} row {} has length {}, expected {}",
            what,
            idx,
            row.len(),
            seq_len
        )));
    }

    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n, seq_len), flat)
        .map_err(|e| crate::SeqError::Config(format!("{}: {}", what, e)))
}

fn read_npy_f64(path: &Path) -> crate::Result<Array2<f32>> {
    let array = <Array2<f64> as ReadNpyExt>::read_npy(File::open(path)?)
        .map_err(|e| crate::SeqError::Npy(format!("Failed to read {:?}: {}", path, e)))?;
    Ok(array.mapv(|x| x as f32))
}

/// Batch loader over a [`SequenceDataset`]
///
/// The final batch holds the remainder when the dataset size is not a
/// multiple of the batch size.
pub struct SequenceDataLoader {
    dataset: SequenceDataset,
    batch_size: usize,
    current_idx: usize,
    indices: Vec<usize>,
    shuffle: bool,
}

impl SequenceDataLoader {
    /// Create new data loader
    pub fn new(dataset: SequenceDataset, batch_size: usize, shuffle: bool) -> crate::Result<Self> {
        if batch_size == 0 {
            return Err(crate::SeqError::Config(
                "batch_size must be > 0".to_string(),
            ));
        }

        let mut indices: Vec<usize> = (0..dataset.len()).collect();
        if shuffle {
            indices.shuffle(&mut rand::thread_rng());
        }

        Ok(Self {
            dataset,
            batch_size,
            current_idx: 0,
            indices,
            shuffle,
        })
    }

    /// Get next batch (inputs, targets)
    pub fn next_batch(&mut self, device: &Device) -> Result<Option<(Tensor, Tensor)>> {
        if self.current_idx >= self.indices.len() {
            return Ok(None);
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current_idx..end_idx];
        let actual_batch_size = batch_indices.len();
        let seq_len = self.dataset.seq_len();

        let mut input_data = Vec::with_capacity(actual_batch_size * seq_len);
        let mut target_data = Vec::with_capacity(actual_batch_size * seq_len);
        for &idx in batch_indices {
            input_data.extend(self.dataset.get_input(idx).iter().copied());
            target_data.extend(self.dataset.get_target(idx).iter().copied());
        }

        self.current_idx = end_idx;

        let input_tensor = Tensor::from_vec(input_data, (actual_batch_size, seq_len), device)?;
        let target_tensor = Tensor::from_vec(target_data, (actual_batch_size, seq_len), device)?;

        Ok(Some((input_tensor, target_tensor)))
    }

    /// Reset loader for new epoch
    pub fn reset(&mut self) {
        self.current_idx = 0;

        if self.shuffle {
            self.indices.shuffle(&mut rand::thread_rng());
        }
    }

    /// Get number of batches
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Get dataset reference
    pub fn dataset(&self) -> &SequenceDataset {
        &self.dataset
    }
}

impl super::BatchDataLoader for SequenceDataLoader {
    fn next_batch(&mut self, device: &Device) -> Result<Option<(Tensor, Tensor)>> {
        SequenceDataLoader::next_batch(self, device)
    }

    fn reset(&mut self) {
        SequenceDataLoader::reset(self)
    }

    fn num_batches(&self) -> usize {
        SequenceDataLoader::num_batches(self)
    }
}
