/// Recurrent sequence regression model
use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

use crate::config::ModelConfig;
use crate::layers::{HiddenState, RecurrentStack};

pub mod loader;

pub use loader::load_model;

/// Every sequence position carries one scalar feature
const INPUT_FEATURES: usize = 1;

/// Recurrent stack followed by a linear projection and a sigmoid
///
/// Maps `[batch, seq_len]` inputs to `[batch, seq_len]` predictions in [0, 1].
pub struct RnnModel {
    config: ModelConfig,
    rnn: RecurrentStack,
    out: Linear,
    dtype: DType,
    device: Device,
}

impl RnnModel {
    /// Create new RnnModel
    ///
    /// Parameters are registered under `rnn.*` and `out.*`.
    pub fn new(config: ModelConfig, vb: VarBuilder) -> crate::Result<Self> {
        config.validate()?;

        let dtype = vb.dtype();
        let device = vb.device().clone();

        let rnn = RecurrentStack::new(INPUT_FEATURES, &config, vb.pp("rnn"))?;

        // Bidirectional stacks concatenate forward and backward features
        let out = linear(config.output_features(), 1, vb.pp("out"))?;

        Ok(Self {
            config,
            rnn,
            out,
            dtype,
            device,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Zero hidden state: `[num_layers * directions, batch_size, hidden_dim]`,
    /// paired for LSTM
    pub fn init_hidden(&self, batch_size: usize) -> Result<HiddenState> {
        HiddenState::zeros(
            self.config.rnn_type,
            self.config.state_layers(),
            batch_size,
            self.config.hidden_dim,
            self.dtype,
            &self.device,
        )
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `input` - Input sequences [batch, seq_len]
    /// * `hidden` - Initial hidden state (see [`RnnModel::init_hidden`])
    /// * `train` - Enables inter-layer dropout
    ///
    /// # Returns
    /// Tuple of (predictions [batch, seq_len], final hidden state)
    pub fn forward(
        &self,
        input: &Tensor,
        hidden: &HiddenState,
        train: bool,
    ) -> Result<(Tensor, HiddenState)> {
        let (_batch, _seq_len) = input.dims2()?;

        let input = if input.dtype() != self.dtype {
            input.to_dtype(self.dtype)?
        } else {
            input.clone()
        };

        // [batch, seq_len] -> [batch, seq_len, 1]
        let xs = input.unsqueeze(2)?;

        // [batch, seq_len, 1] -> [batch, seq_len, hidden_dim * directions]
        let (rnn_out, hidden) = self.rnn.forward(&xs, hidden, train)?;

        // [batch, seq_len, hidden_dim * directions] -> [batch, seq_len]
        let logits = self.out.forward(&rnn_out)?.squeeze(2)?;

        Ok((candle_nn::ops::sigmoid(&logits)?, hidden))
    }
}
