/// Configuration for the recurrent sequence model
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Recurrent cell variant
///
/// Serialized under the canonical names `RNN_TANH`, `GRU` and `LSTM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RnnType {
    /// Elman RNN with tanh nonlinearity
    RnnTanh,
    /// Gated recurrent unit
    Gru,
    /// Long short-term memory (carries a cell state next to the hidden state)
    Lstm,
}

impl RnnType {
    pub const ALL: [RnnType; 3] = [RnnType::RnnTanh, RnnType::Gru, RnnType::Lstm];

    pub fn name(self) -> &'static str {
        match self {
            RnnType::RnnTanh => "RNN_TANH",
            RnnType::Gru => "GRU",
            RnnType::Lstm => "LSTM",
        }
    }

    /// Whether the hidden state is an (h, c) pair
    pub fn has_cell_state(self) -> bool {
        matches!(self, RnnType::Lstm)
    }
}

impl fmt::Display for RnnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RnnType {
    type Err = crate::SeqError;

    fn from_str(s: &str) -> crate::Result<Self> {
        RnnType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| {
                crate::SeqError::Config(format!(
                    "Invalid rnn_type: {}. Must be 'RNN_TANH', 'GRU', or 'LSTM'",
                    s
                ))
            })
    }
}

impl TryFrom<String> for RnnType {
    type Error = crate::SeqError;

    fn try_from(value: String) -> crate::Result<Self> {
        value.parse()
    }
}

impl From<RnnType> for String {
    fn from(value: RnnType) -> Self {
        value.name().to_string()
    }
}

/// Model hyper-parameters
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelConfig {
    /// Width of the recurrent hidden state
    pub hidden_dim: usize,

    /// Recurrent cell variant
    pub rnn_type: RnnType,

    /// Run a reverse-direction stack and concatenate both outputs
    #[serde(default)]
    pub bidirectional: bool,

    /// Number of stacked recurrent layers
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,

    /// Dropout probability between stacked layers
    #[serde(default)]
    pub dropout: f32,
}

fn default_num_layers() -> usize {
    1
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 64,
            rnn_type: RnnType::Lstm,
            bidirectional: false,
            num_layers: 1,
            dropout: 0.0,
        }
    }
}

impl ModelConfig {
    /// Build a validated config from a variant name
    ///
    /// Fails with a configuration error if `rnn_type` is not one of
    /// `RNN_TANH`, `GRU` or `LSTM`.
    pub fn new(
        hidden_dim: usize,
        rnn_type: &str,
        bidirectional: bool,
        num_layers: usize,
        dropout: f32,
    ) -> crate::Result<Self> {
        let config = Self {
            hidden_dim,
            rnn_type: rnn_type.parse()?,
            bidirectional,
            num_layers,
            dropout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.hidden_dim == 0 {
            return Err(crate::SeqError::Config(
                "hidden_dim must be > 0".to_string(),
            ));
        }

        if self.num_layers == 0 {
            return Err(crate::SeqError::Config(
                "num_layers must be > 0".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(crate::SeqError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }

        Ok(())
    }

    /// 2 when bidirectional, 1 otherwise
    pub fn bidir_mult(&self) -> usize {
        if self.bidirectional {
            2
        } else {
            1
        }
    }

    /// Leading dimension of every hidden-state tensor
    pub fn state_layers(&self) -> usize {
        self.num_layers * self.bidir_mult()
    }

    /// Width of the features fed to the output projection
    pub fn output_features(&self) -> usize {
        self.hidden_dim * self.bidir_mult()
    }

    /// Load and validate a JSON config file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&text).map_err(|e| {
            crate::SeqError::Config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }
}
