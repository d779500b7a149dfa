/// Recurrent layers: tanh RNN, GRU and LSTM cells
///
/// GRU and LSTM steps come from `candle_nn::rnn`; the tanh cell is local.
/// Weight layout and update rules match the PyTorch conventions
/// (`weight_ih_l{k}`, `weight_hh_l{k}`, `bias_ih_l{k}`, `bias_hh_l{k}`,
/// with a `_reverse` suffix for the backward direction), so checkpoints
/// map one-to-one onto the usual parameter names.
use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::rnn::{self, Direction, GRUConfig, GRUState, LSTMConfig, LSTMState, GRU, LSTM, RNN};
use candle_nn::{ops, Init, VarBuilder};

use crate::config::{ModelConfig, RnnType};

/// Recurrent memory carried between timesteps
///
/// Every tensor is shaped `[num_layers * directions, batch, hidden_dim]`.
#[derive(Debug, Clone)]
pub enum HiddenState {
    /// Hidden state of the tanh RNN and GRU variants
    Single(Tensor),
    /// Hidden and cell state of the LSTM variant
    Pair { h: Tensor, c: Tensor },
}

impl HiddenState {
    /// Zero-filled state for the given variant
    pub fn zeros(
        rnn_type: RnnType,
        state_layers: usize,
        batch_size: usize,
        hidden_dim: usize,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let shape = (state_layers, batch_size, hidden_dim);
        let h = Tensor::zeros(shape, dtype, device)?;
        if rnn_type.has_cell_state() {
            let c = Tensor::zeros(shape, dtype, device)?;
            Ok(Self::Pair { h, c })
        } else {
            Ok(Self::Single(h))
        }
    }

    /// Hidden state tensor
    pub fn h(&self) -> &Tensor {
        match self {
            Self::Single(h) => h,
            Self::Pair { h, .. } => h,
        }
    }

    /// Cell state tensor (LSTM only)
    pub fn c(&self) -> Option<&Tensor> {
        match self {
            Self::Single(_) => None,
            Self::Pair { c, .. } => Some(c),
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Self::Pair { .. })
    }

    pub fn dims(&self) -> &[usize] {
        self.h().dims()
    }

    /// Cut the state out of the computation graph.
    ///
    /// The returned tensors hold the same values but gradients computed
    /// from them never flow back into the batch that produced them.
    pub fn detach(&self) -> Self {
        match self {
            Self::Single(h) => Self::Single(h.detach()),
            Self::Pair { h, c } => Self::Pair {
                h: h.detach(),
                c: c.detach(),
            },
        }
    }

    /// State of a single (layer, direction) slot: `[batch, hidden_dim]`
    fn slot(&self, idx: usize) -> Result<CellState> {
        Ok(CellState {
            h: self.h().get(idx)?,
            c: self.c().map(|c| c.get(idx)).transpose()?,
        })
    }

    fn from_slots(slots: Vec<CellState>) -> Result<Self> {
        let mut hs = Vec::with_capacity(slots.len());
        let mut cs = Vec::with_capacity(slots.len());
        for slot in slots {
            hs.push(slot.h);
            if let Some(c) = slot.c {
                cs.push(c);
            }
        }

        let h = Tensor::stack(&hs, 0)?;
        if cs.is_empty() {
            Ok(Self::Single(h))
        } else {
            Ok(Self::Pair {
                h,
                c: Tensor::stack(&cs, 0)?,
            })
        }
    }
}

/// Per-slot state while stepping through a sequence
#[derive(Debug, Clone)]
struct CellState {
    h: Tensor,
    c: Option<Tensor>,
}

/// One timestep of a recurrent cell over `[batch, features]` input
trait RecurrentCell {
    fn advance(&self, x: &Tensor, state: &CellState) -> Result<CellState>;
}

/// Parameter name suffix: `l{k}` or `l{k}_reverse`
fn param_suffix(layer_idx: usize, direction: Direction) -> String {
    match direction {
        Direction::Forward => format!("l{}", layer_idx),
        Direction::Backward => format!("l{}_reverse", layer_idx),
    }
}

/// U(-1/sqrt(hidden), 1/sqrt(hidden)) for every tensor, as torch.nn.RNNBase does
fn uniform_init(hidden_dim: usize) -> Init {
    let bound = 1. / (hidden_dim as f64).sqrt();
    Init::Uniform { lo: -bound, up: bound }
}

/// Elman cell with tanh non-linearity; candle-nn has no prebuilt layer for it
struct TanhCell {
    weight_ih: Tensor,
    weight_hh: Tensor,
    bias_ih: Tensor,
    bias_hh: Tensor,
}

impl TanhCell {
    fn new(
        input_dim: usize,
        hidden_dim: usize,
        layer_idx: usize,
        direction: Direction,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let init = uniform_init(hidden_dim);
        let suffix = param_suffix(layer_idx, direction);

        Ok(Self {
            weight_ih: vb.get_with_hints((hidden_dim, input_dim), &format!("weight_ih_{suffix}"), init)?,
            weight_hh: vb.get_with_hints((hidden_dim, hidden_dim), &format!("weight_hh_{suffix}"), init)?,
            bias_ih: vb.get_with_hints(hidden_dim, &format!("bias_ih_{suffix}"), init)?,
            bias_hh: vb.get_with_hints(hidden_dim, &format!("bias_hh_{suffix}"), init)?,
        })
    }
}

impl RecurrentCell for TanhCell {
    fn advance(&self, x: &Tensor, state: &CellState) -> Result<CellState> {
        let xi = x.matmul(&self.weight_ih.t()?)?.broadcast_add(&self.bias_ih)?;
        let hh = state.h.matmul(&self.weight_hh.t()?)?.broadcast_add(&self.bias_hh)?;
        Ok(CellState {
            h: xi.add(&hh)?.tanh()?,
            c: None,
        })
    }
}

impl RecurrentCell for GRU {
    fn advance(&self, x: &Tensor, state: &CellState) -> Result<CellState> {
        let next = RNN::step(self, x, &GRUState { h: state.h.clone() })?;
        Ok(CellState { h: next.h, c: None })
    }
}

impl RecurrentCell for LSTM {
    fn advance(&self, x: &Tensor, state: &CellState) -> Result<CellState> {
        let c = state
            .c
            .clone()
            .ok_or_else(|| candle_core::Error::Msg("LSTM step requires a cell state".to_string()))?;
        let next = RNN::step(self, x, &LSTMState { h: state.h.clone(), c })?;
        Ok(CellState {
            h: next.h,
            c: Some(next.c),
        })
    }
}

type BuildFn = fn(usize, usize, usize, Direction, &VarBuilder) -> Result<Box<dyn RecurrentCell>>;

/// Dispatch entry for one recurrent variant
struct CellKind {
    build: BuildFn,
}

/// Indexed by `RnnType` discriminant
static CELL_KINDS: [CellKind; 3] = [
    CellKind { build: build_tanh },
    CellKind { build: build_gru },
    CellKind { build: build_lstm },
];

fn cell_kind(rnn_type: RnnType) -> &'static CellKind {
    &CELL_KINDS[rnn_type as usize]
}

fn build_tanh(
    input_dim: usize,
    hidden_dim: usize,
    layer_idx: usize,
    direction: Direction,
    vb: &VarBuilder,
) -> Result<Box<dyn RecurrentCell>> {
    Ok(Box::new(TanhCell::new(input_dim, hidden_dim, layer_idx, direction, vb)?))
}

fn build_gru(
    input_dim: usize,
    hidden_dim: usize,
    layer_idx: usize,
    direction: Direction,
    vb: &VarBuilder,
) -> Result<Box<dyn RecurrentCell>> {
    let init = uniform_init(hidden_dim);
    let config = GRUConfig {
        w_ih_init: init,
        w_hh_init: init,
        b_ih_init: Some(init),
        b_hh_init: Some(init),
        layer_idx,
        direction,
    };
    Ok(Box::new(rnn::gru(input_dim, hidden_dim, config, vb.clone())?))
}

fn build_lstm(
    input_dim: usize,
    hidden_dim: usize,
    layer_idx: usize,
    direction: Direction,
    vb: &VarBuilder,
) -> Result<Box<dyn RecurrentCell>> {
    let init = uniform_init(hidden_dim);
    let config = LSTMConfig {
        w_ih_init: init,
        w_hh_init: init,
        b_ih_init: Some(init),
        b_hh_init: Some(init),
        layer_idx,
        direction,
    };
    Ok(Box::new(rnn::lstm(input_dim, hidden_dim, config, vb.clone())?))
}

/// One cell run over the sequence in a single direction
///
/// candle's `Direction` only selects parameter names, so the backward
/// cell walks the timesteps in reverse itself.
struct DirectionalCell {
    cell: Box<dyn RecurrentCell>,
    reverse: bool,
}

impl DirectionalCell {
    /// # Arguments
    /// * `xs` - Input sequence [batch, seq_len, features]
    /// * `state` - Initial state for this slot
    ///
    /// # Returns
    /// Outputs in time order [batch, seq_len, hidden_dim] and the final state
    fn run(&self, xs: &Tensor, mut state: CellState) -> Result<(Tensor, CellState)> {
        let seq_len = xs.dim(1)?;
        let order: Vec<usize> = if self.reverse {
            (0..seq_len).rev().collect()
        } else {
            (0..seq_len).collect()
        };

        let mut outputs = Vec::with_capacity(seq_len);
        for t in order {
            let x_t = xs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            state = self.cell.advance(&x_t, &state)?;
            outputs.push(state.h.clone());
        }

        if self.reverse {
            outputs.reverse();
        }

        Ok((Tensor::stack(&outputs, 1)?, state))
    }
}

/// Multi-layer, optionally bidirectional recurrent network
///
/// Layer `k > 0` consumes the concatenated outputs of both directions of
/// layer `k - 1`. Dropout is applied between layers during training only.
pub struct RecurrentStack {
    rnn_type: RnnType,
    layers: Vec<Vec<DirectionalCell>>,
    hidden_dim: usize,
    dropout: f32,
}

impl RecurrentStack {
    /// Create new recurrent stack
    ///
    /// # Arguments
    /// * `input_dim` - Feature width of the input sequence
    /// * `config` - Model configuration
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(input_dim: usize, config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let kind = cell_kind(config.rnn_type);
        let directions = config.bidir_mult();

        let mut layers = Vec::with_capacity(config.num_layers);
        for layer_idx in 0..config.num_layers {
            let layer_input = if layer_idx == 0 {
                input_dim
            } else {
                config.output_features()
            };

            let mut cells = Vec::with_capacity(directions);
            for dir in 0..directions {
                let reverse = dir == 1;
                let direction = if reverse {
                    Direction::Backward
                } else {
                    Direction::Forward
                };
                cells.push(DirectionalCell {
                    cell: (kind.build)(layer_input, config.hidden_dim, layer_idx, direction, &vb)?,
                    reverse,
                });
            }
            layers.push(cells);
        }

        Ok(Self {
            rnn_type: config.rnn_type,
            layers,
            hidden_dim: config.hidden_dim,
            dropout: config.dropout,
        })
    }

    pub fn rnn_type(&self) -> RnnType {
        self.rnn_type
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Number of (layer, direction) slots in the hidden state
    pub fn state_layers(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `xs` - Input tensor [batch, seq_len, features]
    /// * `hidden` - Initial state, one slot per (layer, direction)
    /// * `train` - Enables inter-layer dropout
    ///
    /// # Returns
    /// Last-layer outputs [batch, seq_len, hidden_dim * directions] and final state
    pub fn forward(
        &self,
        xs: &Tensor,
        hidden: &HiddenState,
        train: bool,
    ) -> Result<(Tensor, HiddenState)> {
        let expected = self.state_layers();
        if hidden.dims().first() != Some(&expected) || hidden.is_pair() != self.rnn_type.has_cell_state() {
            return Err(candle_core::Error::Msg(format!(
                "{} expects {} hidden state with {} slots, got {} with dims {:?}",
                self.rnn_type,
                if self.rnn_type.has_cell_state() { "a paired" } else { "a single" },
                expected,
                if hidden.is_pair() { "a pair" } else { "a single tensor" },
                hidden.dims()
            )));
        }

        let mut input = xs.clone();
        let mut finals = Vec::with_capacity(expected);
        let mut slot = 0;

        for (layer_idx, cells) in self.layers.iter().enumerate() {
            if layer_idx > 0 && train && self.dropout > 0.0 {
                input = ops::dropout(&input, self.dropout)?;
            }

            let mut outputs = Vec::with_capacity(cells.len());
            for cell in cells {
                let (out, last) = cell.run(&input, hidden.slot(slot)?)?;
                outputs.push(out);
                finals.push(last);
                slot += 1;
            }

            input = if outputs.len() == 1 {
                outputs.remove(0)
            } else {
                Tensor::cat(&outputs, D::Minus1)?
            };
        }

        Ok((input, HiddenState::from_slots(finals)?))
    }
}
