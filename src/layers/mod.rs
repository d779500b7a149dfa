/// Neural network layer primitives
///
/// - Recurrent cells (tanh RNN, GRU, LSTM) stacked into multi-layer,
///   optionally bidirectional networks
/// - Hidden-state container with an explicit stop-gradient

pub mod recurrent;

pub use recurrent::{HiddenState, RecurrentStack};
