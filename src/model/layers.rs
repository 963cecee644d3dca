//! Building blocks shared by the FastSpeech and Tacotron2 graphs.
//!
//! - [`norm`] — LayerNorm and BatchNorm1d written with differentiable ops
//! - [`lstm`] — LSTM cell and bidirectional wrapper
//! - [`postnet`] — conv + batch-norm mel refinement
//! - [`embedding`] — token/speaker tables and sinusoidal positions
//! - [`mask`] — padding masks and additive attention biases
//! - [`activation`] — mish and softplus

pub mod activation;
pub mod embedding;
pub mod lstm;
pub mod mask;
pub mod norm;
pub mod postnet;

pub use embedding::SpeakerEmbedding;
pub use lstm::{BiLstm, LstmCell, LstmState};
pub use norm::{BatchNorm1d, LayerNorm};
pub use postnet::Postnet;
