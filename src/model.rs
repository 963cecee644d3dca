//! Trainable acoustic models.
//!
//! ## Components
//!
//! - [`fastspeech`] — FastSpeech: FFT encoder/decoder with a duration-driven length regulator
//! - [`tacotron2`] — Tacotron2: conv + BiLSTM encoder, location-sensitive attention decoder
//! - [`layers`] — normalization, LSTM, postnet, embeddings and masks shared by both

pub mod fastspeech;
pub mod layers;
pub mod tacotron2;
