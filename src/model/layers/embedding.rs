//! Token, speaker and sinusoidal position embeddings.

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{Embedding, Init, VarBuilder};

use super::activation::softplus;

/// Embedding table initialized from `N(0, initializer_range)`.
pub fn embedding(
    vocab_size: usize,
    hidden_size: usize,
    initializer_range: f64,
    vb: VarBuilder,
) -> Result<Embedding> {
    let weight = vb.get_with_hints(
        (vocab_size, hidden_size),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: initializer_range,
        },
    )?;
    Ok(Embedding::new(weight, hidden_size))
}

/// Speaker conditioning: embedding lookup followed by a softplus projection.
///
/// Only built for multi-speaker configs; the output is broadcast-added over
/// the time axis of the token embeddings.
#[derive(Debug, Clone)]
pub struct SpeakerEmbedding {
    embeddings: Embedding,
    fc: candle_nn::Linear,
}

impl SpeakerEmbedding {
    pub fn new(
        n_speakers: usize,
        hidden_size: usize,
        initializer_range: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            embeddings: embedding(
                n_speakers,
                hidden_size,
                initializer_range,
                vb.pp("speaker_embeddings"),
            )?,
            fc: candle_nn::linear(hidden_size, hidden_size, vb.pp("speaker_fc"))?,
        })
    }

    /// `speaker_ids: [B]` → `[B, 1, hidden]`.
    pub fn forward(&self, speaker_ids: &Tensor) -> Result<Tensor> {
        let emb = self.embeddings.forward(speaker_ids)?;
        softplus(&self.fc.forward(&emb)?)?.unsqueeze(1)
    }
}

/// Fixed sinusoidal encodings for positions `1..=len`, shape `[len, dim]`.
///
/// Position 0 is reserved for padding, so the first row corresponds to
/// position 1. Even columns hold `sin`, odd columns `cos`.
pub fn sinusoidal_positions(len: usize, dim: usize, device: &Device) -> Result<Tensor> {
    let mut table = vec![0f32; len * dim];
    for row in 0..len {
        let pos = (row + 1) as f64;
        for i in 0..dim / 2 {
            let angle = pos / 10000f64.powf(2.0 * i as f64 / dim as f64);
            table[row * dim + 2 * i] = angle.sin() as f32;
            table[row * dim + 2 * i + 1] = angle.cos() as f32;
        }
    }
    Tensor::from_vec(table, (len, dim), device)
}
