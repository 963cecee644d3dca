//! Tacotron2 text encoder: embeddings, conv stack and bidirectional LSTM.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv1d, Dropout, Embedding, VarBuilder};

use crate::config::Tacotron2Config;
use crate::model::layers::embedding::embedding;
use crate::model::layers::postnet::same_conv1d;
use crate::model::layers::{BatchNorm1d, BiLstm, LayerNorm, SpeakerEmbedding};

/// Character embeddings plus optional speaker conditioning.
#[derive(Debug, Clone)]
pub struct TextEmbeddings {
    characters: Embedding,
    speaker: Option<SpeakerEmbedding>,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl TextEmbeddings {
    pub fn new(cfg: &Tacotron2Config, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.embedding_hidden_size;
        let speaker = if cfg.n_speakers > 1 {
            Some(SpeakerEmbedding::new(cfg.n_speakers, hidden, cfg.initializer_range, vb.clone())?)
        } else {
            None
        };
        Ok(Self {
            characters: embedding(
                cfg.vocab_size,
                hidden,
                cfg.initializer_range,
                vb.pp("character_embeddings"),
            )?,
            speaker,
            layer_norm: LayerNorm::new(hidden, 1e-5, vb.pp("LayerNorm"))?,
            dropout: Dropout::new(cfg.embedding_dropout_prob as f32),
        })
    }

    /// `input_ids: [B, L]`, `speaker_ids: [B]` → `[B, L, embedding_hidden_size]`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        speaker_ids: &Tensor,
        training: bool,
    ) -> Result<Tensor> {
        let mut h = self.characters.forward(input_ids)?;
        if let Some(speaker) = &self.speaker {
            h = h.broadcast_add(&speaker.forward(speaker_ids)?)?;
        }
        let h = self.layer_norm.forward(&h)?;
        self.dropout.forward(&h, training)
    }
}

#[derive(Debug)]
struct ConvBatchNorm {
    conv: Conv1d,
    norm: BatchNorm1d,
}

/// `n × (Conv1d → BatchNorm → ReLU → Dropout) → BiLSTM`.
#[derive(Debug)]
pub struct Encoder {
    embeddings: TextEmbeddings,
    convolutions: Vec<ConvBatchNorm>,
    dropout: Dropout,
    bilstm: BiLstm,
}

impl Encoder {
    pub fn new(cfg: &Tacotron2Config, vb: VarBuilder) -> Result<Self> {
        let filters = cfg.encoder_conv_filters;
        let mut convolutions = Vec::with_capacity(cfg.n_conv_encoder);
        for i in 0..cfg.n_conv_encoder {
            let in_ch = if i == 0 { cfg.embedding_hidden_size } else { filters };
            let vb = vb.pp(format!("conv_batch_norm.{i}"));
            convolutions.push(ConvBatchNorm {
                conv: same_conv1d(in_ch, filters, cfg.encoder_conv_kernel_sizes, vb.pp("conv"))?,
                norm: BatchNorm1d::new(filters, vb.pp("batch_norm"))?,
            });
        }
        let lstm_in = if convolutions.is_empty() {
            cfg.embedding_hidden_size
        } else {
            filters
        };
        Ok(Self {
            embeddings: TextEmbeddings::new(cfg, vb.pp("embeddings"))?,
            convolutions,
            dropout: Dropout::new(cfg.encoder_conv_dropout_rate as f32),
            bilstm: BiLstm::new(lstm_in, cfg.encoder_lstm_units, vb.pp("bilstm"))?,
        })
    }

    /// Returns encoder memory `[B, L, 2 * encoder_lstm_units]`, zeroed past
    /// each example's input length.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        speaker_ids: &Tensor,
        mask: &Tensor,
        training: bool,
    ) -> Result<Tensor> {
        let mask = mask.unsqueeze(2)?;
        let h = self
            .embeddings
            .forward(input_ids, speaker_ids, training)?
            .broadcast_mul(&mask)?;

        let mut xs = h.transpose(1, 2)?.contiguous()?;
        for layer in &self.convolutions {
            xs = layer.conv.forward(&xs)?;
            xs = layer.norm.forward(&xs, training)?.relu()?;
            xs = self.dropout.forward(&xs, training)?;
        }
        let xs = xs.transpose(1, 2)?.contiguous()?.broadcast_mul(&mask)?;
        self.bilstm.forward(&xs)?.broadcast_mul(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::layers::mask::sequence_mask;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn encoder_memory_is_masked() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = Tacotron2Config {
            vocab_size: 12,
            embedding_hidden_size: 8,
            n_conv_encoder: 2,
            encoder_conv_filters: 8,
            encoder_lstm_units: 4,
            n_speakers: 2,
            ..Tacotron2Config::default()
        };
        let encoder = Encoder::new(&cfg, vb.pp("encoder")).unwrap();
        let ids = Tensor::new(&[[1u32, 2, 3], [4, 5, 0]], &device).unwrap();
        let speakers = Tensor::new(&[0u32, 1], &device).unwrap();
        let mask = sequence_mask(&[3, 2], 3, &device).unwrap();
        let memory = encoder.forward(&ids, &speakers, &mask, true).unwrap();
        assert_eq!(memory.dims(), &[2, 3, 8]);
        let padded: f32 = memory
            .get(1)
            .unwrap()
            .get(2)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(padded, 0.0);
    }
}
