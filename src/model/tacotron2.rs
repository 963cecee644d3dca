//! Tacotron2: attention-based sequence-to-sequence acoustic model.
//!
//! ```text
//! input_ids [B, L] → embeddings (+ speaker) → conv encoder → BiLSTM → memory [B, L, 2u]
//! memory ──→ decoder (prenet → attention LSTM → location-sensitive attention
//!                     → decoder LSTM → frame / stop projections), teacher-forced
//!        ──→ mel_before [B, T, n_mels], stop_logits [B, T], alignments [B, T / r, L]
//! mel_after = mel_before + postnet(mel_before)
//! ```
//!
//! Training only: the decoder always consumes ground-truth frames.

pub mod attention;
pub mod decoder;
pub mod encoder;

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;

use crate::config::Tacotron2Config;
use crate::model::layers::Postnet;
use crate::model::layers::mask::sequence_mask;
use crate::{Error, Result};

use decoder::Decoder;
use encoder::Encoder;

/// Predictions from one teacher-forced Tacotron2 pass.
#[derive(Debug, Clone)]
pub struct Tacotron2Output {
    pub mel_before: Tensor,
    pub mel_after: Tensor,
    /// `[B, T]` pre-sigmoid stop token scores.
    pub stop_logits: Tensor,
    /// `[B, T / reduction_factor, L]` attention weights per decoder step.
    pub alignment_history: Tensor,
}

#[derive(Debug)]
pub struct Tacotron2 {
    config: Tacotron2Config,
    encoder: Encoder,
    decoder: Decoder,
    postnet: Postnet,
}

impl Tacotron2 {
    pub fn new(config: &Tacotron2Config, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let cfg = config;
        let model = Self {
            config: cfg.clone(),
            encoder: Encoder::new(cfg, vb.pp("encoder"))?,
            decoder: Decoder::new(cfg, vb.pp("decoder_cell"))?,
            postnet: Postnet::new(
                cfg.n_mels,
                cfg.postnet_conv_filters,
                cfg.postnet_conv_kernel_sizes,
                cfg.n_conv_postnet,
                cfg.postnet_dropout_rate,
                vb.pp("postnet"),
            )?,
        };
        tracing::debug!(
            speakers = cfg.n_speakers,
            reduction_factor = cfg.reduction_factor,
            decoder_units = cfg.decoder_lstm_units,
            "built Tacotron2"
        );
        Ok(model)
    }

    pub fn config(&self) -> &Tacotron2Config {
        &self.config
    }

    /// Number of frames the decoder will emit for the given mel lengths.
    pub fn decode_length(&self, mel_lengths: &[usize], max_frames: usize) -> Result<usize> {
        let r = self.config.reduction_factor;
        let len = mel_lengths.iter().copied().max().unwrap_or(0);
        if len == 0 || len > max_frames {
            return Err(Error::Shape(format!(
                "decode length {len} must be in 1..={max_frames}"
            )));
        }
        if len % r != 0 {
            return Err(Error::Shape(format!(
                "decode length {len} is not a multiple of reduction_factor {r}"
            )));
        }
        Ok(len)
    }

    /// Teacher-forced forward pass.
    ///
    /// - `input_ids`: `[B, L]` u32
    /// - `input_lengths`: `[B]` u32
    /// - `speaker_ids`: `[B]` u32
    /// - `mel_gts`: `[B, T, n_mels]`
    /// - `mel_lengths`: `[B]` u32; the decoder runs `max(mel_lengths)` frames
    pub fn forward(
        &self,
        input_ids: &Tensor,
        input_lengths: &Tensor,
        speaker_ids: &Tensor,
        mel_gts: &Tensor,
        mel_lengths: &Tensor,
        training: bool,
    ) -> Result<Tacotron2Output> {
        let (_batch, max_input) = input_ids.dims2()?;
        let device = input_ids.device();
        let input_lengths = to_lengths(input_lengths)?;
        let mel_lengths = to_lengths(mel_lengths)?;
        let frames = self.decode_length(&mel_lengths, mel_gts.dim(1)?)?;

        let mask = sequence_mask(&input_lengths, max_input, device)?;
        let memory = self.encoder.forward(input_ids, speaker_ids, &mask, training)?;
        let processed = self.decoder.attention().process_memory(&memory, &mask)?;

        let targets = mel_gts.narrow(1, 0, frames)?;
        let out = self.decoder.forward(&processed, &targets)?;
        let mel_before = out.frames;
        let mel_after = (&mel_before + self.postnet.forward(&mel_before, training)?)?;

        Ok(Tacotron2Output {
            mel_before,
            mel_after,
            stop_logits: out.stop_logits,
            alignment_history: out.alignments,
        })
    }
}

fn to_lengths(lengths: &Tensor) -> Result<Vec<usize>> {
    let lengths: Vec<u32> = lengths.to_dtype(DType::U32)?.to_vec1()?;
    Ok(lengths.into_iter().map(|l| l as usize).collect())
}
