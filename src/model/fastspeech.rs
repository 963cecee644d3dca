//! FastSpeech: non-autoregressive transformer acoustic model.
//!
//! ## Architecture
//!
//! ```text
//! input_ids [B, S] → char embedding + sinusoidal positions (+ speaker)
//!                  → encoder: N × FFT block
//!                  → duration predictor ─────────────→ duration_outputs [B, S]
//!                  → length regulator (ground-truth durations)
//!                  → + sinusoidal positions
//!                  → decoder: N × FFT block
//!                  → Linear(num_mels)                 → mel_before [B, T, num_mels]
//!                  → + postnet(mel_before)            → mel_after  [B, T, num_mels]
//! ```
//!
//! ## Parameter names (under the model prefix)
//!
//! ```text
//! embeddings.charactor_embeddings.weight
//! embeddings.speaker_embeddings.weight, embeddings.speaker_fc.{weight,bias}   (n_speakers > 1)
//! encoder.layer_._{i}.attention.{query,key,value,output.dense}.{weight,bias}
//! encoder.layer_._{i}.attention.output.layer_norm.{gamma,beta}
//! encoder.layer_._{i}.intermediate.{conv1d_1,conv1d_2}.{weight,bias}
//! duration_predictor.conv_layers.{i}.{conv,layer_norm}.*, duration_predictor.output_layer.*
//! decoder.layer_._{i}.*
//! mel_before.{weight,bias}
//! postnet.conv_batch_norm.{i}.{conv,batch_norm}.*
//! ```

pub mod duration;
pub mod fft;

use candle_core::{DType, Module, Tensor};
use candle_nn::{Embedding, VarBuilder};

use crate::config::FastSpeechConfig;
use crate::model::layers::embedding::{embedding, sinusoidal_positions};
use crate::model::layers::mask::sequence_mask;
use crate::model::layers::{Postnet, SpeakerEmbedding};
use crate::{Error, Result};

use duration::{DurationPredictor, LengthRegulator};
use fft::FftStack;

/// Predictions from one FastSpeech forward pass.
#[derive(Debug, Clone)]
pub struct FastSpeechOutput {
    /// `[B, T, num_mels]` mel spectrogram before the postnet.
    pub mel_before: Tensor,
    /// `[B, T, num_mels]` mel spectrogram after the postnet residual.
    pub mel_after: Tensor,
    /// `[B, S]` predicted per-token frame counts.
    pub duration_outputs: Tensor,
}

#[derive(Debug)]
pub struct FastSpeech {
    config: FastSpeechConfig,
    char_embeddings: Embedding,
    speaker: Option<SpeakerEmbedding>,
    encoder: FftStack,
    duration_predictor: DurationPredictor,
    decoder: FftStack,
    mel_dense: candle_nn::Linear,
    postnet: Postnet,
}

impl FastSpeech {
    pub fn new(config: &FastSpeechConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let cfg = config;
        let emb_vb = vb.pp("embeddings");
        let char_embeddings = embedding(
            cfg.vocab_size,
            cfg.hidden_size,
            cfg.initializer_range,
            emb_vb.pp("charactor_embeddings"),
        )?;
        let speaker = if cfg.n_speakers > 1 {
            Some(SpeakerEmbedding::new(
                cfg.n_speakers,
                cfg.hidden_size,
                cfg.initializer_range,
                emb_vb,
            )?)
        } else {
            None
        };

        let model = Self {
            config: cfg.clone(),
            char_embeddings,
            speaker,
            encoder: FftStack::new(cfg, vb.pp("encoder"))?,
            duration_predictor: DurationPredictor::new(cfg, vb.pp("duration_predictor"))?,
            decoder: FftStack::new(cfg, vb.pp("decoder"))?,
            mel_dense: candle_nn::linear(cfg.hidden_size, cfg.num_mels, vb.pp("mel_before"))?,
            postnet: Postnet::new(
                cfg.num_mels,
                cfg.postnet_conv_filters,
                cfg.postnet_conv_kernel_sizes,
                cfg.n_conv_postnet,
                cfg.postnet_dropout_rate,
                vb.pp("postnet"),
            )?,
        };
        tracing::debug!(
            layers = cfg.num_hidden_layers,
            speakers = cfg.n_speakers,
            hidden = cfg.hidden_size,
            "built FastSpeech"
        );
        Ok(model)
    }

    pub fn config(&self) -> &FastSpeechConfig {
        &self.config
    }

    fn check_positions(&self, what: &str, len: usize) -> Result<()> {
        if len > self.config.max_position_embeddings {
            return Err(Error::Shape(format!(
                "{what} length {len} exceeds max_position_embeddings {}",
                self.config.max_position_embeddings
            )));
        }
        Ok(())
    }

    /// Forward pass with ground-truth durations driving the length regulator.
    ///
    /// - `input_ids`: `[B, S]` u32
    /// - `attention_mask`: `[B, S]` (1 = valid)
    /// - `speaker_ids`: `[B]` u32
    /// - `duration_gts`: `[B, S]` u32 frames per token
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        speaker_ids: &Tensor,
        duration_gts: &Tensor,
        training: bool,
    ) -> Result<FastSpeechOutput> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let hidden = self.config.hidden_size;
        let device = input_ids.device();
        self.check_positions("input", seq_len)?;

        let mask = attention_mask.to_dtype(DType::F32)?;
        let speaker_features = match &self.speaker {
            Some(speaker) => Some(speaker.forward(speaker_ids)?),
            None => None,
        };

        // Embeddings
        let mut h = self
            .char_embeddings
            .forward(input_ids)?
            .broadcast_add(&sinusoidal_positions(seq_len, hidden, device)?)?;
        if let Some(spk) = &speaker_features {
            h = h.broadcast_add(spk)?;
        }
        let h = h.broadcast_mul(&mask.unsqueeze(2)?)?;

        // Encoder + duration prediction
        let encoder_out = self.encoder.forward(&h, &mask, training)?;
        let duration_outputs = self
            .duration_predictor
            .forward(&encoder_out, &mask, training)?;

        // Length regulation to frame rate
        let durations: Vec<Vec<u32>> = duration_gts.to_dtype(DType::U32)?.to_vec2()?;
        let (expanded, lengths) = LengthRegulator::expand(
            &encoder_out,
            &durations,
            self.config.max_position_embeddings,
        )?;
        let frames = expanded.dim(1)?;

        let decoder_mask = sequence_mask(&lengths, frames, device)?;
        let decoder_in = expanded
            .broadcast_add(&sinusoidal_positions(frames, hidden, device)?)?
            .broadcast_mul(&decoder_mask.unsqueeze(2)?)?;
        let decoder_out = self.decoder.forward(&decoder_in, &decoder_mask, training)?;

        let mel_before = self.mel_dense.forward(&decoder_out)?;
        let mel_after = (&mel_before + self.postnet.forward(&mel_before, training)?)?;

        Ok(FastSpeechOutput {
            mel_before,
            mel_after,
            duration_outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn tiny_cfg() -> FastSpeechConfig {
        FastSpeechConfig {
            vocab_size: 20,
            hidden_size: 16,
            num_hidden_layers: 1,
            num_attention_heads: 2,
            intermediate_size: 24,
            duration_predictor_filters: 8,
            num_mels: 6,
            n_conv_postnet: 2,
            postnet_conv_filters: 8,
            ..FastSpeechConfig::default()
        }
    }

    #[test]
    fn forward_shapes_follow_durations() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = FastSpeech::new(&tiny_cfg().with_n_speakers(2), vb).unwrap();

        let ids = Tensor::new(&[[1u32, 2, 3, 4], [5, 6, 7, 8]], &device).unwrap();
        let mask = Tensor::ones((2, 4), DType::U32, &device).unwrap();
        let speakers = Tensor::new(&[0u32, 1], &device).unwrap();
        let durations = Tensor::new(&[[2u32, 1, 1, 2], [1, 1, 1, 1]], &device).unwrap();

        let out = model.forward(&ids, &mask, &speakers, &durations, true).unwrap();
        assert_eq!(out.mel_before.dims(), &[2, 6, 6]);
        assert_eq!(out.mel_after.dims(), &[2, 6, 6]);
        assert_eq!(out.duration_outputs.dims(), &[2, 4]);
    }

    #[test]
    fn single_speaker_has_no_speaker_table() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        FastSpeech::new(&tiny_cfg(), vb).unwrap();
        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().all(|n| !n.contains("speaker")), "{names:?}");
    }

    #[test]
    fn invalid_config_fails_construction() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let err = FastSpeech::new(&tiny_cfg().with_n_speakers(0), vb).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn output_longer_than_positions_is_rejected() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = FastSpeechConfig {
            max_position_embeddings: 4,
            ..tiny_cfg()
        };
        let model = FastSpeech::new(&cfg, vb).unwrap();
        let ids = Tensor::new(&[[1u32, 2]], &device).unwrap();
        let mask = Tensor::ones((1, 2), DType::U32, &device).unwrap();
        let speakers = Tensor::new(&[0u32], &device).unwrap();
        let durations = Tensor::new(&[[3u32, 3]], &device).unwrap();
        let err = model
            .forward(&ids, &mask, &speakers, &durations, true)
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }
}
