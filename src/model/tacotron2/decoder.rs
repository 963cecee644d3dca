//! Teacher-forced autoregressive decoder.
//!
//! Each step consumes the last ground-truth frame of the previous group of
//! `reduction_factor` frames (zeros for the first step) and emits the next
//! group plus one stop logit per frame.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Dropout, VarBuilder};

use super::attention::{LocationSensitiveAttention, ProcessedMemory};
use crate::config::Tacotron2Config;
use crate::model::layers::LstmCell;

/// Fully connected ReLU layers with dropout that stays on at inference too.
#[derive(Debug, Clone)]
pub struct Prenet {
    layers: Vec<candle_nn::Linear>,
    dropout: Dropout,
}

impl Prenet {
    pub fn new(cfg: &Tacotron2Config, vb: VarBuilder) -> Result<Self> {
        let layers = (0..cfg.n_prenet_layers)
            .map(|i| {
                let in_dim = if i == 0 { cfg.n_mels } else { cfg.prenet_units };
                candle_nn::linear(in_dim, cfg.prenet_units, vb.pp(format!("dense_._{i}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            dropout: Dropout::new(cfg.prenet_dropout_rate as f32),
        })
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            xs = self.dropout.forward(&layer.forward(&xs)?.relu()?, true)?;
        }
        Ok(xs)
    }
}

/// Raw decoder outputs, already unfolded from groups to frames.
#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// `[B, T, n_mels]`
    pub frames: Tensor,
    /// `[B, T]`
    pub stop_logits: Tensor,
    /// `[B, T / r, L]`
    pub alignments: Tensor,
}

#[derive(Debug, Clone)]
pub struct Decoder {
    prenet: Prenet,
    attention_lstm: LstmCell,
    attention: LocationSensitiveAttention,
    decoder_lstm: LstmCell,
    frame_projection: candle_nn::Linear,
    stop_projection: candle_nn::Linear,
    n_mels: usize,
    reduction_factor: usize,
}

impl Decoder {
    pub fn new(cfg: &Tacotron2Config, vb: VarBuilder) -> Result<Self> {
        let units = cfg.decoder_lstm_units;
        let memory = cfg.encoder_output_size();
        let r = cfg.reduction_factor;
        Ok(Self {
            prenet: Prenet::new(cfg, vb.pp("prenet"))?,
            attention_lstm: LstmCell::new(
                cfg.prenet_units + memory,
                units,
                vb.pp("attention_lstm"),
            )?,
            attention: LocationSensitiveAttention::new(cfg, units, vb.pp("attention_layer"))?,
            decoder_lstm: LstmCell::new(units + memory, units, vb.pp("decoder_lstms"))?,
            frame_projection: candle_nn::linear(
                units + memory,
                cfg.n_mels * r,
                vb.pp("frame_projection"),
            )?,
            stop_projection: candle_nn::linear(units + memory, r, vb.pp("stop_projection"))?,
            n_mels: cfg.n_mels,
            reduction_factor: r,
        })
    }

    pub fn attention(&self) -> &LocationSensitiveAttention {
        &self.attention
    }

    /// Per-step decoder inputs `[steps, B, n_mels]`: a zero go frame followed
    /// by the last frame of each preceding group.
    fn teacher_inputs(&self, mel_targets: &Tensor) -> Result<Tensor> {
        let (batch, frames, n_mels) = mel_targets.dims3()?;
        let r = self.reduction_factor;
        let steps = frames / r;
        let go = Tensor::zeros((batch, 1, n_mels), mel_targets.dtype(), mel_targets.device())?;
        let inputs = if steps > 1 {
            let last_of_group = mel_targets
                .reshape((batch, steps, r, n_mels))?
                .narrow(2, r - 1, 1)?
                .squeeze(2)?
                .narrow(1, 0, steps - 1)?;
            Tensor::cat(&[&go, &last_of_group], 1)?
        } else {
            go
        };
        inputs.transpose(0, 1)?.contiguous()
    }

    /// Decode `mel_targets.dim(1)` frames with teacher forcing. The frame
    /// count must be a multiple of the reduction factor.
    pub fn forward(&self, memory: &ProcessedMemory, mel_targets: &Tensor) -> Result<DecoderOutput> {
        let (batch, frames, _) = mel_targets.dims3()?;
        let r = self.reduction_factor;
        let values = memory.values();
        let (dtype, device) = (values.dtype(), values.device());
        let inputs = self.teacher_inputs(mel_targets)?;
        let steps = frames / r;

        let mut attention_state = self.attention_lstm.zero_state(batch, dtype, device)?;
        let mut decoder_state = self.decoder_lstm.zero_state(batch, dtype, device)?;
        let mut alignment_state = self.attention.initial_state(memory)?;
        let mut context = Tensor::zeros((batch, values.dim(2)?), dtype, device)?;

        let mut frame_groups = Vec::with_capacity(steps);
        let mut stop_groups = Vec::with_capacity(steps);
        let mut alignments = Vec::with_capacity(steps);
        for step in 0..steps {
            let prenet_out = self.prenet.forward(&inputs.get(step)?)?;
            let attention_in = Tensor::cat(&[&prenet_out, &context], 1)?;
            attention_state = self.attention_lstm.step(&attention_in, &attention_state)?;

            let (next_context, next_alignment) =
                self.attention
                    .step(&attention_state.h, memory, &alignment_state)?;
            context = next_context;
            alignment_state = next_alignment;

            let decoder_in = Tensor::cat(&[&attention_state.h, &context], 1)?;
            decoder_state = self.decoder_lstm.step(&decoder_in, &decoder_state)?;

            let projection_in = Tensor::cat(&[&decoder_state.h, &context], 1)?;
            frame_groups.push(self.frame_projection.forward(&projection_in)?);
            stop_groups.push(self.stop_projection.forward(&projection_in)?);
            alignments.push(alignment_state.alignment.clone());
        }

        let frames_out = Tensor::stack(&frame_groups, 1)?.reshape((batch, frames, self.n_mels))?;
        let stop_logits = Tensor::stack(&stop_groups, 1)?.reshape((batch, frames))?;
        Ok(DecoderOutput {
            frames: frames_out,
            stop_logits,
            alignments: Tensor::stack(&alignments, 1)?,
        })
    }
}
