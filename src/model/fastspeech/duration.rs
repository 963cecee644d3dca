//! Duration predictor and length regulator.
//!
//! The predictor regresses a per-token frame count from encoder states. The
//! regulator expands encoder states to frame rate by repeating each token's
//! vector `duration` times; during training the ground-truth durations drive it.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv1d, Dropout, VarBuilder};

use crate::config::FastSpeechConfig;
use crate::model::layers::LayerNorm;
use crate::model::layers::mask::sequence_mask;
use crate::model::layers::postnet::same_conv1d;

#[derive(Debug, Clone)]
struct ConvLayerNorm {
    conv: Conv1d,
    norm: LayerNorm,
}

/// `n × (Conv1d → LayerNorm → ReLU → Dropout) → Linear(1)`.
#[derive(Debug, Clone)]
pub struct DurationPredictor {
    layers: Vec<ConvLayerNorm>,
    dropout: Dropout,
    output: candle_nn::Linear,
}

impl DurationPredictor {
    pub fn new(cfg: &FastSpeechConfig, vb: VarBuilder) -> Result<Self> {
        let filters = cfg.duration_predictor_filters;
        let mut layers = Vec::with_capacity(cfg.num_duration_conv_layers);
        for i in 0..cfg.num_duration_conv_layers {
            let in_ch = if i == 0 { cfg.hidden_size } else { filters };
            let vb = vb.pp(format!("conv_layers.{i}"));
            layers.push(ConvLayerNorm {
                conv: same_conv1d(
                    in_ch,
                    filters,
                    cfg.duration_predictor_kernel_sizes,
                    vb.pp("conv"),
                )?,
                norm: LayerNorm::new(filters, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            });
        }
        let out_in = if layers.is_empty() { cfg.hidden_size } else { filters };
        Ok(Self {
            layers,
            dropout: Dropout::new(cfg.duration_predictor_dropout_probs as f32),
            output: candle_nn::linear(out_in, 1, vb.pp("output_layer"))?,
        })
    }

    /// - `encoder_hidden_states`: `[B, S, D]`
    /// - `mask`: `[B, S]` float
    ///
    /// Returns predicted durations `[B, S]`, zero on padding.
    pub fn forward(
        &self,
        encoder_hidden_states: &Tensor,
        mask: &Tensor,
        training: bool,
    ) -> Result<Tensor> {
        let mut xs = encoder_hidden_states.broadcast_mul(&mask.unsqueeze(2)?)?;
        for layer in &self.layers {
            let h = layer.conv.forward(&xs.transpose(1, 2)?.contiguous()?)?;
            let h = h.transpose(1, 2)?.contiguous()?;
            let h = layer.norm.forward(&h)?.relu()?;
            xs = self.dropout.forward(&h, training)?;
        }
        self.output.forward(&xs)?.squeeze(2)?.mul(mask)
    }
}

/// Expands token-rate states to frame rate.
pub struct LengthRegulator;

impl LengthRegulator {
    /// Total frames per example.
    pub fn frame_lengths(durations: &[Vec<u32>]) -> Vec<usize> {
        durations
            .iter()
            .map(|row| row.iter().map(|&d| d as usize).sum())
            .collect()
    }

    /// - `hidden_states`: `[B, S, D]`
    /// - `durations`: per-example frame counts, one row of `S` entries per batch item
    /// - `max_frames`: upper bound on `T_max`, checked before anything is allocated
    ///
    /// Returns `([B, T_max, D], lengths)` where `T_max` is the largest total
    /// duration; rows shorter than `T_max` are zero-padded.
    pub fn expand(
        hidden_states: &Tensor,
        durations: &[Vec<u32>],
        max_frames: usize,
    ) -> crate::Result<(Tensor, Vec<usize>)> {
        let (batch, seq_len, hidden) = hidden_states.dims3()?;
        if durations.len() != batch || durations.iter().any(|row| row.len() != seq_len) {
            let actual: Vec<usize> = durations.iter().map(Vec::len).collect();
            return Err(crate::Error::Shape(format!(
                "durations: expected {batch} rows of {seq_len}, got rows of {actual:?}"
            )));
        }

        let lengths = Self::frame_lengths(durations);
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        if max_len == 0 {
            return Err(crate::Error::Shape(
                "durations sum to zero frames for every example".into(),
            ));
        }
        if max_len > max_frames {
            return Err(crate::Error::Shape(format!(
                "output length {max_len} exceeds max_position_embeddings {max_frames}"
            )));
        }

        // Flat gather index into [B * S, D]; padding points at the row's first token
        // and is zeroed by the mask below.
        let mut index = Vec::with_capacity(batch * max_len);
        for (b, row) in durations.iter().enumerate() {
            for (t, &d) in row.iter().enumerate() {
                index.extend(std::iter::repeat_n((b * seq_len + t) as u32, d as usize));
            }
            index.extend(std::iter::repeat_n((b * seq_len) as u32, max_len - lengths[b]));
        }
        let index = Tensor::from_vec(index, batch * max_len, hidden_states.device())?;

        let expanded = hidden_states
            .reshape((batch * seq_len, hidden))?
            .index_select(&index, 0)?
            .reshape((batch, max_len, hidden))?;
        let mask = sequence_mask(&lengths, max_len, hidden_states.device())?
            .to_dtype(hidden_states.dtype())?;
        let expanded = expanded.broadcast_mul(&mask.unsqueeze(2)?)?;
        Ok((expanded, lengths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn regulator_repeats_tokens() {
        let device = Device::Cpu;
        // [1, 3, 2]: token vectors [0,0], [1,1], [2,2]
        let h = Tensor::new(&[[[0f32, 0.0], [1.0, 1.0], [2.0, 2.0]]], &device).unwrap();
        let (out, lengths) = LengthRegulator::expand(&h, &[vec![1, 0, 3]], 8).unwrap();
        assert_eq!(lengths, vec![4]);
        assert_eq!(out.dims(), &[1, 4, 2]);
        let rows: Vec<Vec<f32>> = out.squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(rows, vec![vec![0.0, 0.0], vec![2.0, 2.0], vec![2.0, 2.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn regulator_pads_shorter_rows() {
        let device = Device::Cpu;
        let h = Tensor::ones((2, 2, 3), DType::F32, &device).unwrap();
        let (out, lengths) = LengthRegulator::expand(&h, &[vec![1, 1], vec![2, 2]], 8).unwrap();
        assert_eq!(lengths, vec![2, 4]);
        assert_eq!(out.dims(), &[2, 4, 3]);
        let first: f32 = out.get(0).unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(first, 6.0);
    }

    #[test]
    fn regulator_rejects_mismatched_rows() {
        let h = Tensor::ones((1, 3, 2), DType::F32, &Device::Cpu).unwrap();
        let err = LengthRegulator::expand(&h, &[vec![1, 1]], 8).unwrap_err();
        assert!(matches!(err, crate::Error::Shape(_)));
    }

    #[test]
    fn regulator_checks_frame_bound_before_gathering() {
        let h = Tensor::ones((1, 2, 2), DType::F32, &Device::Cpu).unwrap();
        let durations = [vec![u32::MAX, u32::MAX]];
        assert_eq!(
            LengthRegulator::frame_lengths(&durations),
            vec![2 * u32::MAX as usize]
        );
        let err = LengthRegulator::expand(&h, &durations, 1000).unwrap_err();
        assert!(matches!(err, crate::Error::Shape(ref msg) if msg.contains("exceeds")), "{err}");
    }

    #[test]
    fn predictor_is_masked() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cfg = FastSpeechConfig {
            hidden_size: 8,
            num_attention_heads: 2,
            duration_predictor_filters: 12,
            ..FastSpeechConfig::default()
        };
        let predictor = DurationPredictor::new(&cfg, vb.pp("duration_predictor")).unwrap();
        let h = Tensor::randn(0f32, 1.0, (2, 5, 8), &device).unwrap();
        let mask = sequence_mask(&[5, 3], 5, &device).unwrap();
        let d = predictor.forward(&h, &mask, true).unwrap();
        assert_eq!(d.dims(), &[2, 5]);
        let rows: Vec<Vec<f32>> = d.to_vec2().unwrap();
        assert_eq!(rows[1][3], 0.0);
        assert_eq!(rows[1][4], 0.0);
    }
}
