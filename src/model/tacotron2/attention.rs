//! Location-sensitive attention.
//!
//! ```text
//! f      = location_layer(location_conv(cumulative_alignments))
//! energy = v(tanh(query_layer(q) + memory_layer(memory) + f))
//! a      = softmax(energy + mask_bias)
//! ctx    = a · memory
//! ```

use candle_core::{D, Module, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, VarBuilder};

use crate::config::Tacotron2Config;
use crate::model::layers::mask::additive_bias;

/// Attention weights carried between decoder steps.
#[derive(Debug, Clone)]
pub struct AttentionState {
    /// `[B, L]` weights from the previous step.
    pub alignment: Tensor,
    /// `[B, L]` running sum of all previous weights.
    pub cumulative: Tensor,
}

/// Encoder memory with its key projection and mask bias, computed once per
/// forward pass.
#[derive(Debug, Clone)]
pub struct ProcessedMemory {
    values: Tensor,
    keys: Tensor,
    bias: Tensor,
}

impl ProcessedMemory {
    pub fn values(&self) -> &Tensor {
        &self.values
    }
}

#[derive(Debug, Clone)]
pub struct LocationSensitiveAttention {
    query_layer: candle_nn::Linear,
    memory_layer: candle_nn::Linear,
    location_conv: Conv1d,
    location_layer: candle_nn::Linear,
    v: candle_nn::Linear,
}

impl LocationSensitiveAttention {
    pub fn new(cfg: &Tacotron2Config, query_size: usize, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.attention_dim;
        let conv_cfg = Conv1dConfig {
            padding: (cfg.attention_kernel - 1) / 2,
            ..Default::default()
        };
        Ok(Self {
            query_layer: candle_nn::linear_no_bias(query_size, dim, vb.pp("query_layer"))?,
            memory_layer: candle_nn::linear_no_bias(
                cfg.encoder_output_size(),
                dim,
                vb.pp("memory_layer"),
            )?,
            location_conv: candle_nn::conv1d_no_bias(
                1,
                cfg.attention_filters,
                cfg.attention_kernel,
                conv_cfg,
                vb.pp("location_conv"),
            )?,
            location_layer: candle_nn::linear_no_bias(
                cfg.attention_filters,
                dim,
                vb.pp("location_layer"),
            )?,
            v: candle_nn::linear(dim, 1, vb.pp("v"))?,
        })
    }

    /// `memory: [B, L, E]`, `mask: [B, L]` float (1 = valid).
    pub fn process_memory(&self, memory: &Tensor, mask: &Tensor) -> Result<ProcessedMemory> {
        Ok(ProcessedMemory {
            values: memory.clone(),
            keys: self.memory_layer.forward(memory)?,
            bias: additive_bias(mask)?,
        })
    }

    /// Zero weights for the first decoder step.
    pub fn initial_state(&self, memory: &ProcessedMemory) -> Result<AttentionState> {
        let (batch, len, _) = memory.values.dims3()?;
        let zeros = Tensor::zeros((batch, len), memory.values.dtype(), memory.values.device())?;
        Ok(AttentionState {
            alignment: zeros.clone(),
            cumulative: zeros,
        })
    }

    /// One attention step. `query: [B, Q]` → (`context [B, E]`, next state).
    pub fn step(
        &self,
        query: &Tensor,
        memory: &ProcessedMemory,
        state: &AttentionState,
    ) -> Result<(Tensor, AttentionState)> {
        let processed_query = self.query_layer.forward(query)?.unsqueeze(1)?;
        let location = self
            .location_conv
            .forward(&state.cumulative.unsqueeze(1)?)? // [B, F, L]
            .transpose(1, 2)?
            .contiguous()?;
        let location = self.location_layer.forward(&location)?;

        let energy = memory
            .keys
            .broadcast_add(&processed_query)?
            .add(&location)?
            .tanh()?;
        let energy = self.v.forward(&energy)?.squeeze(2)?.add(&memory.bias)?;
        let alignment = candle_nn::ops::softmax(&energy, D::Minus1)?;

        let context = alignment.unsqueeze(1)?.matmul(&memory.values)?.squeeze(1)?;
        let cumulative = (&state.cumulative + &alignment)?;
        Ok((
            context,
            AttentionState {
                alignment,
                cumulative,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::layers::mask::sequence_mask;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_cfg() -> Tacotron2Config {
        Tacotron2Config {
            encoder_lstm_units: 3,
            attention_dim: 5,
            attention_filters: 4,
            attention_kernel: 3,
            ..Tacotron2Config::default()
        }
    }

    #[test]
    fn weights_sum_to_one_and_skip_padding() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = LocationSensitiveAttention::new(&small_cfg(), 7, vb.pp("attention")).unwrap();

        let memory = Tensor::randn(0f32, 1.0, (2, 4, 6), &device).unwrap();
        let mask = sequence_mask(&[4, 2], 4, &device).unwrap();
        let processed = attn.process_memory(&memory, &mask).unwrap();
        let mut state = attn.initial_state(&processed).unwrap();

        for _ in 0..3 {
            let query = Tensor::randn(0f32, 1.0, (2, 7), &device).unwrap();
            let (context, next) = attn.step(&query, &processed, &state).unwrap();
            assert_eq!(context.dims(), &[2, 6]);
            state = next;
        }

        let rows: Vec<Vec<f32>> = state.alignment.to_vec2().unwrap();
        for row in &rows {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sum = {sum}");
        }
        assert!(rows[1][2] < 1e-6 && rows[1][3] < 1e-6);

        let total: f32 = state.cumulative.sum_all().unwrap().to_scalar().unwrap();
        assert!((total - 6.0).abs() < 1e-4, "two rows over three steps, got {total}");
    }
}
