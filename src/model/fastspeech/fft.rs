//! Feed-forward Transformer (FFT) blocks.
//!
//! Each block is post-norm:
//!
//! ```text
//! h = LayerNorm(x + Dropout(SelfAttention(x)))
//! y = LayerNorm(h + Dropout(Conv1d(act(Conv1d(h)))))
//! y = y * mask
//! ```

use candle_core::{D, Module, Result, Tensor};
use candle_nn::{Conv1d, Dropout, VarBuilder};

use crate::config::{FastSpeechConfig, HiddenAct};
use crate::model::layers::LayerNorm;
use crate::model::layers::mask::attention_bias;
use crate::model::layers::postnet::same_conv1d;

/// Multi-head scaled dot-product self-attention with output projection.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    query: candle_nn::Linear,
    key: candle_nn::Linear,
    value: candle_nn::Linear,
    output: candle_nn::Linear,
    layer_norm: LayerNorm,
    attention_dropout: Dropout,
    hidden_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    pub fn new(cfg: &FastSpeechConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = cfg.hidden_size;
        Ok(Self {
            query: candle_nn::linear(hidden, hidden, vb.pp("query"))?,
            key: candle_nn::linear(hidden, hidden, vb.pp("key"))?,
            value: candle_nn::linear(hidden, hidden, vb.pp("value"))?,
            output: candle_nn::linear(hidden, hidden, vb.pp("output.dense"))?,
            layer_norm: LayerNorm::new(hidden, cfg.layer_norm_eps, vb.pp("output.layer_norm"))?,
            attention_dropout: Dropout::new(cfg.attention_probs_dropout_prob as f32),
            hidden_dropout: Dropout::new(cfg.hidden_dropout_prob as f32),
            num_heads: cfg.num_attention_heads,
            head_dim: cfg.head_dim(),
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        xs.reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// - `hidden_states`: `[B, S, D]`
    /// - `bias`: additive `[B, 1, 1, S]`
    pub fn forward(&self, hidden_states: &Tensor, bias: &Tensor, training: bool) -> Result<Tensor> {
        let (batch, seq_len, hidden) = hidden_states.dims3()?;

        let q = self.split_heads(&self.query.forward(hidden_states)?)?;
        let k = self.split_heads(&self.key.forward(hidden_states)?)?;
        let v = self.split_heads(&self.value.forward(hidden_states)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? / scale)?.broadcast_add(bias)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let probs = self.attention_dropout.forward(&probs, training)?;

        let context = probs
            .matmul(&v)? // [B, H, S, Dh]
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden))?;

        let out = self.output.forward(&context)?;
        let out = self.hidden_dropout.forward(&out, training)?;
        self.layer_norm.forward(&(out + hidden_states)?)
    }
}

/// Two same-padded 1-D convolutions with an activation in between.
#[derive(Debug, Clone)]
pub struct ConvFeedForward {
    conv1: Conv1d,
    conv2: Conv1d,
    act: HiddenAct,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl ConvFeedForward {
    pub fn new(cfg: &FastSpeechConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            conv1: same_conv1d(
                cfg.hidden_size,
                cfg.intermediate_size,
                cfg.intermediate_kernel_size,
                vb.pp("conv1d_1"),
            )?,
            conv2: same_conv1d(
                cfg.intermediate_size,
                cfg.hidden_size,
                cfg.intermediate_kernel_size,
                vb.pp("conv1d_2"),
            )?,
            act: cfg.hidden_act,
            layer_norm: LayerNorm::new(cfg.hidden_size, cfg.layer_norm_eps, vb.pp("layer_norm"))?,
            dropout: Dropout::new(cfg.hidden_dropout_prob as f32),
        })
    }

    /// `hidden_states: [B, S, D]` → `[B, S, D]`.
    pub fn forward(&self, hidden_states: &Tensor, training: bool) -> Result<Tensor> {
        let xs = hidden_states.transpose(1, 2)?.contiguous()?;
        let xs = self.act.apply(&self.conv1.forward(&xs)?)?;
        let xs = self.conv2.forward(&xs)?.transpose(1, 2)?.contiguous()?;
        let xs = self.dropout.forward(&xs, training)?;
        self.layer_norm.forward(&(xs + hidden_states)?)
    }
}

#[derive(Debug, Clone)]
pub struct FftBlock {
    attention: SelfAttention,
    feed_forward: ConvFeedForward,
}

impl FftBlock {
    pub fn new(cfg: &FastSpeechConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attention: SelfAttention::new(cfg, vb.pp("attention"))?,
            feed_forward: ConvFeedForward::new(cfg, vb.pp("intermediate"))?,
        })
    }

    /// - `hidden_states`: `[B, S, D]`
    /// - `bias`: additive `[B, 1, 1, S]`
    /// - `mask`: `[B, S, 1]` float mask
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        bias: &Tensor,
        mask: &Tensor,
        training: bool,
    ) -> Result<Tensor> {
        let h = self.attention.forward(hidden_states, bias, training)?;
        let h = self.feed_forward.forward(&h, training)?;
        h.broadcast_mul(mask)
    }
}

/// Stack of `num_hidden_layers` FFT blocks (used as both encoder and decoder).
#[derive(Debug, Clone)]
pub struct FftStack {
    blocks: Vec<FftBlock>,
}

impl FftStack {
    pub fn new(cfg: &FastSpeechConfig, vb: VarBuilder) -> Result<Self> {
        let blocks = (0..cfg.num_hidden_layers)
            .map(|i| FftBlock::new(cfg, vb.pp(format!("layer_._{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    /// - `hidden_states`: `[B, S, D]`
    /// - `mask`: `[B, S]` float (1 = valid)
    pub fn forward(&self, hidden_states: &Tensor, mask: &Tensor, training: bool) -> Result<Tensor> {
        let bias = attention_bias(mask)?;
        let mask = mask.unsqueeze(2)?;
        let mut h = hidden_states.clone();
        for block in &self.blocks {
            h = block.forward(&h, &bias, &mask, training)?;
        }
        Ok(h)
    }
}
