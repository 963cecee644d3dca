//! Padding masks and additive attention biases.
//!
//! Masks are `[B, S]` float tensors with 1.0 for valid positions and 0.0 for
//! padding. Biases are additive: 0.0 where visible, a large negative value
//! where masked, so they can be added to logits before softmax.

use candle_core::{DType, Device, Result, Tensor};

/// Value added to masked logits. Large enough to vanish under softmax while
/// staying finite in f32.
pub const MASK_VALUE: f64 = -1e9;

/// Build a `[B, max_len]` mask from per-example valid lengths.
pub fn sequence_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; lengths.len() * max_len];
    for (b, &len) in lengths.iter().enumerate() {
        for t in 0..len.min(max_len) {
            data[b * max_len + t] = 1.0;
        }
    }
    Tensor::from_vec(data, (lengths.len(), max_len), device)
}

/// Turn a `[B, S]` mask into an additive bias of the same shape.
pub fn additive_bias(mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(DType::F32)?;
    (mask - 1.0)? * -MASK_VALUE
}

/// Additive self-attention bias `[B, 1, 1, S]` broadcastable over heads and queries.
pub fn attention_bias(mask: &Tensor) -> Result<Tensor> {
    additive_bias(mask)?.unsqueeze(1)?.unsqueeze(1)
}
