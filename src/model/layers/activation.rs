//! Activations composed from differentiable primitive ops.

use candle_core::{Result, Tensor};

use crate::config::HiddenAct;

/// `log(1 + exp(x))`, computed as `relu(x) + log(1 + exp(-|x|))` so large
/// inputs do not overflow.
pub fn softplus(xs: &Tensor) -> Result<Tensor> {
    let tail = (xs.abs()?.neg()?.exp()? + 1.0)?.log()?;
    xs.relu()? + tail
}

/// Mish: `x * tanh(softplus(x))`.
pub fn mish(xs: &Tensor) -> Result<Tensor> {
    xs * softplus(xs)?.tanh()?
}

impl HiddenAct {
    pub fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            HiddenAct::Mish => mish(xs),
            HiddenAct::Relu => xs.relu(),
            HiddenAct::Gelu => xs.gelu(),
        }
    }
}
