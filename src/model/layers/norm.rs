//! Normalization layers.
//!
//! Both are written with primitive tensor ops so gradients flow through them;
//! the fused candle kernels have no backward pass.

use std::sync::{Mutex, PoisonError};

use candle_core::{D, Result, Tensor};
use candle_nn::{Init, VarBuilder};

/// Layer normalization over the last dimension with learned scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    gamma: Tensor,
    beta: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gamma: vb.get_with_hints(size, "gamma", Init::Const(1.0))?,
            beta: vb.get_with_hints(size, "beta", Init::Const(0.0))?,
            eps,
        })
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.gamma)?.broadcast_add(&self.beta)
    }
}

#[derive(Debug)]
struct RunningStats {
    mean: Tensor,
    var: Tensor,
}

/// Batch normalization over the channel axis of `[B, C, T]` inputs.
///
/// Scale and shift are trainable. Running statistics are plain tensors updated
/// from detached batch statistics, so they never enter the optimizer.
#[derive(Debug)]
pub struct BatchNorm1d {
    gamma: Tensor,
    beta: Tensor,
    running: Mutex<RunningStats>,
    momentum: f64,
    eps: f64,
}

impl BatchNorm1d {
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let device = vb.device().clone();
        let dtype = vb.dtype();
        Ok(Self {
            gamma: vb.get_with_hints(channels, "gamma", Init::Const(1.0))?,
            beta: vb.get_with_hints(channels, "beta", Init::Const(0.0))?,
            running: Mutex::new(RunningStats {
                mean: Tensor::zeros((1, channels, 1), dtype, &device)?,
                var: Tensor::ones((1, channels, 1), dtype, &device)?,
            }),
            momentum: 0.99,
            eps: 1e-3,
        })
    }

    /// Normalize `xs: [B, C, T]`. Training mode uses batch statistics and
    /// folds them into the running averages; inference uses the averages.
    pub fn forward(&self, xs: &Tensor, training: bool) -> Result<Tensor> {
        let channels = self.gamma.dim(0)?;
        let (mean, var) = if training {
            let mean = xs.mean_keepdim(2)?.mean_keepdim(0)?;
            let var = xs
                .broadcast_sub(&mean)?
                .sqr()?
                .mean_keepdim(2)?
                .mean_keepdim(0)?;
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            running.mean = ((&running.mean * self.momentum)?
                + (mean.detach() * (1.0 - self.momentum))?)?;
            running.var = ((&running.var * self.momentum)?
                + (var.detach() * (1.0 - self.momentum))?)?;
            (mean, var)
        } else {
            let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            (running.mean.clone(), running.var.clone())
        };
        let normed = xs
            .broadcast_sub(&mean)?
            .broadcast_div(&(var + self.eps)?.sqrt()?)?;
        normed
            .broadcast_mul(&self.gamma.reshape((1, channels, 1))?)?
            .broadcast_add(&self.beta.reshape((1, channels, 1))?)
    }
}
