//! Convolutional postnet refining a predicted mel spectrogram.
//!
//! ```text
//! mel [B, T, n_mels] → transpose → n × (Conv1d → BatchNorm → tanh → Dropout)
//!                                   (last layer: no tanh, projects back to n_mels)
//!                    → transpose → residual [B, T, n_mels]
//! ```

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Dropout, VarBuilder};

use super::norm::BatchNorm1d;

/// Conv1d with `(kernel - 1) / 2` padding so the time axis is preserved.
pub fn same_conv1d(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    vb: VarBuilder,
) -> Result<Conv1d> {
    let cfg = Conv1dConfig {
        padding: (kernel_size - 1) / 2,
        ..Default::default()
    };
    candle_nn::conv1d(in_channels, out_channels, kernel_size, cfg, vb)
}

#[derive(Debug)]
struct ConvBatchNorm {
    conv: Conv1d,
    norm: BatchNorm1d,
}

#[derive(Debug)]
pub struct Postnet {
    layers: Vec<ConvBatchNorm>,
    dropout: Dropout,
}

impl Postnet {
    pub fn new(
        n_mels: usize,
        filters: usize,
        kernel_size: usize,
        n_layers: usize,
        dropout: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(n_layers);
        for i in 0..n_layers {
            let in_ch = if i == 0 { n_mels } else { filters };
            let out_ch = if i + 1 == n_layers { n_mels } else { filters };
            let vb = vb.pp(format!("conv_batch_norm.{i}"));
            layers.push(ConvBatchNorm {
                conv: same_conv1d(in_ch, out_ch, kernel_size, vb.pp("conv"))?,
                norm: BatchNorm1d::new(out_ch, vb.pp("batch_norm"))?,
            });
        }
        Ok(Self {
            layers,
            dropout: Dropout::new(dropout as f32),
        })
    }

    /// Returns the residual to add to `mel: [B, T, n_mels]`.
    pub fn forward(&self, mel: &Tensor, training: bool) -> Result<Tensor> {
        let mut xs = mel.transpose(1, 2)?.contiguous()?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.conv.forward(&xs)?;
            xs = layer.norm.forward(&xs, training)?;
            if i != last {
                xs = xs.tanh()?;
            }
            xs = self.dropout.forward(&xs, training)?;
        }
        xs.transpose(1, 2)?.contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn postnet_preserves_shape_and_trains_every_layer() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let postnet = Postnet::new(10, 16, 5, 3, 0.1, vb.pp("postnet")).unwrap();
        let mel = Tensor::rand(0f32, 1.0, (2, 9, 10), &device).unwrap();
        let residual = postnet.forward(&mel, true).unwrap();
        assert_eq!(residual.dims(), &[2, 9, 10]);

        let loss = residual.sqr().unwrap().mean_all().unwrap();
        let grads = loss.backward().unwrap();
        // conv weight + bias, bn gamma + beta, per layer
        assert_eq!(varmap.all_vars().len(), 3 * 4);
        for var in varmap.all_vars() {
            assert!(grads.get(var.as_tensor()).is_some());
        }
    }
}
