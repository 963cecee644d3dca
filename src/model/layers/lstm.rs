//! LSTM cell and bidirectional sequence wrapper.
//!
//! Gate layout follows Keras: the fused projection yields `[i, f, g, o]`.

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::VarBuilder;

/// Hidden and cell state of one LSTM layer.
#[derive(Debug, Clone)]
pub struct LstmState {
    pub h: Tensor,
    pub c: Tensor,
}

/// Single LSTM layer stepped one timestep at a time.
#[derive(Debug, Clone)]
pub struct LstmCell {
    kernel: candle_nn::Linear,
    recurrent_kernel: candle_nn::Linear,
    units: usize,
}

impl LstmCell {
    pub fn new(input_size: usize, units: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            kernel: candle_nn::linear(input_size, 4 * units, vb.pp("kernel"))?,
            recurrent_kernel: candle_nn::linear_no_bias(
                units,
                4 * units,
                vb.pp("recurrent_kernel"),
            )?,
            units,
        })
    }

    pub fn zero_state(&self, batch: usize, dtype: DType, device: &Device) -> Result<LstmState> {
        let zeros = Tensor::zeros((batch, self.units), dtype, device)?;
        Ok(LstmState {
            h: zeros.clone(),
            c: zeros,
        })
    }

    /// Advance one step. `input`: `[B, input_size]`.
    pub fn step(&self, input: &Tensor, state: &LstmState) -> Result<LstmState> {
        let gates = (self.kernel.forward(input)? + self.recurrent_kernel.forward(&state.h)?)?;
        let chunks = gates
            .chunk(4, 1)?
            .into_iter()
            .map(|gate| gate.contiguous())
            .collect::<Result<Vec<_>>>()?;
        let i = candle_nn::ops::sigmoid(&chunks[0])?;
        let f = candle_nn::ops::sigmoid(&chunks[1])?;
        let g = chunks[2].tanh()?;
        let o = candle_nn::ops::sigmoid(&chunks[3])?;
        let c = ((f * &state.c)? + (i * g)?)?;
        let h = (o * c.tanh()?)?;
        Ok(LstmState { h, c })
    }
}

/// Bidirectional LSTM over `[B, T, C]`, concatenating both directions.
#[derive(Debug, Clone)]
pub struct BiLstm {
    forward: LstmCell,
    backward: LstmCell,
}

impl BiLstm {
    pub fn new(input_size: usize, units: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            forward: LstmCell::new(input_size, units, vb.pp("forward"))?,
            backward: LstmCell::new(input_size, units, vb.pp("backward"))?,
        })
    }

    /// Returns `[B, T, 2 * units]`.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        // [T, B, C] so each timestep is a contiguous row block
        let steps = xs.transpose(0, 1)?.contiguous()?;

        let mut state = self.forward.zero_state(batch, xs.dtype(), xs.device())?;
        let mut fwd = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            state = self.forward.step(&steps.get(t)?, &state)?;
            fwd.push(state.h.clone());
        }

        let mut state = self.backward.zero_state(batch, xs.dtype(), xs.device())?;
        let mut bwd = Vec::with_capacity(seq_len);
        for t in (0..seq_len).rev() {
            state = self.backward.step(&steps.get(t)?, &state)?;
            bwd.push(state.h.clone());
        }
        bwd.reverse();

        let fwd = Tensor::stack(&fwd, 1)?;
        let bwd = Tensor::stack(&bwd, 1)?;
        Tensor::cat(&[&fwd, &bwd], 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    #[test]
    fn cell_step_shapes_and_bounds() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cell = LstmCell::new(6, 5, vb.pp("cell")).unwrap();
        let state = cell.zero_state(3, DType::F32, &device).unwrap();
        let x = Tensor::randn(0f32, 1.0, (3, 6), &device).unwrap();
        let next = cell.step(&x, &state).unwrap();
        assert_eq!(next.h.dims(), &[3, 5]);
        assert_eq!(next.c.dims(), &[3, 5]);
        let max_h: f32 = next.h.abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(max_h < 1.0);
    }

    #[test]
    fn bilstm_concatenates_directions() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let lstm = BiLstm::new(4, 3, vb.pp("bilstm")).unwrap();
        let xs = Tensor::randn(0f32, 1.0, (2, 7, 4), &device).unwrap();
        let ys = lstm.forward(&xs).unwrap();
        assert_eq!(ys.dims(), &[2, 7, 6]);

        let loss = ys.sqr().unwrap().mean_all().unwrap();
        let grads = loss.backward().unwrap();
        for var in varmap.all_vars() {
            assert!(grads.get(var.as_tensor()).is_some());
        }
    }

    #[test]
    fn backward_direction_sees_future_at_first_step() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let lstm = BiLstm::new(2, 3, vb.pp("bilstm")).unwrap();
        let a = Tensor::randn(0f32, 1.0, (1, 4, 2), &device).unwrap();
        // Same prefix, different last step.
        let tail = Tensor::randn(0f32, 1.0, (1, 1, 2), &device).unwrap();
        let b = Tensor::cat(&[&a.narrow(1, 0, 3).unwrap(), &tail], 1).unwrap();
        let ya = lstm.forward(&a).unwrap();
        let yb = lstm.forward(&b).unwrap();
        // Forward half at t=0 is identical, backward half differs.
        let fwd_diff: f32 = (ya.narrow(2, 0, 3).unwrap().get(0).unwrap().get(0).unwrap()
            - yb.narrow(2, 0, 3).unwrap().get(0).unwrap().get(0).unwrap())
        .unwrap()
        .abs()
        .unwrap()
        .sum_all()
        .unwrap()
        .to_scalar()
        .unwrap();
        let bwd_diff: f32 = (ya.narrow(2, 3, 3).unwrap().get(0).unwrap().get(0).unwrap()
            - yb.narrow(2, 3, 3).unwrap().get(0).unwrap().get(0).unwrap())
        .unwrap()
        .abs()
        .unwrap()
        .sum_all()
        .unwrap()
        .to_scalar()
        .unwrap();
        assert!(fwd_diff < 1e-6);
        assert!(bwd_diff > 0.0);
    }
}
