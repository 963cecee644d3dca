//! Seeded placeholder batches for training-step smoke tests.
//!
//! Values carry no meaning beyond having the right shape, dtype and range.
//! A [`SyntheticInputs`] generator owns a `ChaCha8Rng`, so two generators built
//! from the same seed produce identical batches.

use candle_core::{DType, Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::fixture::{FastSpeechParams, Tacotron2Params};
use crate::{Error, Result};

/// Mel bands in every synthetic target.
pub const NUM_MELS: usize = 80;

/// Stop targets for a batch of valid mel lengths.
///
/// Row `b` has `max(lengths)` entries: `1.0` at every frame `t >= lengths[b] - 1`
/// and `0.0` before it.
pub fn stop_token_targets(lengths: &[usize]) -> Vec<Vec<f32>> {
    let max_len = lengths.iter().copied().max().unwrap_or(0);
    lengths
        .iter()
        .map(|&len| {
            (0..max_len)
                .map(|t| if t + 1 >= len { 1.0 } else { 0.0 })
                .collect()
        })
        .collect()
}

/// [`stop_token_targets`] as a `[B, max(lengths)]` f32 tensor.
pub fn stop_token_tensor(lengths: &[usize], device: &Device) -> Result<Tensor> {
    let rows = stop_token_targets(lengths);
    let width = rows.first().map_or(0, Vec::len);
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Tensor::from_vec(flat, (lengths.len(), width), device)?)
}

#[derive(Debug, Clone)]
pub struct FastSpeechBatch {
    /// `[B, L]` u32, `1..=L` per row.
    pub input_ids: Tensor,
    /// `[B, L]` u32, all ones.
    pub attention_mask: Tensor,
    /// `[B]` u32, all zeros.
    pub speaker_ids: Tensor,
    /// `[B, L]` u32, all `frames_per_token`.
    pub duration_gts: Tensor,
    /// `[B, L * frames_per_token, 80]` f32 in `[0, 1)`.
    pub mel_gts: Tensor,
}

impl FastSpeechBatch {
    /// Check every tensor against the shapes `params` declares.
    pub fn validate(&self, params: &FastSpeechParams) -> Result<()> {
        let (b, l) = (params.batch_size, params.input_length);
        check_dims("input_ids", &self.input_ids, &[b, l])?;
        check_dims("attention_mask", &self.attention_mask, &[b, l])?;
        check_dims("speaker_ids", &self.speaker_ids, &[b])?;
        check_dims("duration_gts", &self.duration_gts, &[b, l])?;
        check_dims("mel_gts", &self.mel_gts, &[b, params.output_length(), NUM_MELS])?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Tacotron2Batch {
    /// `[B, L]` u32 in `[0, n_chars)`.
    pub input_ids: Tensor,
    /// `[B]` u32, all `L`.
    pub input_lengths: Tensor,
    /// `[B]` u32, all zeros.
    pub speaker_ids: Tensor,
    /// `[B, T, 80]` f32 in `[0, 1)`.
    pub mel_gts: Tensor,
    /// `[B]` u32 in `[min_mel_length, T]`, last entry `T`.
    pub mel_lengths: Tensor,
    /// `[B, max(mel_lengths)]` f32.
    pub stop_token_gts: Tensor,
}

impl Tacotron2Batch {
    /// Valid mel lengths copied to the host.
    pub fn mel_lengths(&self) -> Result<Vec<usize>> {
        let lengths: Vec<u32> = self.mel_lengths.to_vec1()?;
        Ok(lengths.into_iter().map(|len| len as usize).collect())
    }

    pub fn validate(&self, params: &Tacotron2Params) -> Result<()> {
        let (b, l, t) = (
            params.batch_size,
            params.max_input_length,
            params.max_mel_length,
        );
        check_dims("input_ids", &self.input_ids, &[b, l])?;
        check_dims("input_lengths", &self.input_lengths, &[b])?;
        check_dims("speaker_ids", &self.speaker_ids, &[b])?;
        check_dims("mel_gts", &self.mel_gts, &[b, t, NUM_MELS])?;
        check_dims("mel_lengths", &self.mel_lengths, &[b])?;

        let lengths = self.mel_lengths()?;
        if let Some(&bad) = lengths.iter().find(|&&len| len == 0 || len > t) {
            return Err(Error::Shape(format!(
                "mel_lengths: {bad} outside 1..={t}"
            )));
        }
        let max_len = lengths.iter().copied().max().unwrap_or(0);
        check_dims("stop_token_gts", &self.stop_token_gts, &[b, max_len])?;
        let ids: Vec<u32> = self.input_ids.flatten_all()?.to_vec1()?;
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= params.n_chars) {
            return Err(Error::Shape(format!(
                "input_ids: id {bad} outside vocabulary of {}",
                params.n_chars
            )));
        }
        Ok(())
    }
}

fn check_dims(what: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() != expected {
        return Err(Error::shape(what, expected, tensor.dims()));
    }
    Ok(())
}

/// Deterministic batch generator.
#[derive(Debug)]
pub struct SyntheticInputs {
    rng: ChaCha8Rng,
    device: Device,
}

impl SyntheticInputs {
    pub fn new(seed: u64, device: &Device) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            device: device.clone(),
        }
    }

    fn uniform_mel(&mut self, batch: usize, frames: usize) -> Result<Tensor> {
        let data: Vec<f32> = (0..batch * frames * NUM_MELS)
            .map(|_| self.rng.random::<f32>())
            .collect();
        Ok(Tensor::from_vec(data, (batch, frames, NUM_MELS), &self.device)?)
    }

    pub fn fastspeech(&mut self, params: &FastSpeechParams) -> Result<FastSpeechBatch> {
        let (b, l) = (params.batch_size, params.input_length);
        let ids: Vec<u32> = (0..b).flat_map(|_| 1..=l as u32).collect();
        let batch = FastSpeechBatch {
            input_ids: Tensor::from_vec(ids, (b, l), &self.device)?,
            attention_mask: Tensor::ones((b, l), DType::U32, &self.device)?,
            speaker_ids: Tensor::zeros(b, DType::U32, &self.device)?,
            duration_gts: Tensor::full(params.frames_per_token as u32, (b, l), &self.device)?,
            mel_gts: self.uniform_mel(b, params.output_length())?,
        };
        tracing::debug!(
            batch = b,
            input_length = l,
            frames = params.output_length(),
            "synthetic FastSpeech batch"
        );
        Ok(batch)
    }

    pub fn tacotron2(&mut self, params: &Tacotron2Params) -> Result<Tacotron2Batch> {
        let (b, l, t) = (
            params.batch_size,
            params.max_input_length,
            params.max_mel_length,
        );
        if params.n_chars == 0 {
            return Err(Error::Config("n_chars must be at least 1".into()));
        }
        let min = params.min_mel_length;
        if min == 0 || min > t {
            return Err(Error::Config(format!(
                "min_mel_length {min} must be in 1..={t}"
            )));
        }

        let ids: Vec<u32> = (0..b * l)
            .map(|_| self.rng.random_range(0..params.n_chars) as u32)
            .collect();
        let mut mel_lengths: Vec<usize> = (0..b).map(|_| self.rng.random_range(min..=t)).collect();
        if let Some(last) = mel_lengths.last_mut() {
            *last = t;
        }
        let lengths_u32: Vec<u32> = mel_lengths.iter().map(|&len| len as u32).collect();

        let batch = Tacotron2Batch {
            input_ids: Tensor::from_vec(ids, (b, l), &self.device)?,
            input_lengths: Tensor::full(l as u32, b, &self.device)?,
            speaker_ids: Tensor::zeros(b, DType::U32, &self.device)?,
            mel_gts: self.uniform_mel(b, t)?,
            mel_lengths: Tensor::from_vec(lengths_u32, b, &self.device)?,
            stop_token_gts: stop_token_tensor(&mel_lengths, &self.device)?,
        };
        tracing::debug!(batch = b, input_length = l, ?mel_lengths, "synthetic Tacotron2 batch");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_targets_switch_on_at_last_valid_frame() {
        let targets = stop_token_targets(&[3, 5, 1]);
        assert_eq!(targets[0], vec![0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(targets[1], vec![0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(targets[2], vec![1.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn stop_targets_empty_batch() {
        assert!(stop_token_targets(&[]).is_empty());
    }

    #[test]
    fn fastspeech_batch_contents() {
        let params = FastSpeechParams::new(2, 1);
        let mut inputs = SyntheticInputs::new(7, &Device::Cpu);
        let batch = inputs.fastspeech(&params).unwrap();
        batch.validate(&params).unwrap();

        let ids: Vec<Vec<u32>> = batch.input_ids.to_vec2().unwrap();
        assert_eq!(ids[0], (1..=10).collect::<Vec<u32>>());
        let durations: Vec<Vec<u32>> = batch.duration_gts.to_vec2().unwrap();
        assert!(durations[0].iter().all(|&d| d == 1));
        let max: f32 = batch.mel_gts.max_all().unwrap().to_scalar().unwrap();
        let min: f32 = batch.mel_gts.min_all().unwrap().to_scalar().unwrap();
        assert!((0.0..1.0).contains(&min) && max < 1.0);
    }

    #[test]
    fn frames_per_token_scales_mel_length() {
        let params = FastSpeechParams {
            frames_per_token: 3,
            batch_size: 2,
            ..FastSpeechParams::new(2, 1)
        };
        let batch = SyntheticInputs::new(0, &Device::Cpu).fastspeech(&params).unwrap();
        assert_eq!(batch.mel_gts.dims(), &[2, 30, NUM_MELS]);
        batch.validate(&params).unwrap();
    }

    #[test]
    fn tacotron2_batch_contents() {
        let params = Tacotron2Params::new(2, 15, 25, 50, 2).with_min_mel_length(10);
        let batch = SyntheticInputs::new(42, &Device::Cpu)
            .tacotron2(&params)
            .unwrap();
        batch.validate(&params).unwrap();

        let lengths = batch.mel_lengths().unwrap();
        assert_eq!(*lengths.last().unwrap(), 50);
        assert!(lengths.iter().all(|&len| (10..=50).contains(&len)));

        let stops: Vec<Vec<f32>> = batch.stop_token_gts.to_vec2().unwrap();
        for (row, &len) in stops.iter().zip(&lengths) {
            for (t, &value) in row.iter().enumerate() {
                let expected = if t >= len - 1 { 1.0 } else { 0.0 };
                assert_eq!(value, expected, "len {len}, t {t}");
            }
        }
    }

    #[test]
    fn same_seed_same_batch() {
        let params = Tacotron2Params::new(2, 15, 25, 50, 2).with_min_mel_length(1);
        let a = SyntheticInputs::new(3, &Device::Cpu).tacotron2(&params).unwrap();
        let b = SyntheticInputs::new(3, &Device::Cpu).tacotron2(&params).unwrap();
        assert_eq!(a.mel_lengths().unwrap(), b.mel_lengths().unwrap());
        let ids_a: Vec<Vec<u32>> = a.input_ids.to_vec2().unwrap();
        let ids_b: Vec<Vec<u32>> = b.input_ids.to_vec2().unwrap();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn validate_reports_wrong_shape() {
        let params = FastSpeechParams::new(2, 1);
        let mut batch = SyntheticInputs::new(1, &Device::Cpu).fastspeech(&params).unwrap();
        batch.mel_gts = batch.mel_gts.narrow(1, 0, 9).unwrap();
        let err = batch.validate(&params).unwrap_err();
        assert!(matches!(err, Error::Shape(ref msg) if msg.contains("mel_gts")), "{err}");
    }

    #[test]
    fn degenerate_tacotron_params_are_errors() {
        let mut inputs = SyntheticInputs::new(1, &Device::Cpu);
        let no_chars = Tacotron2Params::new(1, 0, 4, 4, 1);
        assert!(matches!(inputs.tacotron2(&no_chars), Err(Error::Config(_))));
        let inverted = Tacotron2Params::new(1, 5, 4, 4, 1).with_min_mel_length(9);
        assert!(matches!(inputs.tacotron2(&inverted), Err(Error::Config(_))));
    }
}
