//! Fixture builders: config + fresh model + optimizer, bundled as a [`Trainer`].
//!
//! The `*_fixture` functions start from the default configs; the `*_fixture_with`
//! variants take a base config so tests can shrink the graph while the
//! harness-level parameters stay the same.

use candle_core::Device;

use crate::Result;
use crate::config::{FastSpeechConfig, Tacotron2Config, TrainingConfig};
use crate::model::fastspeech::FastSpeech;
use crate::model::tacotron2::Tacotron2;
use crate::train::Trainer;

/// Harness parameters for one FastSpeech smoke run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastSpeechParams {
    pub num_hidden_layers: usize,
    pub n_speakers: usize,
    pub batch_size: usize,
    pub input_length: usize,
    /// Ground-truth duration of every token.
    pub frames_per_token: usize,
}

impl FastSpeechParams {
    /// Batch of one, ten tokens, one frame per token.
    pub fn new(num_hidden_layers: usize, n_speakers: usize) -> Self {
        Self {
            num_hidden_layers,
            n_speakers,
            batch_size: 1,
            input_length: 10,
            frames_per_token: 1,
        }
    }

    /// Mel frames produced by the length regulator.
    pub fn output_length(&self) -> usize {
        self.input_length * self.frames_per_token
    }
}

/// Harness parameters for one Tacotron2 smoke run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tacotron2Params {
    pub n_speakers: usize,
    pub n_chars: usize,
    pub max_input_length: usize,
    pub max_mel_length: usize,
    pub batch_size: usize,
    /// Lower bound for sampled mel lengths; defaults to `max_mel_length`.
    pub min_mel_length: usize,
}

impl Tacotron2Params {
    pub fn new(
        n_speakers: usize,
        n_chars: usize,
        max_input_length: usize,
        max_mel_length: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            n_speakers,
            n_chars,
            max_input_length,
            max_mel_length,
            batch_size,
            min_mel_length: max_mel_length,
        }
    }

    pub fn with_min_mel_length(mut self, min_mel_length: usize) -> Self {
        self.min_mel_length = min_mel_length;
        self
    }
}

pub fn fastspeech_fixture(
    params: &FastSpeechParams,
    training: &TrainingConfig,
    device: &Device,
) -> Result<Trainer<FastSpeech>> {
    fastspeech_fixture_with(&FastSpeechConfig::default(), params, training, device)
}

/// FastSpeech fixture with `base` supplying every hyperparameter the params don't set.
pub fn fastspeech_fixture_with(
    base: &FastSpeechConfig,
    params: &FastSpeechParams,
    training: &TrainingConfig,
    device: &Device,
) -> Result<Trainer<FastSpeech>> {
    let config = base
        .clone()
        .with_num_hidden_layers(params.num_hidden_layers)
        .with_n_speakers(params.n_speakers);
    Trainer::new(training, *params, device, |vb| FastSpeech::new(&config, vb))
}

pub fn tacotron2_fixture(
    params: &Tacotron2Params,
    training: &TrainingConfig,
    device: &Device,
) -> Result<Trainer<Tacotron2>> {
    tacotron2_fixture_with(&Tacotron2Config::default(), params, training, device)
}

/// Tacotron2 fixture with `base` supplying the architecture. The reduction
/// factor is pinned to 1 so every mel length decodes.
pub fn tacotron2_fixture_with(
    base: &Tacotron2Config,
    params: &Tacotron2Params,
    training: &TrainingConfig,
    device: &Device,
) -> Result<Trainer<Tacotron2>> {
    let config = base
        .clone()
        .with_n_speakers(params.n_speakers)
        .with_reduction_factor(1);
    Trainer::new(training, *params, device, |vb| Tacotron2::new(&config, vb))
}
