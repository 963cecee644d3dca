//! Model and training configuration.
//!
//! Defaults follow the TensorFlowTTS `FastSpeechConfig` / `Tacotron2Config`
//! values. Every config deserializes from JSON with missing fields falling
//! back to the defaults, and is checked by `validate()` before a model is built.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hidden activation used by the FastSpeech feed-forward convolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    Mish,
    Relu,
    Gelu,
}

// ---------------------------------------------------------------------------
// FastSpeech
// ---------------------------------------------------------------------------

/// FastSpeech (duration-based transformer acoustic model) hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FastSpeechConfig {
    // --- Embeddings ---
    pub vocab_size: usize,
    pub n_speakers: usize,
    pub max_position_embeddings: usize,
    pub initializer_range: f64,

    // --- FFT blocks (shared by encoder and decoder) ---
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub intermediate_kernel_size: usize,
    pub hidden_act: HiddenAct,
    pub hidden_dropout_prob: f64,
    pub attention_probs_dropout_prob: f64,
    pub layer_norm_eps: f64,

    // --- Duration predictor ---
    pub num_duration_conv_layers: usize,
    pub duration_predictor_filters: usize,
    pub duration_predictor_kernel_sizes: usize,
    pub duration_predictor_dropout_probs: f64,

    // --- Output ---
    pub num_mels: usize,
    pub n_conv_postnet: usize,
    pub postnet_conv_filters: usize,
    pub postnet_conv_kernel_sizes: usize,
    pub postnet_dropout_rate: f64,
}

impl Default for FastSpeechConfig {
    fn default() -> Self {
        Self {
            vocab_size: 149,
            n_speakers: 1,
            max_position_embeddings: 2048,
            initializer_range: 0.02,
            hidden_size: 384,
            num_hidden_layers: 4,
            num_attention_heads: 2,
            intermediate_size: 1536,
            intermediate_kernel_size: 3,
            hidden_act: HiddenAct::Mish,
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
            layer_norm_eps: 1e-5,
            num_duration_conv_layers: 2,
            duration_predictor_filters: 256,
            duration_predictor_kernel_sizes: 3,
            duration_predictor_dropout_probs: 0.1,
            num_mels: 80,
            n_conv_postnet: 5,
            postnet_conv_filters: 512,
            postnet_conv_kernel_sizes: 5,
            postnet_dropout_rate: 0.1,
        }
    }
}

impl FastSpeechConfig {
    pub fn with_num_hidden_layers(mut self, layers: usize) -> Self {
        self.num_hidden_layers = layers;
        self
    }

    pub fn with_n_speakers(mut self, n_speakers: usize) -> Self {
        self.n_speakers = n_speakers;
        self
    }

    /// Dimension of one attention head.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Check that the hyperparameters describe a buildable graph.
    pub fn validate(&self) -> Result<()> {
        check_positive("vocab_size", self.vocab_size)?;
        check_positive("n_speakers", self.n_speakers)?;
        check_positive("hidden_size", self.hidden_size)?;
        check_positive("num_hidden_layers", self.num_hidden_layers)?;
        check_positive("num_attention_heads", self.num_attention_heads)?;
        check_positive("intermediate_size", self.intermediate_size)?;
        check_positive("max_position_embeddings", self.max_position_embeddings)?;
        check_positive("duration_predictor_filters", self.duration_predictor_filters)?;
        check_positive("num_mels", self.num_mels)?;
        check_positive("n_conv_postnet", self.n_conv_postnet)?;
        check_positive("postnet_conv_filters", self.postnet_conv_filters)?;
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Config(format!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.hidden_size % 2 != 0 {
            return Err(Error::Config(format!(
                "hidden_size must be even for sinusoidal positions, got {}",
                self.hidden_size
            )));
        }
        check_kernel("intermediate_kernel_size", self.intermediate_kernel_size)?;
        check_kernel(
            "duration_predictor_kernel_sizes",
            self.duration_predictor_kernel_sizes,
        )?;
        check_kernel("postnet_conv_kernel_sizes", self.postnet_conv_kernel_sizes)?;
        check_dropout("hidden_dropout_prob", self.hidden_dropout_prob)?;
        check_dropout(
            "attention_probs_dropout_prob",
            self.attention_probs_dropout_prob,
        )?;
        check_dropout(
            "duration_predictor_dropout_probs",
            self.duration_predictor_dropout_probs,
        )?;
        check_dropout("postnet_dropout_rate", self.postnet_dropout_rate)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tacotron2
// ---------------------------------------------------------------------------

/// Tacotron2 (attention-based sequence-to-sequence acoustic model) hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tacotron2Config {
    // --- Embeddings ---
    pub vocab_size: usize,
    pub embedding_hidden_size: usize,
    pub initializer_range: f64,
    pub embedding_dropout_prob: f64,
    pub n_speakers: usize,

    // --- Encoder ---
    pub n_conv_encoder: usize,
    pub encoder_conv_filters: usize,
    pub encoder_conv_kernel_sizes: usize,
    pub encoder_conv_dropout_rate: f64,
    pub encoder_lstm_units: usize,

    // --- Decoder ---
    pub reduction_factor: usize,
    pub n_prenet_layers: usize,
    pub prenet_units: usize,
    pub prenet_dropout_rate: f64,
    pub decoder_lstm_units: usize,

    // --- Location-sensitive attention ---
    pub attention_dim: usize,
    pub attention_filters: usize,
    pub attention_kernel: usize,

    // --- Output ---
    pub n_mels: usize,
    pub n_conv_postnet: usize,
    pub postnet_conv_filters: usize,
    pub postnet_conv_kernel_sizes: usize,
    pub postnet_dropout_rate: f64,
}

impl Default for Tacotron2Config {
    fn default() -> Self {
        Self {
            vocab_size: 149,
            embedding_hidden_size: 512,
            initializer_range: 0.02,
            embedding_dropout_prob: 0.1,
            n_speakers: 5,
            n_conv_encoder: 5,
            encoder_conv_filters: 512,
            encoder_conv_kernel_sizes: 5,
            encoder_conv_dropout_rate: 0.5,
            encoder_lstm_units: 256,
            reduction_factor: 5,
            n_prenet_layers: 2,
            prenet_units: 256,
            prenet_dropout_rate: 0.5,
            decoder_lstm_units: 1024,
            attention_dim: 128,
            attention_filters: 32,
            attention_kernel: 31,
            n_mels: 80,
            n_conv_postnet: 5,
            postnet_conv_filters: 512,
            postnet_conv_kernel_sizes: 5,
            postnet_dropout_rate: 0.1,
        }
    }
}

impl Tacotron2Config {
    pub fn with_n_speakers(mut self, n_speakers: usize) -> Self {
        self.n_speakers = n_speakers;
        self
    }

    pub fn with_reduction_factor(mut self, reduction_factor: usize) -> Self {
        self.reduction_factor = reduction_factor;
        self
    }

    /// Width of the encoder output (both BiLSTM directions).
    pub fn encoder_output_size(&self) -> usize {
        2 * self.encoder_lstm_units
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Check that the hyperparameters describe a buildable graph.
    pub fn validate(&self) -> Result<()> {
        check_positive("vocab_size", self.vocab_size)?;
        check_positive("embedding_hidden_size", self.embedding_hidden_size)?;
        check_positive("n_speakers", self.n_speakers)?;
        check_positive("encoder_conv_filters", self.encoder_conv_filters)?;
        check_positive("encoder_lstm_units", self.encoder_lstm_units)?;
        check_positive("reduction_factor", self.reduction_factor)?;
        check_positive("n_prenet_layers", self.n_prenet_layers)?;
        check_positive("prenet_units", self.prenet_units)?;
        check_positive("decoder_lstm_units", self.decoder_lstm_units)?;
        check_positive("attention_dim", self.attention_dim)?;
        check_positive("attention_filters", self.attention_filters)?;
        check_positive("n_mels", self.n_mels)?;
        check_positive("n_conv_postnet", self.n_conv_postnet)?;
        check_positive("postnet_conv_filters", self.postnet_conv_filters)?;
        check_kernel("encoder_conv_kernel_sizes", self.encoder_conv_kernel_sizes)?;
        check_kernel("attention_kernel", self.attention_kernel)?;
        check_kernel("postnet_conv_kernel_sizes", self.postnet_conv_kernel_sizes)?;
        check_dropout("embedding_dropout_prob", self.embedding_dropout_prob)?;
        check_dropout("encoder_conv_dropout_rate", self.encoder_conv_dropout_rate)?;
        check_dropout("prenet_dropout_rate", self.prenet_dropout_rate)?;
        check_dropout("postnet_dropout_rate", self.postnet_dropout_rate)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// Optimizer settings and the seed for synthetic inputs.
///
/// `weight_decay = 0.0` makes the AdamW update a plain Adam update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            weight_decay: 0.0,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(Error::Config(format!("{name} must be in [0, 1), got {beta}")));
            }
        }
        if self.weight_decay < 0.0 {
            return Err(Error::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }

    pub(crate) fn adamw_params(&self) -> candle_nn::ParamsAdamW {
        candle_nn::ParamsAdamW {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.epsilon,
            weight_decay: self.weight_decay,
        }
    }
}

fn check_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{name} must be at least 1")));
    }
    Ok(())
}

/// Same-padding convolutions need an odd kernel.
fn check_kernel(name: &str, kernel: usize) -> Result<()> {
    if kernel == 0 || kernel % 2 == 0 {
        return Err(Error::Config(format!(
            "{name} must be a positive odd number, got {kernel}"
        )));
    }
    Ok(())
}

fn check_dropout(name: &str, p: f64) -> Result<()> {
    if !(0.0..1.0).contains(&p) {
        return Err(Error::Config(format!("{name} must be in [0, 1), got {p}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        FastSpeechConfig::default().validate().unwrap();
        Tacotron2Config::default().validate().unwrap();
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_speakers_rejected() {
        let cfg = FastSpeechConfig::default().with_n_speakers(0);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
        let cfg = Tacotron2Config::default().with_n_speakers(0);
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn heads_must_divide_hidden() {
        let cfg = FastSpeechConfig {
            hidden_size: 30,
            num_attention_heads: 4,
            ..FastSpeechConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("divisible"), "{err}");
    }

    #[test]
    fn even_kernel_rejected() {
        let cfg = Tacotron2Config {
            attention_kernel: 30,
            ..Tacotron2Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_reduction_factor_rejected() {
        let cfg = Tacotron2Config::default().with_reduction_factor(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg = FastSpeechConfig::from_json_str(
            r#"{"num_hidden_layers": 3, "n_speakers": 2, "hidden_act": "relu"}"#,
        )
        .unwrap();
        assert_eq!(cfg.num_hidden_layers, 3);
        assert_eq!(cfg.n_speakers, 2);
        assert_eq!(cfg.hidden_act, HiddenAct::Relu);
        assert_eq!(cfg.hidden_size, 384);
        assert_eq!(cfg.num_mels, 80);
    }

    #[test]
    fn tacotron_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tacotron2.json");
        let cfg = Tacotron2Config::default()
            .with_n_speakers(2)
            .with_reduction_factor(1);
        std::fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
        let loaded = Tacotron2Config::from_json_file(&path).unwrap();
        assert_eq!(loaded.n_speakers, 2);
        assert_eq!(loaded.reduction_factor, 1);
        assert_eq!(loaded.decoder_lstm_units, 1024);
    }

    #[test]
    fn missing_json_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrainingConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err}");
    }

    #[test]
    fn dropout_out_of_range_rejected() {
        let cfg = Tacotron2Config {
            prenet_dropout_rate: 1.0,
            ..Tacotron2Config::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("prenet_dropout_rate"), "{err}");
        let cfg = FastSpeechConfig {
            hidden_dropout_prob: -0.1,
            ..FastSpeechConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn beta_out_of_range_rejected() {
        let cfg = TrainingConfig {
            beta2: 1.0,
            ..TrainingConfig::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("beta2"), "{err}");
    }

    #[test]
    fn training_config_rejects_non_positive_lr() {
        let cfg = TrainingConfig::default().with_learning_rate(0.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn adamw_params_mirror_config() {
        let params = TrainingConfig::default().adamw_params();
        assert_eq!(params.lr, 1e-3);
        assert_eq!(params.weight_decay, 0.0);
    }
}
