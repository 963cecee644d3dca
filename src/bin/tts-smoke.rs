//! Smoke-test one training step of FastSpeech or Tacotron2.
//!
//! Builds a fresh model, generates a synthetic batch, runs the step twice and
//! times the second call. Prints a one-line JSON summary to stdout:
//!
//! ```json
//! {"model":"fastspeech","loss":1.93,"elapsed_ms":412.7,"parameters":23145041,...}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tts_trainable::config::{FastSpeechConfig, Tacotron2Config, TrainingConfig};
use tts_trainable::fixture::{fastspeech_fixture_with, tacotron2_fixture_with};
use tts_trainable::synthetic::SyntheticInputs;
use tts_trainable::{FastSpeechParams, Tacotron2Params, TimingHarness};

#[derive(Parser, Debug)]
#[command(
    name = "tts-smoke",
    about = "Time one training step of a TTS acoustic model on synthetic data"
)]
struct Args {
    /// Run on CUDA device 0 when available (default: CPU).
    #[arg(long, global = true)]
    cuda: bool,

    /// Seed for the synthetic batch.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// JSON file with model hyperparameters overriding the defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON file with optimizer settings.
    #[arg(long, global = true)]
    training_config: Option<PathBuf>,

    #[command(subcommand)]
    model: ModelCommand,
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    /// FastSpeech with a batch of one ten-token utterance.
    Fastspeech {
        #[arg(long, default_value_t = 4)]
        layers: usize,
        #[arg(long, default_value_t = 1)]
        speakers: usize,
    },
    /// Tacotron2 with teacher forcing and reduction factor 1.
    Tacotron2 {
        #[arg(long, default_value_t = 2)]
        speakers: usize,
        #[arg(long, default_value_t = 15)]
        chars: usize,
        #[arg(long, default_value_t = 25)]
        max_input_length: usize,
        #[arg(long, default_value_t = 50)]
        max_mel_length: usize,
        #[arg(long, default_value_t = 2)]
        batch_size: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let device = if args.cuda {
        candle_core::Device::cuda_if_available(0)?
    } else {
        candle_core::Device::Cpu
    };
    tracing::info!("Using device: {:?}", device);

    let mut training = match &args.training_config {
        Some(path) => TrainingConfig::from_json_file(path)?,
        None => TrainingConfig::default(),
    };
    if let Some(seed) = args.seed {
        training = training.with_seed(seed);
    }
    let mut inputs = SyntheticInputs::new(training.seed, &device);
    let mut harness = TimingHarness::new();

    let (report, parameters) = match args.model {
        ModelCommand::Fastspeech { layers, speakers } => {
            let base = match &args.config {
                Some(path) => FastSpeechConfig::from_json_file(path)?,
                None => FastSpeechConfig::default(),
            };
            let params = FastSpeechParams::new(layers, speakers);
            let mut trainer = fastspeech_fixture_with(&base, &params, &training, &device)
                .map_err(|e| anyhow::anyhow!("failed to build FastSpeech: {e}"))?;
            let batch = inputs.fastspeech(&params)?;
            let report = harness
                .run(&mut trainer, &batch)
                .map_err(|e| anyhow::anyhow!("training step failed: {e}"))?;
            (report, trainer.num_parameters())
        }
        ModelCommand::Tacotron2 {
            speakers,
            chars,
            max_input_length,
            max_mel_length,
            batch_size,
        } => {
            let base = match &args.config {
                Some(path) => Tacotron2Config::from_json_file(path)?,
                None => Tacotron2Config::default(),
            };
            let params =
                Tacotron2Params::new(speakers, chars, max_input_length, max_mel_length, batch_size)
                    .with_min_mel_length(1);
            let mut trainer = tacotron2_fixture_with(&base, &params, &training, &device)
                .map_err(|e| anyhow::anyhow!("failed to build Tacotron2: {e}"))?;
            let batch = inputs.tacotron2(&params)?;
            let report = harness
                .run(&mut trainer, &batch)
                .map_err(|e| anyhow::anyhow!("training step failed: {e}"))?;
            (report, trainer.num_parameters())
        }
    };

    let mut summary = report.summary_json();
    summary["parameters"] = serde_json::json!(parameters);
    println!("{summary}");

    Ok(())
}
