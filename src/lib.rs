//! Trainable FastSpeech and Tacotron2 graphs in candle, with a smoke/timing
//! harness for single training steps.
//!
//! ## Flow
//!
//! ```text
//! fixture (config + model + optimizer) → synthetic batch
//!        → TimingHarness: step (warm-up, untimed) → step (timed) → TimingReport
//! ```
//!
//! ## Modules
//!
//! - [`config`] — serde hyperparameter structs with TensorFlowTTS defaults
//! - [`model`] — FastSpeech, Tacotron2 and shared layers
//! - [`fixture`] — build a [`Trainer`] from harness parameters
//! - [`synthetic`] — seeded placeholder batches and stop-token targets
//! - [`train`] — losses, the [`TrainableModel`] trait and the step executor
//! - [`harness`] — two-call timing harness

pub mod config;
pub mod fixture;
pub mod harness;
pub mod model;
pub mod synthetic;
pub mod train;

mod error;

pub use error::{Error, Result};
pub use fixture::{FastSpeechParams, Tacotron2Params};
pub use harness::{HarnessPhase, TimingHarness, TimingReport};
pub use train::{StepOutput, TrainableModel, Trainer};
