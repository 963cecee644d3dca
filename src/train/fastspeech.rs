//! FastSpeech objective: duration regression plus mel reconstruction before
//! and after the postnet.

use candle_core::DType;

use super::loss::mse;
use super::{LossTerm, StepLosses, TrainableModel};
use crate::fixture::FastSpeechParams;
use crate::model::fastspeech::FastSpeech;
use crate::synthetic::{FastSpeechBatch, NUM_MELS};
use crate::{Error, Result};

impl TrainableModel for FastSpeech {
    type Batch = FastSpeechBatch;
    type Params = FastSpeechParams;

    fn name(&self) -> &'static str {
        "fastspeech"
    }

    fn validate_batch(&self, batch: &FastSpeechBatch, params: &FastSpeechParams) -> Result<()> {
        batch.validate(params)?;
        if self.config().num_mels != NUM_MELS {
            return Err(Error::Shape(format!(
                "model predicts {} mel bands, batches carry {NUM_MELS}",
                self.config().num_mels
            )));
        }
        Ok(())
    }

    fn losses(&self, batch: &FastSpeechBatch, training: bool) -> Result<StepLosses> {
        let out = self.forward(
            &batch.input_ids,
            &batch.attention_mask,
            &batch.speaker_ids,
            &batch.duration_gts,
            training,
        )?;
        let duration_gts = batch.duration_gts.to_dtype(DType::F32)?;
        Ok(StepLosses::new(vec![
            LossTerm {
                name: "duration_loss",
                value: mse(&duration_gts, &out.duration_outputs)?,
            },
            LossTerm {
                name: "mel_loss_before",
                value: mse(&batch.mel_gts, &out.mel_before)?,
            },
            LossTerm {
                name: "mel_loss_after",
                value: mse(&batch.mel_gts, &out.mel_after)?,
            },
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FastSpeechConfig, TrainingConfig};
    use crate::fixture::fastspeech_fixture_with;
    use crate::synthetic::SyntheticInputs;
    use candle_core::Device;

    fn small_base() -> FastSpeechConfig {
        FastSpeechConfig {
            hidden_size: 32,
            intermediate_size: 48,
            duration_predictor_filters: 16,
            postnet_conv_filters: 16,
            n_conv_postnet: 2,
            ..FastSpeechConfig::default()
        }
    }

    #[test]
    fn step_reports_three_named_terms() {
        let device = Device::Cpu;
        let params = FastSpeechParams::new(2, 2);
        let mut trainer =
            fastspeech_fixture_with(&small_base(), &params, &TrainingConfig::default(), &device)
                .unwrap();
        let batch = SyntheticInputs::new(0, &device).fastspeech(&params).unwrap();
        let out = trainer.step(&batch).unwrap();
        let names: Vec<&str> = out.losses.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["duration_loss", "mel_loss_before", "mel_loss_after"]);
        let sum: f32 = out.losses.iter().map(|(_, v)| v).sum();
        assert!((sum - out.loss).abs() < 1e-4);
    }

    #[test]
    fn longer_durations_train() {
        let device = Device::Cpu;
        let params = FastSpeechParams {
            frames_per_token: 2,
            batch_size: 2,
            ..FastSpeechParams::new(1, 1)
        };
        let mut trainer =
            fastspeech_fixture_with(&small_base(), &params, &TrainingConfig::default(), &device)
                .unwrap();
        let batch = SyntheticInputs::new(5, &device).fastspeech(&params).unwrap();
        assert!(trainer.step(&batch).unwrap().loss.is_finite());
    }

    #[test]
    fn mel_band_mismatch_is_rejected_before_forward() {
        let device = Device::Cpu;
        let base = FastSpeechConfig {
            num_mels: 40,
            ..small_base()
        };
        let params = FastSpeechParams::new(1, 1);
        let mut trainer =
            fastspeech_fixture_with(&base, &params, &TrainingConfig::default(), &device).unwrap();
        let batch = SyntheticInputs::new(0, &device).fastspeech(&params).unwrap();
        let err = trainer.step(&batch).unwrap_err();
        assert!(matches!(err, Error::Shape(ref msg) if msg.contains("mel bands")), "{err}");
        assert_eq!(trainer.steps_taken(), 0);
    }
}
