//! Tacotron2 objective: mel reconstruction before and after the postnet plus
//! the stop-token classifier. The alignment history rides along for logging.

use super::loss::{bce_with_logits, mse};
use super::{LossTerm, StepLosses, TrainableModel};
use crate::fixture::Tacotron2Params;
use crate::model::tacotron2::Tacotron2;
use crate::synthetic::{NUM_MELS, Tacotron2Batch};
use crate::{Error, Result};

impl TrainableModel for Tacotron2 {
    type Batch = Tacotron2Batch;
    type Params = Tacotron2Params;

    fn name(&self) -> &'static str {
        "tacotron2"
    }

    fn validate_batch(&self, batch: &Tacotron2Batch, params: &Tacotron2Params) -> Result<()> {
        batch.validate(params)?;
        if params.n_chars > self.config().vocab_size {
            return Err(Error::Shape(format!(
                "n_chars {} exceeds vocab_size {}",
                params.n_chars,
                self.config().vocab_size
            )));
        }
        if self.config().n_mels != NUM_MELS {
            return Err(Error::Shape(format!(
                "model predicts {} mel bands, batches carry {NUM_MELS}",
                self.config().n_mels
            )));
        }
        Ok(())
    }

    fn losses(&self, batch: &Tacotron2Batch, training: bool) -> Result<StepLosses> {
        let out = self.forward(
            &batch.input_ids,
            &batch.input_lengths,
            &batch.speaker_ids,
            &batch.mel_gts,
            &batch.mel_lengths,
            training,
        )?;
        let frames = out.mel_before.dim(1)?;
        let mel_gts = batch.mel_gts.narrow(1, 0, frames)?;
        Ok(StepLosses::new(vec![
            LossTerm {
                name: "mel_loss_before",
                value: mse(&mel_gts, &out.mel_before)?,
            },
            LossTerm {
                name: "mel_loss_after",
                value: mse(&mel_gts, &out.mel_after)?,
            },
            LossTerm {
                name: "stop_token_loss",
                value: bce_with_logits(&batch.stop_token_gts, &out.stop_logits)?,
            },
        ])
        .with_alignment(out.alignment_history))
    }
}
