//! Two-call timing harness.
//!
//! The step runs exactly twice. The first call is a warm-up and is never
//! timed; wall-clock time is taken around the second call only. A harness is
//! single use: once it leaves [`HarnessPhase::Uninitialized`] it cannot run
//! again.

use std::time::{Duration, Instant};

use serde_json::json;

use crate::train::{StepOutput, TrainableModel, Trainer};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessPhase {
    Uninitialized,
    WarmedUp,
    Measured,
    Done,
}

/// Outcome of one harness run.
#[derive(Debug, Clone)]
pub struct TimingReport {
    pub model: &'static str,
    pub warmup: StepOutput,
    pub measured: StepOutput,
    /// Wall-clock time of the second call.
    pub elapsed: Duration,
}

impl TimingReport {
    /// One-line machine-readable summary.
    pub fn summary_json(&self) -> serde_json::Value {
        let losses: serde_json::Map<String, serde_json::Value> = self
            .measured
            .losses
            .iter()
            .map(|(name, value)| (name.to_string(), json!(value)))
            .collect();
        json!({
            "model": self.model,
            "warmup_loss": self.warmup.loss,
            "loss": self.measured.loss,
            "losses": losses,
            "alignment_shape": self.measured.alignment_shape(),
            "elapsed_ms": self.elapsed.as_secs_f64() * 1000.0,
        })
    }
}

#[derive(Debug)]
pub struct TimingHarness {
    phase: HarnessPhase,
}

impl Default for TimingHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingHarness {
    pub fn new() -> Self {
        Self {
            phase: HarnessPhase::Uninitialized,
        }
    }

    pub fn phase(&self) -> HarnessPhase {
        self.phase
    }

    /// Warm up and time one training step of `trainer` on `batch`.
    pub fn run<M: TrainableModel>(
        &mut self,
        trainer: &mut Trainer<M>,
        batch: &M::Batch,
    ) -> Result<TimingReport> {
        let model = trainer.model().name();
        self.run_with(model, || trainer.step(batch))
    }

    /// Drive an arbitrary step closure through the two-call protocol.
    pub fn run_with<F>(&mut self, model: &'static str, mut step: F) -> Result<TimingReport>
    where
        F: FnMut() -> Result<StepOutput>,
    {
        if self.phase != HarnessPhase::Uninitialized {
            return Err(Error::Harness(format!(
                "already ran (phase {:?})",
                self.phase
            )));
        }

        let warmup = step()?;
        self.phase = HarnessPhase::WarmedUp;
        tracing::debug!(model, loss = warmup.loss, "warm-up step done");

        let start = Instant::now();
        let measured = step()?;
        let elapsed = start.elapsed();
        self.phase = HarnessPhase::Measured;

        let report = TimingReport {
            model,
            warmup,
            measured,
            elapsed,
        };
        tracing::info!(
            model,
            loss = report.measured.loss,
            elapsed_ms = report.elapsed.as_secs_f64() * 1000.0,
            alignment = ?report.measured.alignment_shape(),
            "measured training step"
        );
        self.phase = HarnessPhase::Done;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(step: usize, loss: f32) -> StepOutput {
        StepOutput {
            step,
            loss,
            losses: vec![("loss", loss)],
            alignment: None,
        }
    }

    #[test]
    fn only_the_second_call_is_timed() {
        let mut harness = TimingHarness::new();
        let mut calls = 0;
        let report = harness
            .run_with("sleepy", || {
                calls += 1;
                if calls == 1 {
                    std::thread::sleep(Duration::from_millis(200));
                }
                Ok(output(calls, 1.0 / calls as f32))
            })
            .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(report.warmup.step, 1);
        assert_eq!(report.measured.step, 2);
        assert!(report.elapsed < Duration::from_millis(150), "{:?}", report.elapsed);
        assert_eq!(harness.phase(), HarnessPhase::Done);
    }

    #[test]
    fn measured_call_is_timed() {
        let mut harness = TimingHarness::new();
        let mut calls = 0;
        let report = harness
            .run_with("sleepy", || {
                calls += 1;
                if calls == 2 {
                    std::thread::sleep(Duration::from_millis(30));
                }
                Ok(output(calls, 0.5))
            })
            .unwrap();
        assert!(report.elapsed >= Duration::from_millis(30));
    }

    #[test]
    fn warmup_failure_stops_before_timing() {
        let mut harness = TimingHarness::new();
        let mut calls = 0;
        let err = harness
            .run_with("broken", || {
                calls += 1;
                Err(Error::Shape("bad batch".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
        assert_eq!(calls, 1);
        assert_eq!(harness.phase(), HarnessPhase::Uninitialized);
    }

    #[test]
    fn harness_is_single_use() {
        let mut harness = TimingHarness::new();
        harness.run_with("once", || Ok(output(1, 1.0))).unwrap();
        let err = harness.run_with("twice", || Ok(output(1, 1.0))).unwrap_err();
        assert!(matches!(err, Error::Harness(_)));
    }

    #[test]
    fn summary_has_losses_and_timing() {
        let mut harness = TimingHarness::new();
        let report = harness.run_with("m", || Ok(output(1, 2.0))).unwrap();
        let summary = report.summary_json();
        assert_eq!(summary["model"], "m");
        assert_eq!(summary["losses"]["loss"], 2.0);
        assert!(summary["alignment_shape"].is_null());
        assert!(summary["elapsed_ms"].as_f64().unwrap() >= 0.0);
    }
}
