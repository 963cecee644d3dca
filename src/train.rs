//! Training-step executor.
//!
//! A [`Trainer`] owns a model, the variables it registered in a [`VarMap`] and
//! an [`AdamW`] optimizer over every one of them. One [`Trainer::step`] runs:
//!
//! ```text
//! validate batch → forward (training) → named losses → finiteness check
//!   → backward → gradient for every variable → optimizer update
//! ```
//!
//! Any failure before the optimizer update leaves the parameters, the optimizer
//! state and the step counter untouched. BatchNorm running statistics are
//! updated by the forward pass and are not rolled back.

pub mod fastspeech;
pub mod loss;
pub mod tacotron2;

use std::sync::PoisonError;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, VarBuilder, VarMap};

use crate::config::TrainingConfig;
use crate::{Error, Result};

/// One named scalar contribution to the objective.
#[derive(Debug, Clone)]
pub struct LossTerm {
    pub name: &'static str,
    pub value: Tensor,
}

/// Loss terms from one forward pass, plus the attention history when the
/// model has one.
#[derive(Debug, Clone)]
pub struct StepLosses {
    pub terms: Vec<LossTerm>,
    pub alignment: Option<Tensor>,
}

impl StepLosses {
    pub fn new(terms: Vec<LossTerm>) -> Self {
        Self {
            terms,
            alignment: None,
        }
    }

    pub fn with_alignment(mut self, alignment: Tensor) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Sum of all terms as a scalar tensor.
    pub fn total(&self) -> Result<Tensor> {
        let mut terms = self.terms.iter();
        let first = terms
            .next()
            .ok_or_else(|| Error::Shape("objective has no loss terms".into()))?;
        let mut total = first.value.clone();
        for term in terms {
            total = (total + &term.value)?;
        }
        Ok(total)
    }
}

/// A model that can be trained on its own batch type.
pub trait TrainableModel {
    type Batch;
    type Params;

    fn name(&self) -> &'static str;

    /// Reject a batch whose tensors don't match `params`.
    fn validate_batch(&self, batch: &Self::Batch, params: &Self::Params) -> Result<()>;

    /// Forward pass and objective.
    fn losses(&self, batch: &Self::Batch, training: bool) -> Result<StepLosses>;
}

/// Result of one completed training step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// 1-based index of this step on its trainer.
    pub step: usize,
    pub loss: f32,
    pub losses: Vec<(&'static str, f32)>,
    pub alignment: Option<Tensor>,
}

impl StepOutput {
    pub fn alignment_shape(&self) -> Option<Vec<usize>> {
        self.alignment.as_ref().map(|a| a.dims().to_vec())
    }
}

#[derive(Debug)]
pub struct Trainer<M: TrainableModel> {
    model: M,
    params: M::Params,
    vars: Vec<(String, Var)>,
    optimizer: AdamW,
    steps: usize,
}

impl<M: TrainableModel> Trainer<M> {
    /// Build the model into a fresh `VarMap` and attach an optimizer to
    /// everything it registered.
    pub fn new(
        config: &TrainingConfig,
        params: M::Params,
        device: &Device,
        build: impl FnOnce(VarBuilder) -> Result<M>,
    ) -> Result<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = build(vb)?;

        let mut vars: Vec<(String, Var)> = varmap
            .data()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        let optimizer = AdamW::new(
            vars.iter().map(|(_, var)| var.clone()).collect(),
            config.adamw_params(),
        )?;
        let trainer = Self {
            model,
            params,
            vars,
            optimizer,
            steps: 0,
        };
        tracing::info!(
            model = trainer.model.name(),
            variables = trainer.vars.len(),
            parameters = trainer.num_parameters(),
            lr = config.learning_rate,
            "trainer ready"
        );
        Ok(trainer)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn params(&self) -> &M::Params {
        &self.params
    }

    /// Completed optimizer updates.
    pub fn steps_taken(&self) -> usize {
        self.steps
    }

    /// Total scalar count across all trainable variables.
    pub fn num_parameters(&self) -> usize {
        self.vars.iter().map(|(_, var)| var.elem_count()).sum()
    }

    /// Run one training step on `batch`.
    pub fn step(&mut self, batch: &M::Batch) -> Result<StepOutput> {
        self.model.validate_batch(batch, &self.params)?;
        let losses = self.model.losses(batch, true)?;

        let mut values = Vec::with_capacity(losses.terms.len());
        for term in &losses.terms {
            let value = scalar(&term.value)?;
            if !value.is_finite() {
                return Err(Error::NonFinite {
                    name: term.name.to_string(),
                    value,
                });
            }
            values.push((term.name, value));
        }
        let total = losses.total()?;
        let loss = scalar(&total)?;
        if !loss.is_finite() {
            return Err(Error::NonFinite {
                name: "loss".into(),
                value: loss,
            });
        }

        let grads = total.backward()?;
        if let Some((name, _)) = self
            .vars
            .iter()
            .find(|(_, var)| grads.get(var.as_tensor()).is_none())
        {
            return Err(Error::MissingGradient(name.clone()));
        }
        self.optimizer.step(&grads)?;
        self.steps += 1;

        tracing::debug!(
            model = self.model.name(),
            step = self.steps,
            loss,
            terms = ?values,
            "training step"
        );
        Ok(StepOutput {
            step: self.steps,
            loss,
            losses: values,
            alignment: losses.alignment,
        })
    }
}

fn scalar(t: &Tensor) -> Result<f32> {
    Ok(t.to_dtype(DType::F32)?.to_scalar::<f32>()?)
}
