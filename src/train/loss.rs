//! Loss functions. Both reduce to the mean over every element.

use candle_core::Tensor;

use crate::{Error, Result};

fn check_same_shape(what: &str, target: &Tensor, prediction: &Tensor) -> Result<()> {
    if target.dims() != prediction.dims() {
        return Err(Error::shape(what, target.dims(), prediction.dims()));
    }
    Ok(())
}

/// Mean squared error.
pub fn mse(target: &Tensor, prediction: &Tensor) -> Result<Tensor> {
    check_same_shape("mse prediction", target, prediction)?;
    let target = target.to_dtype(prediction.dtype())?;
    Ok(candle_nn::loss::mse(prediction, &target)?)
}

/// Binary cross-entropy on logits.
///
/// Uses `max(x, 0) - x * z + log(1 + exp(-|x|))`, which stays finite for
/// large `|x|`.
pub fn bce_with_logits(target: &Tensor, logits: &Tensor) -> Result<Tensor> {
    check_same_shape("bce logits", target, logits)?;
    let target = target.to_dtype(logits.dtype())?;
    let softplus_neg_abs = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
    let loss = ((logits.relu()? - (logits * target)?)? + softplus_neg_abs)?;
    Ok(loss.mean_all()?)
}
