use candle_core::{Result, Tensor};

/// Mean absolute error between equally sized tensors.
pub fn l1_loss(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let pred = pred.flatten_all()?;
    let target = target.flatten_all()?.to_dtype(pred.dtype())?;
    (pred - target)?.abs()?.mean_all()
}

/// Mean absolute error over the entries where `mask` is 1.
pub fn masked_l1_loss(pred: &Tensor, target: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let pred = pred.flatten_all()?;
    let target = target.flatten_all()?.to_dtype(pred.dtype())?;
    let mask = mask.flatten_all()?.to_dtype(pred.dtype())?;
    let total = (pred - target)?.abs()?.mul(&mask)?.sum_all()?;
    let count = mask.sum_all()?.clamp(1.0, f64::INFINITY)?;
    total.div(&count)
}
