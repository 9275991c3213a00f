//! Loss, learning-rate schedule and the training loop.
use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};
use strum::Display;

pub mod loss;
pub mod scheduler;
pub mod trainer;

/// Target standardisation, `(y - mean) / mad`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f64,
    /// mean absolute deviation of the training targets
    pub mad: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Self { mean: 0.0, mad: 1.0 }
    }
}

impl Normalization {
    /// Statistics of `targets`, falling back to `mad = 1` for constant targets.
    pub fn from_targets(targets: &Tensor) -> Result<Self> {
        let values = targets.flatten_all()?.to_dtype(candle_core::DType::F64)?.to_vec1::<f64>()?;
        if values.is_empty() {
            return Ok(Self::default());
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let mad = values.iter().map(|v| (v - mean).abs()).sum::<f64>() / values.len() as f64;
        let mad = if mad > 0.0 { mad } else { 1.0 };
        Ok(Self { mean, mad })
    }

    pub fn normalize(&self, y: &Tensor) -> Result<Tensor> {
        y.affine(1.0 / self.mad, -self.mean / self.mad)
    }

    pub fn denormalize(&self, p: &Tensor) -> Result<Tensor> {
        p.affine(self.mad, self.mean)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Partition {
    Train,
    Valid,
    Test,
}
