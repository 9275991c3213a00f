//! Atom Featurizer
//!
//! Expands one-hot species and nuclear charges into the per-atom scalar
//! features consumed by the network:
//!
//! ```text
//! [one_hot * (z / scale)^0, one_hot * (z / scale)^1, ..., one_hot * (z / scale)^P]
//! ```
//!
//! The `p = 0` block is the one-hot itself, so species identity survives even
//! for padding atoms with `z = 0`. Padding rows are *not* zeroed here; that is
//! the job of the atom mask.
use crate::error::{Error, Result};
use candle_core::{DType, Tensor, D};
use serde::{Deserialize, Serialize};

/// QM9 species order: H, C, N, O, F
pub const QM9_CHARGES: [u32; 5] = [1, 6, 7, 8, 9];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub num_species: usize,
    pub charge_power: usize,
    pub charge_scale: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self::qm9()
    }
}

impl FeatureConfig {
    pub fn qm9() -> Self {
        Self {
            num_species: QM9_CHARGES.len(),
            charge_power: 2,
            charge_scale: 9.0,
        }
    }

    /// Width of the expanded feature vector.
    pub fn in_node_nf(&self) -> usize {
        self.num_species * (self.charge_power + 1)
    }

    pub fn featurize(&self, one_hot: &Tensor, charges: &Tensor) -> Result<Tensor> {
        let width = one_hot.dims().last().copied().unwrap_or(0);
        if width != self.num_species {
            return Err(Error::shape(
                "one_hot",
                format!("[.., {}]", self.num_species),
                one_hot.dims(),
            ));
        }
        preprocess_input(one_hot, charges, self.charge_power, self.charge_scale)
    }
}

/// Concatenate `one_hot * (charges / charge_scale)^p` for `p` in `0..=charge_power`.
///
/// `one_hot` is `[.., K]` and `charges` is `[.., 1]` with identical leading
/// dimensions. Returns `[.., K * (charge_power + 1)]` in power-major order.
pub fn preprocess_input(
    one_hot: &Tensor,
    charges: &Tensor,
    charge_power: usize,
    charge_scale: f64,
) -> Result<Tensor> {
    let oh_dims = one_hot.dims();
    let ch_dims = charges.dims();
    let rank = oh_dims.len();
    if rank < 2 || ch_dims.len() != rank {
        return Err(Error::shape(
            "charges",
            format!("rank {rank} with trailing dimension 1"),
            ch_dims,
        ));
    }
    if oh_dims[..rank - 1] != ch_dims[..rank - 1] || ch_dims[rank - 1] != 1 {
        return Err(Error::shape(
            "charges",
            format!("{:?} + [1]", &oh_dims[..rank - 1]),
            ch_dims,
        ));
    }

    let one_hot = one_hot.to_dtype(DType::F32)?;
    let scaled = charges.to_dtype(DType::F32)?.affine(1.0 / charge_scale, 0.0)?;

    // successive products instead of powf so that 0^0 stays 1
    let mut terms = Vec::with_capacity(charge_power + 1);
    let mut term = one_hot;
    for _ in 0..charge_power {
        let next = term.broadcast_mul(&scaled)?;
        terms.push(term);
        term = next;
    }
    terms.push(term);

    Ok(Tensor::cat(&terms, D::Minus1)?)
}
