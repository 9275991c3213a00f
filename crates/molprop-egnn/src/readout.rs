//! Per-molecule readout of per-atom scalars.
use crate::error::{Error, Result};
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Reduction from atom scalars to a molecule value.
///
/// Command-line and JSON names both go through [`AggMode::from_name`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum AggMode {
    #[default]
    Sum,
    Avg,
    Max,
}

impl AggMode {
    /// Parse a mode name, rejecting anything but `sum`, `avg` and `max`.
    pub fn from_name(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::InvalidAggMode(name.to_string()))
    }
}

impl TryFrom<String> for AggMode {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        Self::from_name(&name)
    }
}

/// Pool `[batch_size * n_nodes, 1]` atom scalars into `[batch_size, 1]`.
///
/// Padding atoms never contribute: `avg` divides by the number of valid atoms
/// and `max` only considers valid atoms, so an all-negative molecule does not
/// pick up a padding zero. A molecule without any valid atom is an
/// [`Error::EmptyMolecule`] for `avg` and `max`; `sum` reports 0 for it.
pub fn aggregate(
    scalars: &Tensor,
    atom_mask: &Tensor,
    batch_size: usize,
    n_nodes: usize,
    mode: AggMode,
) -> Result<Tensor> {
    let scalars = scalars.reshape((batch_size, n_nodes))?;
    let mask = atom_mask.to_dtype(DType::F32)?.reshape((batch_size, n_nodes))?;

    let pooled = match mode {
        AggMode::Sum => scalars.broadcast_mul(&mask)?.sum_keepdim(1)?,
        AggMode::Avg => {
            let counts = valid_counts(&mask)?;
            scalars
                .broadcast_mul(&mask)?
                .sum_keepdim(1)?
                .broadcast_div(&counts)?
        }
        AggMode::Max => {
            valid_counts(&mask)?;
            let floor = Tensor::full(f32::NEG_INFINITY, (batch_size, n_nodes), scalars.device())?
                .to_dtype(scalars.dtype())?;
            mask.gt(0.5)?
                .where_cond(&scalars, &floor)?
                .max_keepdim(1)?
        }
    };
    Ok(pooled)
}

/// `[batch_size, 1]` valid-atom counts; errors on the first empty molecule.
fn valid_counts(mask: &Tensor) -> Result<Tensor> {
    let counts = mask.sum_keepdim(1)?;
    let host = counts.flatten_all()?.to_vec1::<f32>()?;
    if let Some(index) = host.iter().position(|&c| c <= 0.0) {
        return Err(Error::EmptyMolecule { index });
    }
    Ok(counts)
}
