//! QM9-style molecule files.
//!
//! A file is a single safetensors archive holding every molecule padded to a
//! common number of atom slots:
//!
//! | key         | shape       |
//! |-------------|-------------|
//! | `positions` | `[M, N, 3]` |
//! | `atom_mask` | `[M, N]`    |
//! | `one_hot`   | `[M, N, K]` |
//! | `charges`   | `[M, N]`    |
//! | property    | `[M]`       |
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use clap::ValueEnum;
use molprop_core::MoleculeBatch;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use tracing::debug;

/// Regression targets stored in a QM9 file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum Qm9Property {
    Alpha,
    Gap,
    Homo,
    Lumo,
    Mu,
    #[strum(serialize = "Cv")]
    #[value(name = "Cv")]
    Cv,
    #[strum(serialize = "G")]
    #[value(name = "G")]
    G,
    #[strum(serialize = "H")]
    #[value(name = "H")]
    H,
    R2,
    #[strum(serialize = "U")]
    #[value(name = "U")]
    U,
    #[strum(serialize = "U0")]
    #[value(name = "U0")]
    U0,
    Zpve,
}

#[derive(Clone, Debug)]
pub struct MoleculeDataset {
    positions: Tensor,
    atom_mask: Tensor,
    one_hot: Tensor,
    charges: Tensor,
    target: Tensor,
    property: Qm9Property,
    device: Device,
}

impl MoleculeDataset {
    /// Read `path`; tensors stay on the host until batched.
    pub fn load<P: AsRef<Path>>(path: P, property: Qm9Property, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let mut tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let mut take = |key: &str| take_tensor(&mut tensors, key, path);

        let positions = take("positions")?.to_dtype(DType::F32)?;
        let atom_mask = take("atom_mask")?.to_dtype(DType::F32)?;
        let one_hot = take("one_hot")?.to_dtype(DType::F32)?;
        let charges = take("charges")?.to_dtype(DType::F32)?;
        let target = take(&property.to_string())?.to_dtype(DType::F32)?;

        let (m, n) = match positions.dims() {
            [m, n, 3] => (*m, *n),
            dims => return Err(shape_error("positions", "[M, N, 3]", dims)),
        };
        if atom_mask.dims() != [m, n] {
            return Err(shape_error("atom_mask", &format!("[{m}, {n}]"), atom_mask.dims()));
        }
        if charges.dims() != [m, n] {
            return Err(shape_error("charges", &format!("[{m}, {n}]"), charges.dims()));
        }
        if !matches!(one_hot.dims(), [om, on, _] if *om == m && *on == n) {
            return Err(shape_error("one_hot", &format!("[{m}, {n}, K]"), one_hot.dims()));
        }
        let target = match target.dims() {
            [tm] if *tm == m => target,
            [tm, 1] if *tm == m => target.squeeze(1)?,
            dims => return Err(shape_error(&property.to_string(), &format!("[{m}]"), dims)),
        };

        debug!(
            "Loaded {m} molecules with {n} atom slots from {}",
            path.display()
        );
        Ok(Self {
            positions,
            atom_mask,
            one_hot,
            charges,
            target,
            property,
            device: device.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.positions.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_nodes(&self) -> usize {
        self.positions.dims()[1]
    }

    pub fn num_species(&self) -> usize {
        self.one_hot.dims()[2]
    }

    pub fn property(&self) -> Qm9Property {
        self.property
    }

    /// `[M]` property values.
    pub fn targets(&self) -> &Tensor {
        &self.target
    }

    /// Split into batches of at most `batch_size` molecules, shuffled when a
    /// seed is given.
    ///
    /// Atom slots that are padding for every molecule of a batch are dropped.
    pub fn batches(&self, batch_size: usize, shuffle: Option<u64>) -> Result<Vec<MoleculeBatch>> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        let mut order: Vec<u32> = (0..self.len() as u32).collect();
        if let Some(seed) = shuffle {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        order
            .chunks(batch_size)
            .map(|chunk| self.batch(chunk))
            .collect()
    }

    fn batch(&self, molecules: &[u32]) -> Result<MoleculeBatch> {
        let rows = Tensor::new(molecules, &Device::Cpu)?;
        let atom_mask = self.atom_mask.index_select(&rows, 0)?;
        let slots = Tensor::new(occupied_slots(&atom_mask)?.as_slice(), &Device::Cpu)?;
        let select = |xs: &Tensor| -> candle_core::Result<Tensor> {
            xs.index_select(&rows, 0)?.index_select(&slots, 1)
        };
        let batch = MoleculeBatch::from_atom_mask(
            select(&self.positions)?,
            atom_mask.index_select(&slots, 1)?,
            select(&self.one_hot)?,
            select(&self.charges)?,
            self.target.index_select(&rows, 0)?,
        )?;
        Ok(batch.to_device(&self.device)?)
    }
}

/// Slots holding a real atom in at least one molecule; at least one slot.
fn occupied_slots(atom_mask: &Tensor) -> Result<Vec<u32>> {
    let used = atom_mask.max(0)?.to_vec1::<f32>()?;
    let slots: Vec<u32> = used
        .iter()
        .enumerate()
        .filter_map(|(i, &v)| (v > 0.0).then_some(i as u32))
        .collect();
    if slots.is_empty() {
        Ok(vec![0])
    } else {
        Ok(slots)
    }
}

fn take_tensor(tensors: &mut HashMap<String, Tensor>, key: &str, path: &Path) -> Result<Tensor> {
    tensors.remove(key).ok_or_else(|| Error::MissingTensor {
        key: key.to_string(),
        path: PathBuf::from(path),
    })
}

fn shape_error(name: &str, expected: &str, actual: &[usize]) -> Error {
    Error::Config(format!(
        "tensor '{name}' has shape {actual:?}, expected {expected}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_names() {
        assert_eq!(Qm9Property::Cv.to_string(), "Cv");
        assert_eq!(Qm9Property::U0.to_string(), "U0");
        assert_eq!(Qm9Property::Zpve.to_string(), "zpve");
        assert_eq!("homo".parse::<Qm9Property>().unwrap(), Qm9Property::Homo);
        assert_eq!(
            <Qm9Property as ValueEnum>::from_str("Cv", false).unwrap(),
            Qm9Property::Cv
        );
        assert_eq!(
            <Qm9Property as ValueEnum>::from_str("r2", false).unwrap(),
            Qm9Property::R2
        );
    }

    #[test]
    fn test_occupied_slots() -> Result<()> {
        let mask = Tensor::new(&[[1f32, 0., 0., 0.], [1., 0., 1., 0.]], &Device::Cpu)?;
        assert_eq!(occupied_slots(&mask)?, vec![0, 2]);
        let empty = Tensor::zeros((2, 3), DType::F32, &Device::Cpu)?;
        assert_eq!(occupied_slots(&empty)?, vec![0]);
        Ok(())
    }
}
