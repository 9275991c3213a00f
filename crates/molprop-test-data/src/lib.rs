//! molprop-test-data
//!
//! Small molecules with QM9-like geometries and frontier-orbital energies for
//! use in testing.
//!
//! Molecules are represented as [`TestMolecule`] values which can be padded into a
//! [`MoleculeBatch`], rigidly moved, or permuted. [`TestFile`] writes a
//! collection of them to a temporary safetensors batch file for CLI and loader
//! tests.
use candle_core::{Device, Tensor};
use molprop_core::features::QM9_CHARGES;
use molprop_core::MoleculeBatch;
use std::collections::HashMap;
use tempfile::{Builder, NamedTempFile};

pub const H: usize = 0;
pub const C: usize = 1;
pub const N: usize = 2;
pub const O: usize = 3;
pub const F: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct TestMolecule {
    pub name: &'static str,
    /// index into the QM9 species order (H, C, N, O, F)
    pub species: Vec<usize>,
    /// Angstrom
    pub positions: Vec<[f32; 3]>,
    /// Hartree
    pub homo: f32,
    pub lumo: f32,
}

impl TestMolecule {
    pub fn methane() -> Self {
        Self {
            name: "methane",
            species: vec![C, H, H, H, H],
            positions: vec![
                [0.0, 0.0, 0.0],
                [0.6291, 0.6291, 0.6291],
                [-0.6291, -0.6291, 0.6291],
                [-0.6291, 0.6291, -0.6291],
                [0.6291, -0.6291, -0.6291],
            ],
            homo: -0.3877,
            lumo: 0.1171,
        }
    }

    pub fn ammonia() -> Self {
        Self {
            name: "ammonia",
            species: vec![N, H, H, H],
            positions: vec![
                [0.0, 0.0, 0.1162],
                [0.0, 0.9397, -0.2711],
                [0.8138, -0.4699, -0.2711],
                [-0.8138, -0.4699, -0.2711],
            ],
            homo: -0.2570,
            lumo: 0.0829,
        }
    }

    pub fn water() -> Self {
        Self {
            name: "water",
            species: vec![O, H, H],
            positions: vec![
                [0.0, 0.0, 0.1173],
                [0.0, 0.7572, -0.4692],
                [0.0, -0.7572, -0.4692],
            ],
            homo: -0.2928,
            lumo: 0.0687,
        }
    }

    pub fn hydrogen_cyanide() -> Self {
        Self {
            name: "hydrogen_cyanide",
            species: vec![H, C, N],
            positions: vec![[0.0, 0.0, -1.6000], [0.0, 0.0, -0.5340], [0.0, 0.0, 0.6220]],
            homo: -0.3604,
            lumo: 0.0191,
        }
    }

    pub fn formaldehyde() -> Self {
        Self {
            name: "formaldehyde",
            species: vec![C, O, H, H],
            positions: vec![
                [0.0, 0.0, -0.5297],
                [0.0, 0.0, 0.6794],
                [0.0, 0.9347, -1.1123],
                [0.0, -0.9347, -1.1123],
            ],
            homo: -0.2670,
            lumo: -0.0406,
        }
    }

    pub fn hydrogen_fluoride() -> Self {
        Self {
            name: "hydrogen_fluoride",
            species: vec![F, H],
            positions: vec![[0.0, 0.0, 0.0934], [0.0, 0.0, -0.8406]],
            homo: -0.4390,
            lumo: 0.0361,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::methane(),
            Self::ammonia(),
            Self::water(),
            Self::hydrogen_cyanide(),
            Self::formaldehyde(),
            Self::hydrogen_fluoride(),
        ]
    }

    pub fn num_atoms(&self) -> usize {
        self.species.len()
    }

    pub fn charges(&self) -> Vec<f32> {
        self.species.iter().map(|&s| QM9_CHARGES[s] as f32).collect()
    }

    pub fn gap(&self) -> f32 {
        self.lumo - self.homo
    }

    /// Atoms reordered so that atom `k` of the result is atom `order[k]` of `self`.
    pub fn permuted(&self, order: &[usize]) -> Self {
        assert_eq!(order.len(), self.num_atoms());
        Self {
            species: order.iter().map(|&k| self.species[k]).collect(),
            positions: order.iter().map(|&k| self.positions[k]).collect(),
            ..self.clone()
        }
    }

    /// Apply `x -> R x + t` to every atom.
    pub fn transformed(&self, rotation: &[[f32; 3]; 3], shift: [f32; 3]) -> Self {
        Self {
            positions: self
                .positions
                .iter()
                .map(|p| apply_rigid(rotation, shift, *p))
                .collect(),
            ..self.clone()
        }
    }
}

/// Rotation by `angle` radians about `axis` (Rodrigues).
pub fn rotation_matrix(axis: [f32; 3], angle: f32) -> [[f32; 3]; 3] {
    let norm = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
    let [x, y, z] = axis.map(|a| a / norm);
    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;
    [
        [t * x * x + c, t * x * y - s * z, t * x * z + s * y],
        [t * x * y + s * z, t * y * y + c, t * y * z - s * x],
        [t * x * z - s * y, t * y * z + s * x, t * z * z + c],
    ]
}

pub fn apply_rigid(rotation: &[[f32; 3]; 3], shift: [f32; 3], p: [f32; 3]) -> [f32; 3] {
    let mut out = shift;
    for (row, o) in rotation.iter().zip(out.iter_mut()) {
        *o += row[0] * p[0] + row[1] * p[1] + row[2] * p[2];
    }
    out
}

/// Padded host-side arrays for a set of molecules, keyed like a batch file.
pub fn batch_tensors(
    molecules: &[TestMolecule],
    n_nodes: usize,
    device: &Device,
) -> candle_core::Result<HashMap<String, Tensor>> {
    let m = molecules.len();
    let k = QM9_CHARGES.len();
    let mut positions = vec![0f32; m * n_nodes * 3];
    let mut atom_mask = vec![0f32; m * n_nodes];
    let mut one_hot = vec![0f32; m * n_nodes * k];
    let mut charges = vec![0f32; m * n_nodes];

    for (b, molecule) in molecules.iter().enumerate() {
        assert!(
            molecule.num_atoms() <= n_nodes,
            "{} does not fit in {} slots",
            molecule.name,
            n_nodes
        );
        for (a, (&species, pos)) in molecule
            .species
            .iter()
            .zip(molecule.positions.iter())
            .enumerate()
        {
            let slot = b * n_nodes + a;
            positions[slot * 3..slot * 3 + 3].copy_from_slice(pos);
            atom_mask[slot] = 1.0;
            one_hot[slot * k + species] = 1.0;
            charges[slot] = QM9_CHARGES[species] as f32;
        }
    }

    let homo: Vec<f32> = molecules.iter().map(|m| m.homo).collect();
    let lumo: Vec<f32> = molecules.iter().map(|m| m.lumo).collect();
    let gap: Vec<f32> = molecules.iter().map(|m| m.gap()).collect();

    let mut tensors = HashMap::new();
    tensors.insert(
        "positions".to_string(),
        Tensor::from_vec(positions, (m, n_nodes, 3), device)?,
    );
    tensors.insert(
        "atom_mask".to_string(),
        Tensor::from_vec(atom_mask, (m, n_nodes), device)?,
    );
    tensors.insert(
        "one_hot".to_string(),
        Tensor::from_vec(one_hot, (m, n_nodes, k), device)?,
    );
    tensors.insert(
        "charges".to_string(),
        Tensor::from_vec(charges, (m, n_nodes), device)?,
    );
    tensors.insert("homo".to_string(), Tensor::from_vec(homo, m, device)?);
    tensors.insert("lumo".to_string(), Tensor::from_vec(lumo, m, device)?);
    tensors.insert("gap".to_string(), Tensor::from_vec(gap, m, device)?);
    Ok(tensors)
}

/// Pad `molecules` to `n_nodes` slots and build a batch targeting HOMO energies.
pub fn batch(
    molecules: &[TestMolecule],
    n_nodes: usize,
    device: &Device,
) -> molprop_core::Result<MoleculeBatch> {
    let mut tensors = batch_tensors(molecules, n_nodes, device)?;
    let mut take = |key: &str| tensors.remove(key).expect("key inserted by batch_tensors");
    let positions = take("positions");
    let atom_mask = take("atom_mask");
    let one_hot = take("one_hot");
    let charges = take("charges");
    let target = take("homo");
    MoleculeBatch::from_atom_mask(positions, atom_mask, one_hot, charges, target)
}

#[derive(Debug)]
/// Test File
///
/// A safetensors batch file (`positions`, `atom_mask`, `one_hot`, `charges`,
/// `homo`, `lumo`, `gap`) written to a temporary location.
///
/// ```ignore
/// // returns (filepath, _tempfile_handle).
/// // _handle ensures the tempfile remains in scope
/// use molprop_test_data::TestFile;
/// let (data_file, _temp) = TestFile::qm9_tiny().create_temp().unwrap();
/// ```
pub struct TestFile {
    molecules: Vec<TestMolecule>,
    n_nodes: usize,
}

impl TestFile {
    /// Every molecule in [`TestMolecule::all`], padded to five atom slots.
    pub fn qm9_tiny() -> Self {
        Self {
            molecules: TestMolecule::all(),
            n_nodes: 5,
        }
    }

    /// The same molecules padded to eight slots.
    pub fn qm9_tiny_padded() -> Self {
        Self {
            molecules: TestMolecule::all(),
            n_nodes: 8,
        }
    }

    pub fn molecules(&self) -> &[TestMolecule] {
        &self.molecules
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new().suffix(".safetensors").tempfile()?;
        let to_io = |e: candle_core::Error| std::io::Error::other(e.to_string());
        let tensors = batch_tensors(&self.molecules, self.n_nodes, &Device::Cpu).map_err(to_io)?;
        candle_core::safetensors::save(&tensors, temp.path()).map_err(to_io)?;
        let path = temp.path().to_string_lossy().into_owned();
        Ok((path, temp))
    }
}
