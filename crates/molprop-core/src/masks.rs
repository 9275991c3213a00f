//! Atom and edge validity masks.
//!
//! Masking is applied at exactly two places:
//!
//! 1. [`Masks::mask_edges`] on every per-edge quantity a layer produces
//!    (messages, coordinate translations), so padding atoms never send or
//!    receive anything.
//! 2. [`Masks::mask_atoms`] on the per-atom scalars before they are pooled
//!    into a per-molecule value.
use crate::edges::EdgeIndex;
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};

#[derive(Clone, Debug)]
pub struct Masks {
    // [num_atoms, 1]
    atom: Tensor,
    // [num_edges, 1], aligned with the edge list
    edge: Tensor,
}

impl Masks {
    /// Build masks from an atom mask and an edge mask in the dense
    /// `n_nodes * n_nodes` layout (`[B, N*N, 1]` or `[B*N*N, 1]`). Diagonal
    /// entries of the dense mask are dropped to line up with `edges`.
    pub fn new(atom_mask: &Tensor, dense_edge_mask: &Tensor, edges: &EdgeIndex) -> Result<Self> {
        let atom = flatten_atom_mask(atom_mask, edges)?;
        let n_dense = edges.num_atoms() * edges.n_nodes();
        if dense_edge_mask.elem_count() != n_dense {
            return Err(Error::shape(
                "edge_mask",
                format!("{n_dense} elements"),
                dense_edge_mask.dims(),
            ));
        }
        let edge = dense_edge_mask
            .to_dtype(DType::F32)?
            .reshape((n_dense, 1))?
            .index_select(edges.dense_positions(), 0)?;
        Ok(Self { atom, edge })
    }

    /// Derive the edge mask as `atom_i * atom_j`.
    pub fn from_atom_mask(atom_mask: &Tensor, edges: &EdgeIndex) -> Result<Self> {
        let atom = flatten_atom_mask(atom_mask, edges)?;
        let edge = atom
            .index_select(edges.rows(), 0)?
            .mul(&atom.index_select(edges.cols(), 0)?)?;
        Ok(Self { atom, edge })
    }

    pub fn atom(&self) -> &Tensor {
        &self.atom
    }

    pub fn edge(&self) -> &Tensor {
        &self.edge
    }

    /// Zero per-edge rows (`[num_edges, ..]`) belonging to invalid edges.
    pub fn mask_edges(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.broadcast_mul(&self.edge)
    }

    /// Zero per-atom rows (`[num_atoms, ..]`) belonging to padding atoms.
    pub fn mask_atoms(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.broadcast_mul(&self.atom)
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            atom: self.atom.to_device(device)?,
            edge: self.edge.to_device(device)?,
        })
    }
}

fn flatten_atom_mask(atom_mask: &Tensor, edges: &EdgeIndex) -> Result<Tensor> {
    let n_atoms = edges.num_atoms();
    if atom_mask.elem_count() != n_atoms {
        return Err(Error::shape(
            "atom_mask",
            format!("{n_atoms} elements"),
            atom_mask.dims(),
        ));
    }
    Ok(atom_mask.to_dtype(DType::F32)?.reshape((n_atoms, 1))?)
}

/// Dense pairwise mask `[B, N*N, 1]` from an atom mask `[B, N]` or `[B, N, 1]`:
/// `1` where both atoms are real and distinct.
pub fn dense_edge_mask(atom_mask: &Tensor) -> Result<Tensor> {
    let dims = atom_mask.dims();
    let (b, n) = match dims {
        [b, n] | [b, n, 1] => (*b, *n),
        _ => return Err(Error::shape("atom_mask", "[B, N] or [B, N, 1]", dims)),
    };
    let device = atom_mask.device();
    let atom = atom_mask.to_dtype(DType::F32)?.reshape((b, n))?;
    let pairs = atom.unsqueeze(2)?.broadcast_mul(&atom.unsqueeze(1)?)?;
    let off_diagonal =
        (Tensor::ones((n, n), DType::F32, device)? - Tensor::eye(n, DType::F32, device)?)?;
    Ok(pairs
        .broadcast_mul(&off_diagonal)?
        .reshape((b, n * n, 1))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_mask_layout() -> Result<()> {
        let device = Device::Cpu;
        let atom_mask = Tensor::new(&[[1f32, 1., 0.]], &device)?;
        let dense = dense_edge_mask(&atom_mask)?;
        assert_eq!(dense.dims(), &[1, 9, 1]);
        assert_eq!(
            dense.flatten_all()?.to_vec1::<f32>()?,
            vec![0., 1., 0., 1., 0., 0., 0., 0., 0.]
        );
        Ok(())
    }

    #[test]
    fn test_dense_and_derived_masks_agree() -> Result<()> {
        let device = Device::Cpu;
        let atom_mask = Tensor::new(&[[1f32, 1., 0.], [1., 1., 1.]], &device)?;
        let edges = EdgeIndex::fully_connected(3, 2, &device)?;
        let from_dense = Masks::new(&atom_mask, &dense_edge_mask(&atom_mask)?, &edges)?;
        let derived = Masks::from_atom_mask(&atom_mask, &edges)?;
        let a = from_dense.edge().flatten_all()?.to_vec1::<f32>()?;
        let b = derived.edge().flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(a, b);
        assert_eq!(a, vec![1., 0., 1., 0., 0., 0., 1., 1., 1., 1., 1., 1.]);
        Ok(())
    }

    #[test]
    fn test_mask_checkpoints() -> Result<()> {
        let device = Device::Cpu;
        let atom_mask = Tensor::new(&[[1f32, 0.]], &device)?;
        let edges = EdgeIndex::fully_connected(2, 1, &device)?;
        let masks = Masks::from_atom_mask(&atom_mask, &edges)?;

        let per_atom = Tensor::new(&[[3f32, 3.], [4., 4.]], &device)?;
        assert_eq!(
            masks.mask_atoms(&per_atom)?.to_vec2::<f32>()?,
            vec![vec![3., 3.], vec![0., 0.]]
        );
        let per_edge = Tensor::new(&[[5f32], [6.]], &device)?;
        assert_eq!(
            masks.mask_edges(&per_edge)?.to_vec2::<f32>()?,
            vec![vec![0.], vec![0.]]
        );
        Ok(())
    }

    #[test]
    fn test_wrong_mask_size() -> Result<()> {
        let device = Device::Cpu;
        let edges = EdgeIndex::fully_connected(3, 2, &device)?;
        let atom_mask = Tensor::ones((2, 4), DType::F32, &device)?;
        let err = Masks::from_atom_mask(&atom_mask, &edges).unwrap_err();
        assert!(matches!(err, Error::Shape { name: "atom_mask", .. }));
        Ok(())
    }
}
