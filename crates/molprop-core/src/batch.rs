//! Padded molecule batches.
//!
//! A batch holds `B` molecules padded to `N` atom slots each. Models work on
//! the flattened view ([`GraphInput`]) with `B * N` atoms.
use crate::edges::EdgeIndex;
use crate::error::{Error, Result};
use crate::features::FeatureConfig;
use crate::masks::{dense_edge_mask, Masks};
use candle_core::{DType, Device, Tensor};

#[derive(Clone, Debug)]
pub struct MoleculeBatch {
    /// `[B, N, 3]`
    pub positions: Tensor,
    /// `[B, N, 1]`
    pub atom_mask: Tensor,
    /// `[B, N*N, 1]`, fully-connected layout including the (masked) diagonal
    pub edge_mask: Tensor,
    /// `[B, N, K]`
    pub one_hot: Tensor,
    /// `[B, N, 1]` nuclear charges, 0 for padding
    pub charges: Tensor,
    /// `[B]` property to regress
    pub target: Tensor,
}

/// Flattened, model-ready view of a [`MoleculeBatch`].
#[derive(Clone, Debug)]
pub struct GraphInput {
    /// `[B*N, in_node_nf]`
    pub nodes: Tensor,
    /// `[B*N, 3]`
    pub positions: Tensor,
    pub edges: EdgeIndex,
    pub masks: Masks,
    /// optional `[E, in_edge_nf]` attributes aligned with `edges`
    pub edge_attr: Option<Tensor>,
    pub batch_size: usize,
    pub n_nodes: usize,
}

/// Accept `[B, N]` or `[B, N, 1]`, return `[B, N, 1]` as f32.
fn per_atom_column(name: &'static str, xs: &Tensor, b: usize, n: usize) -> Result<Tensor> {
    match xs.dims() {
        [xb, xn] if *xb == b && *xn == n => Ok(xs.to_dtype(DType::F32)?.unsqueeze(2)?),
        [xb, xn, 1] if *xb == b && *xn == n => Ok(xs.to_dtype(DType::F32)?),
        dims => Err(Error::shape(name, format!("[{b}, {n}, 1]"), dims)),
    }
}

impl MoleculeBatch {
    pub fn new(
        positions: Tensor,
        atom_mask: Tensor,
        edge_mask: Tensor,
        one_hot: Tensor,
        charges: Tensor,
        target: Tensor,
    ) -> Result<Self> {
        let (b, n) = match positions.dims() {
            [b, n, 3] => (*b, *n),
            dims => return Err(Error::shape("positions", "[B, N, 3]", dims)),
        };
        let positions = positions.to_dtype(DType::F32)?;
        let atom_mask = per_atom_column("atom_mask", &atom_mask, b, n)?;
        let charges = per_atom_column("charges", &charges, b, n)?;

        let edge_mask = match edge_mask.dims() {
            [xb, xn, 1] if *xb == b && *xn == n * n => edge_mask.to_dtype(DType::F32)?,
            [xn, 1] if *xn == b * n * n => edge_mask.to_dtype(DType::F32)?.reshape((b, n * n, 1))?,
            dims => return Err(Error::shape("edge_mask", format!("[{b}, {}, 1]", n * n), dims)),
        };
        let one_hot = match one_hot.dims() {
            [xb, xn, _] if *xb == b && *xn == n => one_hot.to_dtype(DType::F32)?,
            dims => return Err(Error::shape("one_hot", format!("[{b}, {n}, K]"), dims)),
        };
        let target = match target.dims() {
            [xb] if *xb == b => target.to_dtype(DType::F32)?,
            [xb, 1] if *xb == b => target.to_dtype(DType::F32)?.squeeze(1)?,
            dims => return Err(Error::shape("target", format!("[{b}]"), dims)),
        };

        Ok(Self {
            positions,
            atom_mask,
            edge_mask,
            one_hot,
            charges,
            target,
        })
    }

    /// Build a batch whose edge mask is derived from the atom mask.
    pub fn from_atom_mask(
        positions: Tensor,
        atom_mask: Tensor,
        one_hot: Tensor,
        charges: Tensor,
        target: Tensor,
    ) -> Result<Self> {
        let edge_mask = dense_edge_mask(&atom_mask)?;
        Self::new(positions, atom_mask, edge_mask, one_hot, charges, target)
    }

    pub fn batch_size(&self) -> usize {
        self.positions.dims()[0]
    }

    pub fn n_nodes(&self) -> usize {
        self.positions.dims()[1]
    }

    pub fn num_species(&self) -> usize {
        self.one_hot.dims()[2]
    }

    pub fn device(&self) -> &Device {
        self.positions.device()
    }

    /// `[B]` with 1 for molecules holding at least one real atom.
    pub fn molecule_mask(&self) -> Result<Tensor> {
        let counts = self.atom_mask.squeeze(2)?.sum(1)?;
        Ok(counts.gt(0.0)?.to_dtype(DType::F32)?)
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            positions: self.positions.to_device(device)?,
            atom_mask: self.atom_mask.to_device(device)?,
            edge_mask: self.edge_mask.to_device(device)?,
            one_hot: self.one_hot.to_device(device)?,
            charges: self.charges.to_device(device)?,
            target: self.target.to_device(device)?,
        })
    }

    /// Featurize and flatten the batch for a model.
    pub fn graph_input(&self, features: &FeatureConfig) -> Result<GraphInput> {
        let (b, n) = (self.batch_size(), self.n_nodes());
        let nodes = features
            .featurize(&self.one_hot, &self.charges)?
            .reshape((b * n, features.in_node_nf()))?;
        let positions = self.positions.reshape((b * n, 3))?;
        let edges = EdgeIndex::fully_connected(n, b, self.device())?;
        let masks = Masks::new(&self.atom_mask, &self.edge_mask, &edges)?;
        Ok(GraphInput {
            nodes,
            positions,
            edges,
            masks,
            edge_attr: None,
            batch_size: b,
            n_nodes: n,
        })
    }
}

impl GraphInput {
    pub fn with_edge_attr(mut self, edge_attr: Tensor) -> Self {
        self.edge_attr = Some(edge_attr);
        self
    }

    pub fn num_atoms(&self) -> usize {
        self.batch_size * self.n_nodes
    }
}
