//! Fully-connected edge lists for padded molecule batches.
//!
//! Every molecule in a batch occupies `n_nodes` consecutive atom slots. Edges
//! connect all ordered pairs `(i, j)`, `i != j`, inside a molecule and are
//! offset by `b * n_nodes` for molecule `b`. Enumeration is row-major over
//! `(i, j)` with the batch index outermost, so two calls with the same
//! arguments always produce the same edge order.
use crate::error::Result;
use candle_core::{Device, Tensor};
use itertools::{iproduct, MultiUnzip};

#[derive(Clone, Debug)]
pub struct EdgeIndex {
    rows: Tensor,
    cols: Tensor,
    // flat index of each edge in the dense `batch_size * n_nodes * n_nodes` layout
    dense_positions: Tensor,
    n_nodes: usize,
    batch_size: usize,
}

/// Host-side enumeration of `(row, col, dense_position)` for a batch.
fn enumerate(n_nodes: usize, batch_size: usize) -> impl Iterator<Item = (u32, u32, u32)> {
    iproduct!(0..batch_size, 0..n_nodes, 0..n_nodes)
        .filter(|(_, i, j)| i != j)
        .map(move |(b, i, j)| {
            let offset = b * n_nodes;
            (
                (offset + i) as u32,
                (offset + j) as u32,
                (offset * n_nodes + i * n_nodes + j) as u32,
            )
        })
}

impl EdgeIndex {
    pub fn fully_connected(n_nodes: usize, batch_size: usize, device: &Device) -> Result<Self> {
        let (rows, cols, dense): (Vec<u32>, Vec<u32>, Vec<u32>) =
            enumerate(n_nodes, batch_size).multiunzip();
        let n_edges = rows.len();

        Ok(Self {
            rows: Tensor::from_vec(rows, n_edges, device)?,
            cols: Tensor::from_vec(cols, n_edges, device)?,
            dense_positions: Tensor::from_vec(dense, n_edges, device)?,
            n_nodes,
            batch_size,
        })
    }

    /// Number of edges in a fully-connected batch, without building it.
    pub fn count(n_nodes: usize, batch_size: usize) -> usize {
        batch_size * n_nodes * n_nodes.saturating_sub(1)
    }

    /// Receiving side: messages of edge `(i, j)` are summed onto `i`.
    pub fn rows(&self) -> &Tensor {
        &self.rows
    }

    pub fn cols(&self) -> &Tensor {
        &self.cols
    }

    pub fn dense_positions(&self) -> &Tensor {
        &self.dense_positions
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_atoms(&self) -> usize {
        self.n_nodes * self.batch_size
    }

    pub fn num_edges(&self) -> usize {
        Self::count(self.n_nodes, self.batch_size)
    }

    pub fn device(&self) -> &Device {
        self.rows.device()
    }

    /// Copy the edge list back to the host as `(row, col)` pairs.
    pub fn pairs(&self) -> Result<Vec<(u32, u32)>> {
        let rows = self.rows.to_vec1::<u32>()?;
        let cols = self.cols.to_vec1::<u32>()?;
        Ok(rows.into_iter().zip(cols).collect())
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            rows: self.rows.to_device(device)?,
            cols: self.cols.to_device(device)?,
            dense_positions: self.dense_positions.to_device(device)?,
            n_nodes: self.n_nodes,
            batch_size: self.batch_size,
        })
    }
}
