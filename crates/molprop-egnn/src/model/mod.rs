//! EGNN layers.
//!
//! Parameter names mirror the reference PyTorch layout (`gcl_0.edge_mlp.0`,
//! `node_dec.2`, ...) so weights can be exchanged with it.
pub mod egcl;
pub mod egnn;
pub mod feedforward;
