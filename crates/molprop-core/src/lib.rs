//! molprop-core
//!
//! Tensor plumbing shared by the molecular property models:
//!
//! - atom feature expansion from one-hot species and nuclear charges
//! - fully-connected edge lists for padded molecule batches
//! - atom / edge masks
//! - the padded [`MoleculeBatch`] container and its flattened [`GraphInput`]
//!
pub mod batch;
pub mod edges;
pub mod error;
pub mod features;
pub mod masks;

pub use batch::{GraphInput, MoleculeBatch};
pub use edges::EdgeIndex;
pub use error::{Error, Result};
pub use features::{preprocess_input, FeatureConfig};
pub use masks::{dense_edge_mask, Masks};
