//! molprop-egnn
//!
//! E(n)-equivariant graph neural network for molecular property regression.
//!
//! - [`Egnn`]: embedding, a stack of [`Egcl`] layers, a per-atom decoder and a
//!   masked per-molecule readout
//! - [`Trainer`]: L1 training / evaluation steps with AdamW and cosine
//!   annealing
//! - [`MoleculeDataset`]: safetensors batch files
//!
//! ```shell
//! cargo run --bin molprop -- train --train qm9_train.safetensors --property homo
//! cargo run --bin molprop --features metal -- train --train qm9_train.safetensors
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::Device;
use tracing::warn;

pub use configs::{EgnnConfig, ModelManifest, TrainingConfig};
pub use dataset::{MoleculeDataset, Qm9Property};
pub use error::{Error, Result};
pub use model::egcl::{Egcl, EgclOutput};
pub use model::egnn::{AtomOutput, Egnn};
pub use readout::{aggregate, AggMode};
pub use training::scheduler::CosineAnnealing;
pub use training::trainer::{evaluate, Trainer};
pub use training::{Normalization, Partition};

pub mod configs;
pub mod dataset;
pub mod error;
pub mod model;
pub mod readout;
pub mod training;

pub fn device(cpu: bool) -> candle_core::Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            warn!("Running on CPU, to run on GPU(metal), build with `--features metal`");
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            warn!("Running on CPU, to run on GPU, build with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}
