use crate::error::{Error, Result};
use crate::readout::AggMode;
use crate::training::Normalization;
use molprop_core::FeatureConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Architecture of an [`Egnn`](crate::Egnn).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EgnnConfig {
    pub in_node_nf: usize,
    pub in_edge_nf: usize,
    pub hidden_nf: usize,
    pub n_layers: usize,
    /// gate edge messages with a learned sigmoid weight
    pub attention: bool,
    /// feed the raw input features into every node update
    pub node_attr: bool,
    pub agg_mode: AggMode,
    pub coords_weight: f64,
}

impl Default for EgnnConfig {
    fn default() -> Self {
        Self::qm9()
    }
}

impl EgnnConfig {
    pub fn qm9() -> Self {
        Self {
            in_node_nf: FeatureConfig::qm9().in_node_nf(),
            in_edge_nf: 0,
            hidden_nf: 128,
            n_layers: 7,
            attention: true,
            node_attr: false,
            agg_mode: AggMode::Sum,
            coords_weight: 1.0,
        }
    }

    /// Width of the node attribute passed to each layer.
    pub fn node_attr_nf(&self) -> usize {
        if self.node_attr {
            self.in_node_nf
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.in_node_nf == 0 {
            return Err(Error::Config("in_node_nf must be positive".into()));
        }
        if self.hidden_nf == 0 {
            return Err(Error::Config("hidden_nf must be positive".into()));
        }
        if self.n_layers == 0 {
            return Err(Error::Config("n_layers must be positive".into()));
        }
        if !self.coords_weight.is_finite() {
            return Err(Error::Config(format!(
                "coords_weight must be finite, got {}",
                self.coords_weight
            )));
        }
        Ok(())
    }
}

/// Optimisation settings for a training run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub lr: f64,
    pub weight_decay: f64,
    pub log_interval: usize,
    pub test_interval: usize,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            batch_size: 96,
            lr: 1e-3,
            weight_decay: 1e-16,
            log_interval: 20,
            test_interval: 1,
            seed: 1,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.log_interval == 0 || self.test_interval == 0 {
            return Err(Error::Config("intervals must be positive".into()));
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::Config(format!("invalid learning rate {}", self.lr)));
        }
        Ok(())
    }
}

/// Everything besides the weights needed to rebuild a trained model.
///
/// Written as JSON next to the safetensors weights file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub model: EgnnConfig,
    pub features: FeatureConfig,
    pub normalization: Normalization,
    pub property: String,
}

impl ModelManifest {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

impl EgnnConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}
