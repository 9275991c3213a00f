//! Embedding, a stack of [`Egcl`] layers, a per-atom decoder and readout.
use super::egcl::Egcl;
use super::feedforward::FeedForward;
use crate::configs::EgnnConfig;
use crate::error::{Error, Result};
use crate::readout::aggregate;
use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use molprop_core::GraphInput;
use tracing::debug;

/// Per-atom model outputs before readout.
#[derive(Clone, Debug)]
pub struct AtomOutput {
    /// `[B*N, 1]`, zero for padding atoms
    pub scalars: Tensor,
    /// `[B*N, 3]` positions after the last layer
    pub positions: Tensor,
}

#[derive(Clone, Debug)]
pub struct Egnn {
    config: EgnnConfig,
    embedding: Linear,
    layers: Vec<Egcl>,
    node_dec: FeedForward,
}

impl Egnn {
    pub fn new(config: &EgnnConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let embedding = linear(config.in_node_nf, config.hidden_nf, vb.pp("embedding"))?;
        let layers = (0..config.n_layers)
            .map(|i| Egcl::load(vb.pp(format!("gcl_{i}")), config))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let node_dec = FeedForward::new(
            vb.pp("node_dec"),
            config.hidden_nf,
            config.hidden_nf,
            1,
            false,
        )?;
        debug!(
            "Built EGNN: {} layers, hidden {}, attention {}, aggregation {}",
            config.n_layers, config.hidden_nf, config.attention, config.agg_mode
        );
        Ok(Self {
            config: config.clone(),
            embedding,
            layers,
            node_dec,
        })
    }

    pub fn config(&self) -> &EgnnConfig {
        &self.config
    }

    /// Per-molecule predictions `[B, 1]`.
    pub fn forward(&self, input: &GraphInput) -> Result<Tensor> {
        let atoms = self.forward_atoms(input)?;
        aggregate(
            &atoms.scalars,
            input.masks.atom(),
            input.batch_size,
            input.n_nodes,
            self.config.agg_mode,
        )
    }

    pub fn forward_atoms(&self, input: &GraphInput) -> Result<AtomOutput> {
        self.check_input(input)?;
        let h0 = &input.nodes;
        let node_attr = self.config.node_attr.then_some(h0);

        let mut h = self.embedding.forward(h0)?;
        let mut x = input.positions.clone();
        for layer in &self.layers {
            let out = layer.forward(
                &h,
                &x,
                &input.edges,
                &input.masks,
                input.edge_attr.as_ref(),
                node_attr,
            )?;
            h = out.h;
            x = out.x;
        }

        let scalars = self.node_dec.forward(&h)?;
        // checkpoint 2
        let scalars = input.masks.mask_atoms(&scalars)?;
        Ok(AtomOutput {
            scalars,
            positions: x,
        })
    }

    fn check_input(&self, input: &GraphInput) -> Result<()> {
        let width = input.nodes.dim(1)?;
        if width != self.config.in_node_nf {
            return Err(Error::Config(format!(
                "node features have width {width}, model expects in_node_nf = {}",
                self.config.in_node_nf
            )));
        }
        match (&input.edge_attr, self.config.in_edge_nf) {
            (None, 0) => Ok(()),
            (Some(attr), nf) if nf > 0 && attr.dims() == [input.edges.num_edges(), nf] => {
                Ok(())
            }
            (Some(attr), nf) => Err(Error::Config(format!(
                "edge attributes have shape {:?}, model expects [{}, {nf}]",
                attr.dims(),
                input.edges.num_edges()
            ))),
            (None, nf) => Err(Error::Config(format!(
                "model expects {nf} edge attributes per edge but none were given"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use molprop_core::{FeatureConfig, MoleculeBatch};

    fn tiny_config() -> EgnnConfig {
        EgnnConfig {
            hidden_nf: 16,
            n_layers: 2,
            ..EgnnConfig::qm9()
        }
    }

    fn water_and_hf(device: &Device) -> Result<MoleculeBatch> {
        let positions = Tensor::new(
            &[
                [[0f32, 0., 0.117], [0., 0.757, -0.469], [0., -0.757, -0.469]],
                [[0., 0., 0.093], [0., 0., -0.841], [0., 0., 0.]],
            ],
            device,
        )?;
        let atom_mask = Tensor::new(&[[1f32, 1., 1.], [1., 1., 0.]], device)?;
        let one_hot = Tensor::new(
            &[
                [[0f32, 0., 0., 1., 0.], [1., 0., 0., 0., 0.], [1., 0., 0., 0., 0.]],
                [[0., 0., 0., 0., 1.], [1., 0., 0., 0., 0.], [0., 0., 0., 0., 0.]],
            ],
            device,
        )?;
        let charges = Tensor::new(&[[8f32, 1., 1.], [9., 1., 0.]], device)?;
        let target = Tensor::new(&[-0.29f32, -0.44], device)?;
        Ok(MoleculeBatch::from_atom_mask(
            positions, atom_mask, one_hot, charges, target,
        )?)
    }

    #[test]
    fn test_parameter_layout() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Egnn::new(&tiny_config(), vb)?;
        let data = varmap.data().lock().unwrap();
        for name in [
            "embedding.weight",
            "gcl_0.edge_mlp.0.weight",
            "gcl_0.edge_mlp.2.bias",
            "gcl_1.att_mlp.0.weight",
            "gcl_1.coord_mlp.2.weight",
            "gcl_1.node_mlp.2.weight",
            "node_dec.2.bias",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
        assert!(!data.contains_key("gcl_2.edge_mlp.0.weight"));
        assert!(!data.contains_key("gcl_0.coord_mlp.2.bias"));
        assert_eq!(data["gcl_0.edge_mlp.0.weight"].as_tensor().dims(), &[16, 33]);
        Ok(())
    }

    #[test]
    fn test_forward_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Egnn::new(&tiny_config(), vb)?;
        let input = water_and_hf(&device)?.graph_input(&FeatureConfig::qm9())?;

        let atoms = model.forward_atoms(&input)?;
        assert_eq!(atoms.scalars.dims(), &[6, 1]);
        assert_eq!(atoms.positions.dims(), &[6, 3]);
        let padded = atoms.scalars.narrow(0, 5, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(padded, vec![0.]);

        assert_eq!(model.forward(&input)?.dims(), &[2, 1]);
        Ok(())
    }

    #[test]
    fn test_node_attr_widens_node_mlp() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = EgnnConfig {
            node_attr: true,
            ..tiny_config()
        };
        let model = Egnn::new(&config, vb)?;
        assert_eq!(
            varmap.data().lock().unwrap()["gcl_0.node_mlp.0.weight"]
                .as_tensor()
                .dims(),
            &[16, 47]
        );
        let input = water_and_hf(&device)?.graph_input(&FeatureConfig::qm9())?;
        assert_eq!(model.forward(&input)?.dims(), &[2, 1]);
        Ok(())
    }

    #[test]
    fn test_feature_width_mismatch() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = Egnn::new(&tiny_config(), vb)?;
        let features = FeatureConfig {
            charge_power: 1,
            ..FeatureConfig::qm9()
        };
        let input = water_and_hf(&device)?.graph_input(&features)?;
        assert!(matches!(model.forward(&input), Err(Error::Config(_))));
        Ok(())
    }

    #[test]
    fn test_missing_edge_attributes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = EgnnConfig {
            in_edge_nf: 2,
            ..tiny_config()
        };
        let model = Egnn::new(&config, vb)?;
        let input = water_and_hf(&device)?.graph_input(&FeatureConfig::qm9())?;
        assert!(matches!(model.forward(&input), Err(Error::Config(_))));

        let attr = Tensor::ones((input.edges.num_edges(), 2), DType::F32, &device)?;
        let input = input.with_edge_attr(attr);
        assert_eq!(model.forward(&input)?.dims(), &[2, 1]);
        Ok(())
    }
}
