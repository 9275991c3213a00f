//! E(n)-equivariant graph convolutional layer.
use super::feedforward::FeedForward;
use crate::configs::EgnnConfig;
use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};
use molprop_core::{EdgeIndex, Masks};

#[derive(Clone, Debug)]
pub struct EgclOutput {
    /// `[N, hidden_nf]`
    pub h: Tensor,
    /// `[N, 3]`
    pub x: Tensor,
    /// `[E, hidden_nf]` masked messages
    pub edge_feat: Tensor,
}

#[derive(Clone, Debug)]
pub struct Egcl {
    edge_mlp: FeedForward,
    att_mlp: Option<Linear>,
    coord_mlp: FeedForward,
    node_mlp: FeedForward,
    coords_weight: f64,
}

impl Egcl {
    pub fn load(vb: VarBuilder, config: &EgnnConfig) -> Result<Self> {
        let hidden = config.hidden_nf;
        let edge_in = 2 * hidden + 1 + config.in_edge_nf;
        let node_in = 2 * hidden + config.node_attr_nf();

        let edge_mlp = FeedForward::new(vb.pp("edge_mlp"), edge_in, hidden, hidden, true)?;
        let att_mlp = if config.attention {
            Some(linear(hidden, 1, vb.pp("att_mlp").pp("0"))?)
        } else {
            None
        };
        let coord_mlp = FeedForward::coordinate_head(vb.pp("coord_mlp"), hidden)?;
        let node_mlp = FeedForward::new(vb.pp("node_mlp"), node_in, hidden, hidden, false)?;

        Ok(Self {
            edge_mlp,
            att_mlp,
            coord_mlp,
            node_mlp,
            coords_weight: config.coords_weight,
        })
    }

    pub fn forward(
        &self,
        h: &Tensor,
        x: &Tensor,
        edges: &EdgeIndex,
        masks: &Masks,
        edge_attr: Option<&Tensor>,
        node_attr: Option<&Tensor>,
    ) -> Result<EgclOutput> {
        let (radial, coord_diff) = coord2radial(x, edges)?;
        let edge_feat = self.edge_model(h, &radial, edges, edge_attr)?;
        // checkpoint 1
        let edge_feat = masks.mask_edges(&edge_feat)?;
        let x = self.coord_model(x, &coord_diff, &edge_feat, edges, masks)?;
        let h = self.node_model(h, &edge_feat, edges, node_attr)?;
        Ok(EgclOutput { h, x, edge_feat })
    }

    fn edge_model(
        &self,
        h: &Tensor,
        radial: &Tensor,
        edges: &EdgeIndex,
        edge_attr: Option<&Tensor>,
    ) -> Result<Tensor> {
        let source = h.index_select(edges.rows(), 0)?;
        let target = h.index_select(edges.cols(), 0)?;
        let mut parts = vec![&source, &target, radial];
        if let Some(attr) = edge_attr {
            parts.push(attr);
        }
        let m = self.edge_mlp.forward(&Tensor::cat(&parts, D::Minus1)?)?;
        match &self.att_mlp {
            Some(att) => {
                let gate = candle_nn::ops::sigmoid(&att.forward(&m)?)?;
                m.broadcast_mul(&gate)
            }
            None => Ok(m),
        }
    }

    fn coord_model(
        &self,
        x: &Tensor,
        coord_diff: &Tensor,
        edge_feat: &Tensor,
        edges: &EdgeIndex,
        masks: &Masks,
    ) -> Result<Tensor> {
        let trans = coord_diff.broadcast_mul(&self.coord_mlp.forward(edge_feat)?)?;
        // coord_mlp(0) is its first-layer bias, so padding edges need masking here too
        let trans = masks.mask_edges(&trans)?;
        let agg = segment_sum(&trans, edges.rows(), x.dim(0)?)?;
        x + agg.affine(self.coords_weight, 0.0)?
    }

    fn node_model(
        &self,
        h: &Tensor,
        edge_feat: &Tensor,
        edges: &EdgeIndex,
        node_attr: Option<&Tensor>,
    ) -> Result<Tensor> {
        let agg = segment_sum(edge_feat, edges.rows(), h.dim(0)?)?;
        let input = match node_attr {
            Some(attr) => Tensor::cat(&[h, &agg, attr], D::Minus1)?,
            None => Tensor::cat(&[h, &agg], D::Minus1)?,
        };
        h + self.node_mlp.forward(&input)?
    }
}

/// Squared distances `[E, 1]` and raw differences `x_i - x_j` `[E, 3]`.
pub fn coord2radial(x: &Tensor, edges: &EdgeIndex) -> Result<(Tensor, Tensor)> {
    let coord_diff = (x.index_select(edges.rows(), 0)? - x.index_select(edges.cols(), 0)?)?;
    let radial = coord_diff.sqr()?.sum_keepdim(D::Minus1)?;
    Ok((radial, coord_diff))
}

/// Sum `data` rows into `num_segments` buckets given by `segment_ids`.
pub fn segment_sum(data: &Tensor, segment_ids: &Tensor, num_segments: usize) -> Result<Tensor> {
    let zeros = Tensor::zeros((num_segments, data.dim(1)?), DType::F32, data.device())?
        .to_dtype(data.dtype())?;
    zeros.index_add(segment_ids, data, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn small_config(attention: bool) -> EgnnConfig {
        EgnnConfig {
            in_node_nf: 3,
            hidden_nf: 8,
            n_layers: 1,
            attention,
            ..EgnnConfig::qm9()
        }
    }

    #[test]
    fn test_segment_sum() -> Result<()> {
        let device = Device::Cpu;
        let data = Tensor::new(&[[1f32, 1.], [2., 2.], [4., 4.]], &device)?;
        let ids = Tensor::new(&[0u32, 2, 0], &device)?;
        let out = segment_sum(&data, &ids, 3)?;
        assert_eq!(
            out.to_vec2::<f32>()?,
            vec![vec![5., 5.], vec![0., 0.], vec![2., 2.]]
        );
        Ok(())
    }

    #[test]
    fn test_coord2radial() -> Result<()> {
        let device = Device::Cpu;
        let edges = EdgeIndex::fully_connected(2, 1, &device)?;
        let x = Tensor::new(&[[0f32, 0., 0.], [1., 2., 2.]], &device)?;
        let (radial, diff) = coord2radial(&x, &edges)?;
        assert_eq!(radial.to_vec2::<f32>()?, vec![vec![9.], vec![9.]]);
        assert_eq!(
            diff.to_vec2::<f32>()?,
            vec![vec![-1., -2., -2.], vec![1., 2., 2.]]
        );
        Ok(())
    }

    #[test]
    fn test_padding_atom_is_inert() -> Result<()> {
        let device = Device::Cpu;
        for attention in [true, false] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let layer = Egcl::load(vb, &small_config(attention))?;

            let edges = EdgeIndex::fully_connected(3, 1, &device)?;
            let atom_mask = Tensor::new(&[[1f32, 1., 0.]], &device)?;
            let masks = Masks::from_atom_mask(&atom_mask, &edges)?;
            let h = Tensor::randn(0f32, 1., (3, 8), &device)?;
            let x = Tensor::new(&[[0f32, 0., 0.], [1., 0., 0.], [3., 3., 3.]], &device)?;
            let out = layer.forward(&h, &x, &edges, &masks, None, None)?;
            assert_eq!(out.h.dims(), &[3, 8]);
            assert_eq!(out.edge_feat.dims(), &[6, 8]);

            // moving the padding atom changes nothing for the real ones
            let moved = Tensor::new(&[[0f32, 0., 0.], [1., 0., 0.], [-7., 2., 9.]], &device)?;
            let out_moved = layer.forward(&h, &moved, &edges, &masks, None, None)?;
            let diff = (out.h.narrow(0, 0, 2)? - out_moved.h.narrow(0, 0, 2)?)?
                .abs()?
                .max_all()?
                .to_scalar::<f32>()?;
            assert!(diff < 1e-6);
            let padded_x = out.x.narrow(0, 2, 1)?.to_vec2::<f32>()?;
            assert_eq!(padded_x, vec![vec![3., 3., 3.]]);
        }
        Ok(())
    }
}
