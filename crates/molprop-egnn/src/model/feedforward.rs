use candle_core::{Module, Result, Tensor};
use candle_nn::{init::Init, linear, Linear, VarBuilder};

/// `Linear -> SiLU -> Linear`, optionally followed by another SiLU.
///
/// Layers live under `0` and `2`, the indices they take in an
/// `nn.Sequential(Linear, SiLU, Linear)`.
#[derive(Clone, Debug)]
pub struct FeedForward {
    w_in: Linear,
    w_out: Linear,
    act_out: bool,
}

impl FeedForward {
    pub fn new(
        vb: VarBuilder,
        dim_input: usize,
        dim_hidden: usize,
        dim_output: usize,
        act_out: bool,
    ) -> Result<Self> {
        let w_in = linear(dim_input, dim_hidden, vb.pp("0"))?;
        let w_out = linear(dim_hidden, dim_output, vb.pp("2"))?;
        Ok(Self {
            w_in,
            w_out,
            act_out,
        })
    }

    /// Scalar head for coordinate updates.
    ///
    /// The output layer has no bias and is initialised xavier-uniform with
    /// gain 0.001 so freshly initialised layers barely move the atoms.
    pub fn coordinate_head(vb: VarBuilder, dim: usize) -> Result<Self> {
        let w_in = linear(dim, dim, vb.pp("0"))?;
        let bound = 0.001 * (6.0 / (dim + 1) as f64).sqrt();
        let weight = vb.pp("2").get_with_hints(
            (1, dim),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        Ok(Self {
            w_in,
            w_out: Linear::new(weight, None),
            act_out: false,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.w_in.forward(x)?.silu()?;
        let x = self.w_out.forward(&x)?;
        if self.act_out {
            x.silu()
        } else {
            Ok(x)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_parameter_names() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        FeedForward::new(vb.pp("mlp"), 4, 8, 2, true)?;
        FeedForward::coordinate_head(vb.pp("coord"), 8)?;
        let data = varmap.data().lock().unwrap();
        let mut names: Vec<_> = data.keys().cloned().collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "coord.0.bias",
                "coord.0.weight",
                "coord.2.weight",
                "mlp.0.bias",
                "mlp.0.weight",
                "mlp.2.bias",
                "mlp.2.weight",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_coordinate_head_is_small() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        FeedForward::coordinate_head(vb, 16)?;
        let data = varmap.data().lock().unwrap();
        let weight = data["2.weight"].as_tensor().abs()?.max_all()?;
        let bound = 0.001 * (6f32 / 17.0).sqrt();
        assert!(weight.to_scalar::<f32>()? <= bound);
        Ok(())
    }
}
