use super::MlpConfig;
use crate::model::StateEncoder;
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use stratum_core::error::PolicyError;

/// Returns vector of linear modules from [`MlpConfig`].
fn create_linear_layers(vb: VarBuilder, in_dim: usize, config: &MlpConfig) -> Result<Vec<Linear>> {
    let mut dims = vec![in_dim];
    dims.extend_from_slice(&config.units);
    dims.push(config.out_dim);

    let mut layers = Vec::with_capacity(dims.len() - 1);
    for i in 0..dims.len() - 1 {
        layers.push(linear(dims[i], dims[i + 1], vb.pp(format!("ln{}", i)))?);
    }
    Ok(layers)
}

/// Multilayer perceptron with ReLU activation between layers.
///
/// Flattens each row's feature shape before the first layer.
pub struct Mlp {
    layers: Vec<Linear>,
    out_dim: usize,
}

impl StateEncoder for Mlp {
    type Config = MlpConfig;

    fn build(vb: VarBuilder, config: MlpConfig, in_shape: &[usize]) -> Result<Self> {
        let in_dim = in_shape.iter().product();
        let out_dim = config.out_dim;
        let layers = create_linear_layers(vb, in_dim, &config)?;

        Ok(Self { layers, out_dim })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        if xs.dims().len() < 2 {
            return Err(PolicyError::ShapeMismatch(format!(
                "encoder input must be [rows, ..features], got {:?}",
                xs.dims()
            ))
            .into());
        }
        let mut xs = xs.flatten_from(1)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            xs = layer.forward(&xs)?;
            if i < last {
                xs = xs.relu()?;
            }
        }
        Ok(xs)
    }

    fn out_dim(&self) -> usize {
        self.out_dim
    }
}
