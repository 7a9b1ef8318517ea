use super::Cnn1dConfig;
use crate::model::StateEncoder;
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::{
    conv::Conv1dConfig, conv1d, linear, Conv1d, Linear, Module, VarBuilder,
};
use stratum_core::error::PolicyError;

/// 1-d convolutional encoder over per-step market windows.
///
/// Expects rows of shape `[window, channels]` (or `[window]` for a single
/// channel): a strided convolution stack with ReLU, flattened and projected
/// to `out_dim`.
#[derive(Debug)]
pub struct Cnn1d {
    convs: Vec<Conv1d>,
    head: Linear,
    channels: usize,
    out_dim: usize,
}

impl Cnn1d {
    fn stride(s: usize) -> Conv1dConfig {
        Conv1dConfig {
            stride: s,
            ..Default::default()
        }
    }

    fn conv_out_len(len: usize, filter_size: usize, stride: usize) -> Option<usize> {
        if len < filter_size {
            None
        } else {
            Some((len - filter_size) / stride + 1)
        }
    }
}

impl StateEncoder for Cnn1d {
    type Config = Cnn1dConfig;

    fn build(vb: VarBuilder, config: Cnn1dConfig, in_shape: &[usize]) -> Result<Self> {
        let (window, channels) = match in_shape {
            [window] => (*window, 1),
            [window, channels] => (*window, *channels),
            _ => {
                return Err(PolicyError::InvalidConfig(format!(
                    "convolutional encoder expects a [window] or [window, channels] stream, got {:?}",
                    in_shape
                ))
                .into())
            }
        };
        if config.num_filters.is_empty() {
            return Err(PolicyError::InvalidConfig("num_filters must not be empty".into()).into());
        }

        let mut convs = Vec::with_capacity(config.num_filters.len());
        let mut len = window;
        let mut in_ch = channels;
        for (i, &out_ch) in config.num_filters.iter().enumerate() {
            len = Self::conv_out_len(len, config.filter_size, config.stride).ok_or_else(|| {
                PolicyError::InvalidConfig(format!(
                    "window of {} steps is too short for {} convolution layers",
                    window,
                    config.num_filters.len()
                ))
            })?;
            convs.push(conv1d(
                in_ch,
                out_ch,
                config.filter_size,
                Self::stride(config.stride),
                vb.pp(format!("c{}", i)),
            )?);
            in_ch = out_ch;
        }

        let head = linear(in_ch * len, config.out_dim, vb.pp("l0"))?;

        Ok(Self {
            convs,
            head,
            channels,
            out_dim: config.out_dim,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = match xs.dims().len() {
            2 if self.channels == 1 => xs.unsqueeze(D::Minus1)?,
            3 => xs.clone(),
            _ => {
                return Err(PolicyError::ShapeMismatch(format!(
                    "expected [rows, window] or [rows, window, channels], got {:?}",
                    xs.dims()
                ))
                .into())
            }
        };
        // Conv1d wants [rows, channels, window].
        let mut xs = xs.transpose(1, 2)?.contiguous()?;
        for conv in self.convs.iter() {
            xs = conv.forward(&xs)?.relu()?;
        }
        let xs = xs.flatten_from(1)?;
        Ok(self.head.forward(&xs)?)
    }

    fn out_dim(&self) -> usize {
        self.out_dim
    }
}
