//! Interface of the neural-network building blocks composed into policy graphs.
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::VarBuilder;

/// A state encoder mapping one raw observation stream to a feature vector.
///
/// Encoders do not own parameters: they are built from a [`VarBuilder`]
/// rooted in the policy's `VarMap`, so building twice from the same parameter
/// path yields the same tensors. This is how forward passes stay weight-tied.
///
/// [`VarBuilder`]: https://docs.rs/candle-nn/0.8.4/candle_nn/var_builder/type.VarBuilder.html
pub trait StateEncoder {
    /// Configuration from which the encoder is constructed.
    type Config: Clone;

    /// Builds the encoder for one stream of per-step shape `in_shape`.
    fn build(vb: VarBuilder, config: Self::Config, in_shape: &[usize]) -> Result<Self>
    where
        Self: Sized;

    /// Maps `[rows, ..in_shape]` to `[rows, out_dim]`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor>;

    /// Width of the encoded feature vector.
    fn out_dim(&self) -> usize;
}
