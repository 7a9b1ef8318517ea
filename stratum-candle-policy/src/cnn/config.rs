use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Cnn1d`](super::Cnn1d).
pub struct Cnn1dConfig {
    pub(super) num_filters: Vec<usize>,
    pub(super) filter_size: usize,
    pub(super) stride: usize,
    pub(super) out_dim: usize,
}

impl Cnn1dConfig {
    /// Creates configuration of the convolutional encoder.
    pub fn new(num_filters: Vec<usize>, filter_size: usize, stride: usize, out_dim: usize) -> Self {
        Self {
            num_filters,
            filter_size,
            stride,
            out_dim,
        }
    }
}

impl Default for Cnn1dConfig {
    fn default() -> Self {
        Self {
            num_filters: vec![32, 32, 64, 64],
            filter_size: 3,
            stride: 2,
            out_dim: 256,
        }
    }
}
