use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`Mlp`](super::Mlp).
pub struct MlpConfig {
    pub(super) units: Vec<usize>,
    pub(super) out_dim: usize,
}

impl MlpConfig {
    /// Creates configuration of MLP with the given hidden units and output width.
    ///
    /// The input width is derived from the stream shape at build time.
    pub fn new(units: Vec<usize>, out_dim: usize) -> Self {
        Self { units, out_dim }
    }
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            units: vec![64],
            out_dim: 64,
        }
    }
}
