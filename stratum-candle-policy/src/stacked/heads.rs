//! Dense head networks and action sampling.
use crate::util::one_hot;
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::{linear, Linear, Module, VarBuilder};
use rand::{rngs::SmallRng, Rng};

const RP_HIDDEN: usize = 128;

/// Policy and value heads over the recurrent outputs.
///
/// `Split` reads logits off the first layer and the value off the second;
/// `Fused` reads both off the second layer and builds no first-layer head.
pub(super) enum Heads {
    Split { pi: Linear, v: Linear },
    Fused { pi: Linear, v: Linear },
}

impl Heads {
    pub(super) fn build(
        vb: &VarBuilder,
        shared_p_v: bool,
        hidden: (usize, usize),
        action_depth: usize,
    ) -> Result<Self> {
        if shared_p_v {
            let vb = vb.pp("dense_pi_vfn");
            Ok(Self::Fused {
                pi: linear(hidden.1, action_depth, vb.pp("action"))?,
                v: linear(hidden.1, 1, vb.pp("value"))?,
            })
        } else {
            Ok(Self::Split {
                pi: linear(hidden.0, action_depth, vb.pp("dense_pi").pp("action"))?,
                v: linear(hidden.1, 1, vb.pp("dense_vfn").pp("value"))?,
            })
        }
    }

    /// Returns `(logits, value)` from the flattened stage outputs.
    pub(super) fn forward(&self, flat_1: &Tensor, flat_2: &Tensor) -> Result<(Tensor, Tensor)> {
        let (logits, value) = match self {
            Self::Split { pi, v } => (pi.forward(flat_1)?, v.forward(flat_2)?),
            Self::Fused { pi, v } => (pi.forward(flat_2)?, v.forward(flat_2)?),
        };
        Ok((logits, value.squeeze(D::Minus1)?))
    }
}

/// Draws one categorical sample per logits row, one-hot encoded.
///
/// Sampling happens outside the computation graph (the detached probabilities
/// leave the device), so it contributes no gradient, and it is reproducible
/// given the same logits and rng state.
pub fn categorical_sample(logits: &Tensor, rng: &mut SmallRng) -> Result<Tensor> {
    let depth = logits.dims()[logits.dims().len() - 1];
    let probs = softmax(&logits.detach(), D::Minus1)?;
    let rows: Vec<Vec<f32>> = probs.to_vec2()?;

    let mut samples = Vec::with_capacity(rows.len());
    for row in rows.iter() {
        let u: f32 = rng.gen();
        let mut acc = 0f32;
        let mut chosen = depth - 1;
        for (i, p) in row.iter().enumerate() {
            acc += p;
            if u < acc {
                chosen = i;
                break;
            }
        }
        samples.push(chosen as u32);
    }

    one_hot(&samples, depth, logits.device())
}

/// Reward-prediction head: a dense network over a flattened window of
/// encoded `external` features, producing logits over the discrete
/// reward-outcome classes.
pub(super) struct RewardPredictionHead {
    l0: Linear,
    l1: Linear,
    classes: usize,
}

impl RewardPredictionHead {
    pub(super) fn build(vb: &VarBuilder, in_dim: usize, classes: usize) -> Result<Self> {
        let vb = vb.pp("dense_rp");
        Ok(Self {
            l0: linear(in_dim, RP_HIDDEN, vb.pp("ln0"))?,
            l1: linear(RP_HIDDEN, classes, vb.pp("ln1"))?,
            classes,
        })
    }

    pub(super) fn classes(&self) -> usize {
        self.classes
    }

    pub(super) fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.l0.forward(xs)?.relu()?;
        Ok(self.l1.forward(&xs)?)
    }
}
