use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::LSTMState;
use stratum_core::error::PolicyError;

/// Recurrent state of both LSTM layers.
///
/// Owned by the caller (the worker loop) between steps: step N's final state
/// is step N+1's initial state. The policy never stores it.
#[derive(Debug, Clone)]
pub struct RnnContext {
    /// State of the first layer (reward-conditioned).
    pub state_1: LSTMState,

    /// State of the second layer (action/internal-conditioned).
    pub state_2: LSTMState,
}

impl RnnContext {
    /// Zero state for both layers with the given batch dimension.
    pub fn zero(
        batch_size: usize,
        hidden: (usize, usize),
        device: &Device,
    ) -> Result<Self> {
        let state = |n: usize| -> Result<LSTMState> {
            Ok(LSTMState {
                h: Tensor::zeros((batch_size, n), DType::F32, device)?,
                c: Tensor::zeros((batch_size, n), DType::F32, device)?,
            })
        };
        Ok(Self {
            state_1: state(hidden.0)?,
            state_2: state(hidden.1)?,
        })
    }

    /// Leading batch dimension of the stored state.
    pub fn batch_size(&self) -> usize {
        self.state_1.h().dims()[0]
    }

    /// Flattened `[h1, c1, h2, c2]` form for feeding/fetching across calls.
    pub fn flatten(&self) -> Vec<Tensor> {
        vec![
            self.state_1.h().clone(),
            self.state_1.c().clone(),
            self.state_2.h().clone(),
            self.state_2.c().clone(),
        ]
    }

    /// Rebuilds a context from the flattened `[h1, c1, h2, c2]` form.
    pub fn unflatten(parts: &[Tensor]) -> Result<Self> {
        match parts {
            [h1, c1, h2, c2] => Ok(Self {
                state_1: LSTMState {
                    h: h1.clone(),
                    c: c1.clone(),
                },
                state_2: LSTMState {
                    h: h2.clone(),
                    c: c2.clone(),
                },
            }),
            _ => Err(PolicyError::ShapeMismatch(format!(
                "flattened context must hold 4 tensors, got {}",
                parts.len()
            ))
            .into()),
        }
    }
}
