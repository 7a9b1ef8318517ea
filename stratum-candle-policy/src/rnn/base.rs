use super::RnnContext;
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::ops::Dropout;
use candle_nn::rnn::{lstm, LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};
use stratum_core::error::PolicyError;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
/// Unrolling mode of the recurrent layers.
///
/// Both modes produce identical outputs; `Static` declares a fixed upper
/// bound on sequence length at construction and rejects longer sequences,
/// `Dynamic` accepts any length.
pub enum Unrolling {
    /// Bounded sequence length, checked on every forward pass.
    Static {
        /// Largest accepted sequence length.
        max_seq_len: usize,
    },

    /// Unbounded sequence length.
    Dynamic,
}

/// Output of one pass through the stack.
#[derive(Debug)]
pub struct StackOut {
    /// First-layer output, `[batch, time, hidden_1]`.
    pub out_1: Tensor,

    /// Second-layer output, `[batch, time, hidden_2]`.
    pub out_2: Tensor,

    /// Final state of both layers, to be carried by the caller.
    pub state_out: RnnContext,
}

/// Two sequential LSTM layers with distinct inputs.
///
/// The first layer conditions on reward history; the second on state, action
/// and internal history plus the first layer's output. The caller assembles
/// the first-layer input and the second-layer base input (everything except
/// the first-layer output, which this stack appends itself).
pub struct StackedLstm {
    lstm_1: LSTM,
    lstm_2: LSTM,
    hidden: (usize, usize),
    unrolling: Unrolling,
    dropout: Option<Dropout>,
}

impl StackedLstm {
    /// Builds both layers under the `lstm_1`/`lstm_2` parameter paths.
    ///
    /// `in_dim_2` counts the full second-layer input including the first
    /// layer's output width. `dropout_keep_prob` must already be validated
    /// to lie in `(0, 1]`.
    pub fn build(
        vb: &VarBuilder,
        in_dim_1: usize,
        in_dim_2: usize,
        hidden: (usize, usize),
        unrolling: Unrolling,
        dropout_keep_prob: f64,
    ) -> Result<Self> {
        let lstm_1 = lstm(in_dim_1, hidden.0, LSTMConfig::default(), vb.pp("lstm_1"))?;
        let lstm_2 = lstm(in_dim_2, hidden.1, LSTMConfig::default(), vb.pp("lstm_2"))?;
        let dropout = if dropout_keep_prob < 1.0 {
            Some(Dropout::new((1.0 - dropout_keep_prob) as f32))
        } else {
            None
        };

        Ok(Self {
            lstm_1,
            lstm_2,
            hidden,
            unrolling,
            dropout,
        })
    }

    /// Hidden widths of both layers.
    pub fn hidden_dims(&self) -> (usize, usize) {
        self.hidden
    }

    /// Zero state for both layers.
    pub fn zero_context(&self, batch_size: usize) -> Result<RnnContext> {
        Ok(RnnContext {
            state_1: self.lstm_1.zero_state(batch_size)?,
            state_2: self.lstm_2.zero_state(batch_size)?,
        })
    }

    fn run_layer(
        lstm: &LSTM,
        xs: &Tensor,
        init: &LSTMState,
        seq_len: usize,
    ) -> Result<(Tensor, LSTMState)> {
        let states = lstm.seq_init(xs, init)?;
        let out = lstm.states_to_tensor(&states)?;
        // seq_len >= 1 was checked by the caller.
        let last = states[seq_len - 1].clone();
        Ok((out, last))
    }

    /// Runs both layers over `[batch, time, features]` inputs.
    ///
    /// `seq_len` is supplied explicitly by the caller and checked against the
    /// tensors' time dimension. `in_2_base` is the second-layer input without
    /// the first-layer output. Output dropout applies only when `train` is
    /// set.
    pub fn forward(
        &self,
        in_1: &Tensor,
        in_2_base: &Tensor,
        ctx: &RnnContext,
        seq_len: usize,
        train: bool,
    ) -> Result<StackOut> {
        let (batch_size, time, _) = in_1.dims3()?;
        if seq_len == 0 || time != seq_len {
            return Err(PolicyError::ShapeMismatch(format!(
                "sequence length {} does not match input time dimension {}",
                seq_len, time
            ))
            .into());
        }
        if let Unrolling::Static { max_seq_len } = self.unrolling {
            if seq_len > max_seq_len {
                return Err(PolicyError::ShapeMismatch(format!(
                    "sequence of {} steps exceeds the static unrolling bound {}",
                    seq_len, max_seq_len
                ))
                .into());
            }
        }
        if ctx.batch_size() != batch_size {
            return Err(PolicyError::ShapeMismatch(format!(
                "recurrent state batch {} does not match input batch {}",
                ctx.batch_size(),
                batch_size
            ))
            .into());
        }

        let (out_1, state_1) = Self::run_layer(&self.lstm_1, in_1, &ctx.state_1, seq_len)?;
        let out_1 = self.dropped(out_1, train)?;

        let in_2 = Tensor::cat(&[in_2_base, &out_1], D::Minus1)?;
        let (out_2, state_2) = Self::run_layer(&self.lstm_2, &in_2, &ctx.state_2, seq_len)?;
        let out_2 = self.dropped(out_2, train)?;

        Ok(StackOut {
            out_1,
            out_2,
            state_out: RnnContext { state_1, state_2 },
        })
    }

    fn dropped(&self, xs: Tensor, train: bool) -> Result<Tensor> {
        match &self.dropout {
            Some(dropout) => Ok(dropout.forward(&xs, train)?),
            None => Ok(xs),
        }
    }
}
