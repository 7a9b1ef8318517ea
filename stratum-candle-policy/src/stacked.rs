//! Stacked-LSTM actor-critic policy.
//!
//! A dual-stream, two-stage recurrent policy in the lineage of the NAV-A3C
//! agent (Mirowski et al., <https://arxiv.org/pdf/1611.03673.pdf>) and
//! "Learning to reinforcement learn" (Wang et al.,
//! <https://arxiv.org/pdf/1611.05763.pdf>), with optional RL²-style context
//! carryover (Duan et al., <https://arxiv.org/pdf/1611.02779.pdf>).
mod aggregator;
mod base;
mod config;
mod context;
mod heads;
pub use aggregator::{ModeInput, ObsInput};
pub use base::{AuxTask, PolicyForward, PolicyOutput, RolloutInput, StackedLstmPolicy};
pub use config::{ContextResetConfig, StackedLstmConfig};
pub use context::{ContextReset, ResetAlways, TrialCarryover};
pub use heads::categorical_sample;
