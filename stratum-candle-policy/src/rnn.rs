//! Two-stage recurrent stack and its carryable state.
mod base;
mod state;
pub use base::{StackOut, StackedLstm, Unrolling};
pub use state::RnnContext;
