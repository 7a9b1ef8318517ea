//! Episode-boundary handling of recurrent context.
use crate::rnn::RnnContext;
use anyhow::Result;
use stratum_core::{error::PolicyError, EpisodeMetadata};

/// Strategy deciding whether recurrent state is reset or carried forward at
/// an episode boundary.
///
/// One strategy instance belongs to exactly one policy instance; its counters
/// are not safe for concurrent callers.
pub trait ContextReset {
    /// Returns the initial context for a new episode.
    ///
    /// `prev` is the final context of the previous episode, if any; `zero` is
    /// a freshly built zero state for both layers.
    fn initial_context(
        &mut self,
        meta: Option<&EpisodeMetadata>,
        prev: Option<&RnnContext>,
        zero: RnnContext,
    ) -> Result<RnnContext>;
}

/// Zeroes both layers at every episode start.
pub struct ResetAlways;

impl ContextReset for ResetAlways {
    fn initial_context(
        &mut self,
        _meta: Option<&EpisodeMetadata>,
        _prev: Option<&RnnContext>,
        zero: RnnContext,
    ) -> Result<RnnContext> {
        Ok(zero)
    }
}

/// RL²-style carryover: the first layer restarts from zero every episode,
/// the second keeps its state across episodes of the same trial.
///
/// A fresh second-layer state is forced when any of these holds: no previous
/// context was supplied, the trial identifier changed, the episode is a test
/// episode, or the running episode counter hits the configured period.
pub struct TrialCarryover {
    lstm_2_init_period: usize,
    current_trial_num: i64,
    current_ep_num: usize,
}

impl TrialCarryover {
    /// Creates the strategy with the given forced-reset period.
    pub fn new(lstm_2_init_period: usize) -> Self {
        Self {
            lstm_2_init_period,
            // Sentinel, so the very first call starts a fresh trial.
            current_trial_num: -1,
            current_ep_num: 0,
        }
    }

    /// Episodes seen so far by this policy instance.
    pub fn episode_count(&self) -> usize {
        self.current_ep_num
    }
}

impl ContextReset for TrialCarryover {
    fn initial_context(
        &mut self,
        meta: Option<&EpisodeMetadata>,
        prev: Option<&RnnContext>,
        zero: RnnContext,
    ) -> Result<RnnContext> {
        let meta = meta.ok_or_else(|| {
            PolicyError::Metadata(
                "expected episode metadata with `trial_num` and `type` keys".into(),
            )
        })?;

        let fresh_trial = prev.is_none()
            || meta.trial_num != self.current_trial_num
            || meta.is_test()
            || self.current_ep_num % self.lstm_2_init_period == 0;

        let context = match (fresh_trial, prev) {
            (false, Some(prev)) => RnnContext {
                state_1: zero.state_1,
                state_2: prev.state_2.clone(),
            },
            _ => zero,
        };

        self.current_trial_num = meta.trial_num;
        self.current_ep_num += 1;
        Ok(context)
    }
}
