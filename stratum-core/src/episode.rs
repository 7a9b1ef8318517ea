//! Episode metadata delivered by the data feed at episode boundaries.
use serde::{Deserialize, Serialize};

/// Per-episode metadata required by meta-learning context strategies.
///
/// Delivered alongside the initial observation of every episode; a data feed
/// shaping trial distributions stamps each episode with the trial it belongs
/// to and whether it is a test episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EpisodeMetadata {
    /// Identifier of the trial this episode belongs to.
    pub trial_num: i64,

    /// Episode type; non-zero marks a test/evaluation episode.
    #[serde(rename = "type")]
    pub episode_type: i64,
}

impl EpisodeMetadata {
    /// Returns `true` for test/evaluation episodes.
    pub fn is_test(&self) -> bool {
        self.episode_type != 0
    }
}
