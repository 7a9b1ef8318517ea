//! Observation and action space descriptors.
use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the mandatory market-data mode.
pub const EXTERNAL: &str = "external";

/// Name of the mandatory account-state mode.
pub const INTERNAL: &str = "internal";

/// Name of the optional timestamp mode.
pub const DATETIME: &str = "datetime";

/// Shape specification of one observation mode.
///
/// A mode carries either a single data stream or a mapping of named streams,
/// each described by its per-step feature shape (no batch dimension).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum ModeSpec {
    /// One data stream.
    Single(Vec<usize>),

    /// Named data streams, encoded separately and concatenated.
    Streams(BTreeMap<String, Vec<usize>>),
}

impl ModeSpec {
    /// Total number of scalar features per step across all streams.
    pub fn feature_len(&self) -> usize {
        match self {
            Self::Single(shape) => shape.iter().product(),
            Self::Streams(streams) => streams
                .values()
                .map(|shape| shape.iter().product::<usize>())
                .sum(),
        }
    }

    fn shapes(&self) -> Vec<&[usize]> {
        match self {
            Self::Single(shape) => vec![&shape[..]],
            Self::Streams(streams) => streams.values().map(|s| &s[..]).collect(),
        }
    }
}

/// Nested observation space: mode name to [`ModeSpec`].
///
/// The [`EXTERNAL`] and [`INTERNAL`] modes are mandatory; [`DATETIME`] is
/// optional. Mode order is deterministic (sorted by name).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObservationSpace {
    modes: BTreeMap<String, ModeSpec>,
}

impl ObservationSpace {
    /// Creates an observation space, failing if a mandatory mode is absent.
    pub fn new(modes: BTreeMap<String, ModeSpec>) -> Result<Self, PolicyError> {
        let space = Self { modes };
        space.validate()?;
        Ok(space)
    }

    /// Checks the mandatory-mode invariant and shape sanity.
    ///
    /// Also applied by policy builders, since deserialization bypasses
    /// [`ObservationSpace::new`].
    pub fn validate(&self) -> Result<(), PolicyError> {
        for mode in [EXTERNAL, INTERNAL].iter() {
            if !self.modes.contains_key(*mode) {
                return Err(PolicyError::MissingMode((*mode).into()));
            }
        }
        for (name, spec) in self.modes.iter() {
            for shape in spec.shapes() {
                if shape.is_empty() || shape.iter().product::<usize>() == 0 {
                    return Err(PolicyError::InvalidConfig(format!(
                        "mode `{}` has an empty stream shape",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns the spec of the given mode, if present.
    pub fn get(&self, mode: &str) -> Option<&ModeSpec> {
        self.modes.get(mode)
    }

    /// All modes in deterministic order.
    pub fn modes(&self) -> &BTreeMap<String, ModeSpec> {
        &self.modes
    }

    /// Mode names in deterministic order.
    pub fn mode_names(&self) -> impl Iterator<Item = &str> {
        self.modes.keys().map(|k| k.as_str())
    }
}

/// Discrete multi-categorical action space descriptor.
///
/// Exposes the categorical depth of the policy logits (`one_hot_depth`) and
/// the size of the previous-action vector fed back into the network
/// (`encoded_depth`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ActionSpace {
    one_hot_depth: usize,
    encoded_depth: usize,
}

impl ActionSpace {
    /// Creates an action space with distinct one-hot and encoded depths.
    pub fn new(one_hot_depth: usize, encoded_depth: usize) -> Result<Self, PolicyError> {
        let space = Self {
            one_hot_depth,
            encoded_depth,
        };
        space.validate()?;
        Ok(space)
    }

    /// Creates an action space of `n` discrete actions, fed back one-hot.
    pub fn discrete(n: usize) -> Result<Self, PolicyError> {
        Self::new(n, n)
    }

    /// Checks that both depths are non-zero.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.one_hot_depth == 0 || self.encoded_depth == 0 {
            return Err(PolicyError::InvalidConfig(
                "action space depths must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Categorical depth of the policy logits.
    pub fn one_hot_depth(&self) -> usize {
        self.one_hot_depth
    }

    /// Size of the previous-action feature vector.
    pub fn encoded_depth(&self) -> usize {
        self.encoded_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_space() -> BTreeMap<String, ModeSpec> {
        let mut streams = BTreeMap::new();
        streams.insert("price".to_string(), vec![30, 4]);
        streams.insert("volume".to_string(), vec![30, 1]);

        let mut modes = BTreeMap::new();
        modes.insert(EXTERNAL.to_string(), ModeSpec::Streams(streams));
        modes.insert(INTERNAL.to_string(), ModeSpec::Single(vec![5]));
        modes
    }

    #[test]
    fn mandatory_modes_are_enforced() {
        let mut modes = market_space();
        assert!(ObservationSpace::new(modes.clone()).is_ok());

        modes.remove(INTERNAL);
        let err = ObservationSpace::new(modes).unwrap_err();
        assert!(matches!(err, PolicyError::MissingMode(ref m) if m == INTERNAL));
    }

    #[test]
    fn mode_names_match_construction() {
        let mut modes = market_space();
        modes.insert(DATETIME.to_string(), ModeSpec::Single(vec![2]));
        let space = ObservationSpace::new(modes).unwrap();

        let names: Vec<&str> = space.mode_names().collect();
        assert_eq!(names, vec![DATETIME, EXTERNAL, INTERNAL]);
        assert_eq!(space.get(EXTERNAL).unwrap().feature_len(), 30 * 4 + 30);
    }

    #[test]
    fn zero_depth_action_space_is_rejected() {
        assert!(ActionSpace::discrete(0).is_err());
        let space = ActionSpace::new(4, 4).unwrap();
        assert_eq!(space.one_hot_depth(), 4);
        assert_eq!(space.encoded_depth(), 4);
    }

    #[test]
    fn spaces_round_trip_through_yaml() {
        let space = ObservationSpace::new(market_space()).unwrap();
        let yaml = serde_yaml::to_string(&space).unwrap();
        let restored: ObservationSpace = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(space, restored);
    }
}
