use super::context::{ContextReset, ResetAlways, TrialCarryover};
use crate::rnn::Unrolling;
use crate::Device;
use anyhow::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use stratum_core::{ActionSpace, ObservationSpace};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
/// Selects how recurrent context crosses episode boundaries.
pub enum ContextResetConfig {
    /// Zero both layers at every episode start.
    ResetAlways,

    /// RL²-style carryover of the second layer within a trial.
    TrialCarryover {
        /// Force a fresh second-layer state every this many episodes.
        lstm_2_init_period: usize,
    },
}

impl ContextResetConfig {
    pub(super) fn build(&self) -> Box<dyn ContextReset + Send> {
        match self {
            Self::ResetAlways => Box::new(ResetAlways),
            Self::TrialCarryover { lstm_2_init_period } => {
                Box::new(TrialCarryover::new(*lstm_2_init_period))
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
/// Configuration of [`StackedLstmPolicy`](super::StackedLstmPolicy).
pub struct StackedLstmConfig<C> {
    pub(super) ob_space: ObservationSpace,
    pub(super) ac_space: ActionSpace,
    pub(super) encoder_config: C,
    pub(super) rp_sequence_size: usize,
    pub(super) rp_classes: usize,
    pub(super) lstm_layers: (usize, usize),
    pub(super) share_encoder_params: bool,
    pub(super) dropout_keep_prob: f64,
    pub(super) action_dp_alpha: f64,
    pub(super) aux_estimate: bool,
    pub(super) unrolling: Unrolling,
    pub(super) shared_p_v: bool,
    pub(super) context_reset: ContextResetConfig,
    pub(super) seed: u64,
    pub(super) device: Option<Device>,
}

impl<C> StackedLstmConfig<C> {
    /// Creates a configuration with the default knob settings.
    pub fn new(ob_space: ObservationSpace, ac_space: ActionSpace, encoder_config: C) -> Self {
        Self {
            ob_space,
            ac_space,
            encoder_config,
            rp_sequence_size: 4,
            rp_classes: 3,
            lstm_layers: (256, 256),
            share_encoder_params: false,
            dropout_keep_prob: 1.0,
            action_dp_alpha: 200.0,
            aux_estimate: false,
            unrolling: Unrolling::Dynamic,
            shared_p_v: false,
            context_reset: ContextResetConfig::ResetAlways,
            seed: 42,
            device: None,
        }
    }

    /// Sets the reward-prediction window length.
    pub fn rp_sequence_size(mut self, v: usize) -> Self {
        self.rp_sequence_size = v;
        self
    }

    /// Sets the number of discrete reward-outcome classes.
    pub fn rp_classes(mut self, v: usize) -> Self {
        self.rp_classes = v;
        self
    }

    /// Sets the hidden widths of the two recurrent layers.
    pub fn lstm_layers(mut self, v: (usize, usize)) -> Self {
        self.lstm_layers = v;
        self
    }

    /// Shares encoder parameters across every stream of a mode.
    pub fn share_encoder_params(mut self, v: bool) -> Self {
        self.share_encoder_params = v;
        self
    }

    /// Sets the dropout keep-probability, which must lie in `(0, 1]`.
    pub fn dropout_keep_prob(mut self, v: f64) -> Self {
        self.dropout_keep_prob = v;
        self
    }

    /// Sets the meta-learning alpha carried in the signature.
    pub fn action_dp_alpha(mut self, v: f64) -> Self {
        self.action_dp_alpha = v;
        self
    }

    /// Enables the auxiliary-task callback registry.
    pub fn aux_estimate(mut self, v: bool) -> Self {
        self.aux_estimate = v;
        self
    }

    /// Sets the unrolling mode of the recurrent layers.
    pub fn unrolling(mut self, v: Unrolling) -> Self {
        self.unrolling = v;
        self
    }

    /// Fuses the policy and value heads onto the second layer's output.
    pub fn shared_p_v(mut self, v: bool) -> Self {
        self.shared_p_v = v;
        self
    }

    /// Selects the context-reset strategy.
    pub fn context_reset(mut self, v: ContextResetConfig) -> Self {
        self.context_reset = v;
        self
    }

    /// Seeds the action-sampling random source.
    pub fn seed(mut self, v: u64) -> Self {
        self.seed = v;
        self
    }

    /// Sets the device the policy is built on.
    pub fn device(mut self, v: Device) -> Self {
        self.device = Some(v);
        self
    }
}

impl<C> StackedLstmConfig<C>
where
    C: DeserializeOwned + Serialize,
{
    /// Constructs [`StackedLstmConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let config = serde_yaml::from_reader(rdr)?;
        Ok(config)
    }

    /// Saves [`StackedLstmConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
