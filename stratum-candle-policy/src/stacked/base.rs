//! Policy builder and its weight-tied forward passes.
use super::aggregator::{ModeEncoder, ModeInput, ObsInput};
use super::config::{ContextResetConfig, StackedLstmConfig};
use super::context::ContextReset;
use super::heads::{categorical_sample, Heads, RewardPredictionHead};
use crate::model::StateEncoder;
use crate::rnn::{RnnContext, StackOut, StackedLstm, Unrolling};
use crate::util::{merge_steps, param_stats, seq_view};
use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{VarBuilder, VarMap};
use log::{info, trace};
use rand::{rngs::SmallRng, SeedableRng};
use std::collections::BTreeMap;
use std::path::Path;
use stratum_core::error::PolicyError;
use stratum_core::record::Record;
use stratum_core::{
    ActionSpace, EpisodeMetadata, ObservationSpace, DATETIME, EXTERNAL, INTERNAL,
};

/// One branch's batch of inputs, flattened per step.
///
/// `rows = batch_size * time_length` for every tensor; the time length is
/// recovered at reshape time and the division must be exact.
pub struct RolloutInput {
    /// Observation data per mode.
    pub obs: ObsInput,

    /// Previous-step action encoding, `[rows, encoded_depth]`.
    pub last_action: Tensor,

    /// Previous-step reward, `[rows]`.
    pub last_reward: Tensor,

    /// Number of rollout sequences in the batch.
    pub batch_size: usize,
}

/// Head outputs of one branch.
#[derive(Debug)]
pub struct PolicyOutput {
    /// Action logits, `[rows, one_hot_depth]`.
    pub logits: Tensor,

    /// Value estimate, `[rows]`.
    pub value: Tensor,

    /// One-hot categorical sample per row, drawn without gradient.
    pub action: Tensor,
}

/// Result of one forward pass.
#[derive(Debug)]
pub struct PolicyForward {
    /// Head outputs.
    pub output: PolicyOutput,

    /// Final recurrent state, to be fed back on the next call.
    pub state_out: RnnContext,

    /// Time length recovered from the batch.
    pub time_length: usize,
}

/// Auxiliary tasks the surrounding trainer may schedule against this policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuxTask {
    /// Discrete reward-outcome prediction over a short feature window.
    RewardPrediction,
}

/// Dual-stream, two-stage recurrent actor-critic policy.
///
/// All parameters live in one [`VarMap`]; the on-policy, off-policy and
/// reward-prediction passes run through the same modules, so every branch is
/// weight-tied by construction. Recurrent state is owned by the caller
/// between steps; the policy holds only the episode counters of its
/// context-reset strategy.
pub struct StackedLstmPolicy<E: StateEncoder> {
    config: StackedLstmConfig<E::Config>,
    device: Device,
    varmap: VarMap,
    encoders: BTreeMap<String, ModeEncoder<E>>,
    datetime_dim: Option<usize>,
    rnn: StackedLstm,
    heads: Heads,
    rp_head: RewardPredictionHead,
    context: Box<dyn ContextReset + Send>,
    rng: SmallRng,
    debug: BTreeMap<String, Vec<usize>>,
    callbacks: BTreeMap<String, AuxTask>,
}

impl<E: StateEncoder> std::fmt::Debug for StackedLstmPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackedLstmPolicy")
            .field("datetime_dim", &self.datetime_dim)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl<E: StateEncoder> StackedLstmPolicy<E> {
    /// Constructs the policy, validating the configuration eagerly.
    pub fn build(config: StackedLstmConfig<E::Config>) -> Result<Self> {
        config.ob_space.validate()?;
        config.ac_space.validate()?;
        if !(config.dropout_keep_prob > 0.0 && config.dropout_keep_prob <= 1.0) {
            return Err(PolicyError::InvalidConfig(format!(
                "dropout keep-probability must lie in (0, 1], got {}",
                config.dropout_keep_prob
            ))
            .into());
        }
        if config.rp_sequence_size < 2 {
            return Err(PolicyError::InvalidConfig(
                "reward-prediction window must span at least 2 steps".into(),
            )
            .into());
        }
        if config.rp_classes == 0 {
            return Err(
                PolicyError::InvalidConfig("reward-class count must be non-zero".into()).into(),
            );
        }
        if let ContextResetConfig::TrialCarryover {
            lstm_2_init_period: 0,
        } = config.context_reset
        {
            return Err(
                PolicyError::InvalidConfig("context reset period must be non-zero".into()).into(),
            );
        }
        if let Unrolling::Static { max_seq_len: 0 } = config.unrolling {
            return Err(
                PolicyError::InvalidConfig("static unrolling bound must be non-zero".into())
                    .into(),
            );
        }

        let device: Device = config.device.unwrap_or_default().into();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let mut encoders = BTreeMap::new();
        for mode in [EXTERNAL, INTERNAL].iter() {
            let spec = config
                .ob_space
                .get(mode)
                .ok_or_else(|| PolicyError::MissingMode((*mode).into()))?;
            let encoder = ModeEncoder::<E>::build(
                &vb,
                mode,
                spec,
                &config.encoder_config,
                config.share_encoder_params,
            )?;
            encoders.insert((*mode).to_string(), encoder);
        }
        let ext_dim = encoders[EXTERNAL].out_dim();
        let int_dim = encoders[INTERNAL].out_dim();
        let datetime_dim = config.ob_space.get(DATETIME).map(|spec| spec.feature_len());

        let hidden = config.lstm_layers;
        let in_dim_1 = ext_dim + 1;
        let in_dim_2 = ext_dim + config.ac_space.encoded_depth() + int_dim + hidden.0;
        let rnn = StackedLstm::build(
            &vb,
            in_dim_1,
            in_dim_2,
            hidden,
            config.unrolling,
            config.dropout_keep_prob,
        )?;

        let heads = Heads::build(&vb, config.shared_p_v, hidden, config.ac_space.one_hot_depth())?;
        let rp_in_dim = ext_dim * (config.rp_sequence_size - 1);
        let rp_head = RewardPredictionHead::build(&vb, rp_in_dim, config.rp_classes)?;

        let context = config.context_reset.build();
        let rng = SmallRng::seed_from_u64(config.seed);

        let mut debug = BTreeMap::new();
        debug.insert("state_external_encoded".to_string(), vec![ext_dim]);
        debug.insert("state_internal_encoded".to_string(), vec![int_dim]);
        debug.insert("concat_input_to_lstm_1".to_string(), vec![in_dim_1]);
        debug.insert("concat_input_to_lstm_2".to_string(), vec![in_dim_2]);
        debug.insert("rp_input".to_string(), vec![rp_in_dim]);
        if let Some(dt_dim) = datetime_dim {
            debug.insert("state_datetime_in".to_string(), vec![dt_dim]);
        }

        let mut callbacks = BTreeMap::new();
        if config.aux_estimate {
            callbacks.insert("reward_prediction".to_string(), AuxTask::RewardPrediction);
        }

        info!(
            "built stacked-lstm policy: encoded dims (external {}, internal {}), lstm ({}, {})",
            ext_dim, int_dim, hidden.0, hidden.1
        );

        Ok(Self {
            config,
            device,
            varmap,
            encoders,
            datetime_dim,
            rnn,
            heads,
            rp_head,
            context,
            rng,
            debug,
            callbacks,
        })
    }

    /// On-policy pass over the current rollout batch.
    pub fn forward_on(
        &mut self,
        input: &RolloutInput,
        ctx: &RnnContext,
        train: bool,
    ) -> Result<PolicyForward> {
        trace!("on-policy forward, batch {}", input.batch_size);
        self.forward_pass(input, ctx, train)
    }

    /// Off-policy replay pass over a separately sampled batch.
    ///
    /// Runs through the same modules as [`forward_on`], so the parameters are
    /// identical by construction. Its value estimate doubles as the
    /// value-function-replay estimate.
    ///
    /// [`forward_on`]: StackedLstmPolicy::forward_on
    pub fn forward_off(
        &mut self,
        input: &RolloutInput,
        ctx: &RnnContext,
        train: bool,
    ) -> Result<PolicyForward> {
        trace!("off-policy forward, batch {}", input.batch_size);
        self.forward_pass(input, ctx, train)
    }

    fn forward_pass(
        &mut self,
        input: &RolloutInput,
        ctx: &RnnContext,
        train: bool,
    ) -> Result<PolicyForward> {
        self.check_modes(&input.obs)?;

        let external = self.encoders[EXTERNAL].forward(EXTERNAL, &input.obs[EXTERNAL])?;
        let internal = self.encoders[INTERNAL].forward(INTERNAL, &input.obs[INTERNAL])?;

        let rows = external.dims()[0];
        if internal.dims()[0] != rows {
            return Err(PolicyError::ShapeMismatch(format!(
                "mode row counts differ: external {}, internal {}",
                rows,
                internal.dims()[0]
            ))
            .into());
        }
        let (action_rows, action_depth) = input.last_action.dims2()?;
        if action_rows != rows || action_depth != self.config.ac_space.encoded_depth() {
            return Err(PolicyError::ShapeMismatch(format!(
                "last-action batch must be [{}, {}], got {:?}",
                rows,
                self.config.ac_space.encoded_depth(),
                input.last_action.dims()
            ))
            .into());
        }
        if input.last_reward.dims()[0] != rows {
            return Err(PolicyError::ShapeMismatch(format!(
                "last-reward batch must hold {} rows, got {:?}",
                rows,
                input.last_reward.dims()
            ))
            .into());
        }

        let batch_size = input.batch_size;
        let ext_seq = seq_view(&external, batch_size)?;
        let time = ext_seq.dims()[1];
        let int_seq = seq_view(&internal, batch_size)?;
        let act_seq = seq_view(&input.last_action, batch_size)?;
        let rew_seq = seq_view(&input.last_reward, batch_size)?;

        // The datetime mode is reshaped for introspection but feeds neither
        // recurrent layer.
        if self.datetime_dim.is_some() {
            if let Some(ModeInput::Single(dt)) = input.obs.get(DATETIME) {
                let dt_seq = seq_view(dt, batch_size)?;
                self.debug
                    .insert("state_datetime_in".to_string(), dt_seq.dims().to_vec());
            }
        }

        let in_1 = Tensor::cat(&[&ext_seq, &rew_seq], D::Minus1)?;
        let in_2_base = Tensor::cat(&[&ext_seq, &act_seq, &int_seq], D::Minus1)?;

        let StackOut {
            out_1,
            out_2,
            state_out,
        } = self.rnn.forward(&in_1, &in_2_base, ctx, time, train)?;

        let flat_1 = merge_steps(&out_1)?;
        let flat_2 = merge_steps(&out_2)?;
        let (logits, value) = self.heads.forward(&flat_1, &flat_2)?;
        let action = categorical_sample(&logits, &mut self.rng)?;

        Ok(PolicyForward {
            output: PolicyOutput {
                logits,
                value,
                action,
            },
            state_out,
            time_length: time,
        })
    }

    /// Reward-prediction pass over a short window of `external` features.
    ///
    /// The window holds `rp_sequence_size - 1` consecutive steps per sample
    /// (the final step of the sampled window is the prediction target).
    /// Encoder weights are the on-policy encoder's. Returns logits over the
    /// reward-outcome classes, `[batch_size, rp_classes]`.
    pub fn forward_rp(&self, obs: &ObsInput, batch_size: usize) -> Result<Tensor> {
        let external = obs
            .get(EXTERNAL)
            .ok_or_else(|| PolicyError::MissingMode(EXTERNAL.into()))?;
        let encoded = self.encoders[EXTERNAL].forward(EXTERNAL, external)?;

        let rows = encoded.dims()[0];
        let window = self.config.rp_sequence_size - 1;
        if batch_size == 0 || rows != batch_size * window {
            return Err(PolicyError::ShapeMismatch(format!(
                "reward-prediction expects {} rows per sample, got {} rows for batch {}",
                window, rows, batch_size
            ))
            .into());
        }
        let features = encoded.dims()[1];
        let xs = encoded.reshape((batch_size, window * features))?;
        self.rp_head.forward(&xs)
    }

    /// Initial recurrent context for a new episode.
    ///
    /// Delegates to the configured context-reset strategy; meta-learning
    /// strategies require `meta` and update their episode counters exactly
    /// once per call.
    pub fn initial_context(
        &mut self,
        batch_size: usize,
        meta: Option<&EpisodeMetadata>,
        prev: Option<&RnnContext>,
    ) -> Result<RnnContext> {
        let zero = self.rnn.zero_context(batch_size)?;
        self.context.initial_context(meta, prev, zero)
    }

    /// Zero state for both recurrent layers.
    pub fn zero_context(&self, batch_size: usize) -> Result<RnnContext> {
        self.rnn.zero_context(batch_size)
    }

    fn check_modes(&self, obs: &ObsInput) -> Result<()> {
        for mode in self.config.ob_space.mode_names() {
            if !obs.contains_key(mode) {
                return Err(PolicyError::MissingMode(mode.into()).into());
            }
        }
        for mode in obs.keys() {
            if self.config.ob_space.get(mode).is_none() {
                return Err(PolicyError::ShapeMismatch(format!(
                    "unexpected mode `{}` in observation input",
                    mode
                ))
                .into());
            }
        }
        Ok(())
    }

    /// The observation space this policy was built for.
    pub fn observation_space(&self) -> &ObservationSpace {
        &self.config.ob_space
    }

    /// The action space this policy was built for.
    pub fn action_space(&self) -> &ActionSpace {
        &self.config.ac_space
    }

    /// Device the parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// The parameter map shared by every branch.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// All trainable parameters, for the surrounding optimizer and for
    /// checkpoint synchronization.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Number of reward-outcome classes of the reward-prediction head.
    pub fn rp_classes(&self) -> usize {
        self.rp_head.classes()
    }

    /// Named shapes recorded at construction, for introspection only.
    pub fn debug(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.debug
    }

    /// Auxiliary-task registry; empty unless `aux_estimate` is set.
    pub fn callbacks(&self) -> &BTreeMap<String, AuxTask> {
        &self.callbacks
    }

    /// Mean and standard deviation of every parameter.
    pub fn param_stats(&self) -> Result<Record> {
        param_stats(&self.varmap)
    }

    /// Save parameters of the policy.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.varmap.save(&path)?;
        info!("Save policy to {:?}", path.as_ref());
        Ok(())
    }

    /// Load parameters of the policy.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.varmap.load(&path)?;
        info!("Load policy from {:?}", path.as_ref());
        Ok(())
    }
}
