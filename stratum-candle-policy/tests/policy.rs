use anyhow::Result;
use candle_core::{Device, Tensor};
use std::collections::BTreeMap;
use stratum_candle_policy::mlp::{Mlp, MlpConfig};
use stratum_candle_policy::stacked::{
    ContextResetConfig, ModeInput, ObsInput, RolloutInput, StackedLstmConfig, StackedLstmPolicy,
};
use stratum_core::error::PolicyError;
use stratum_core::{ActionSpace, EpisodeMetadata, ModeSpec, ObservationSpace};
use tempdir::TempDir;

type Policy = StackedLstmPolicy<Mlp>;

fn space() -> ObservationSpace {
    let mut streams = BTreeMap::new();
    streams.insert("price".to_string(), vec![6, 2]);
    streams.insert("volume".to_string(), vec![4]);

    let mut modes = BTreeMap::new();
    modes.insert("external".to_string(), ModeSpec::Streams(streams));
    modes.insert("internal".to_string(), ModeSpec::Single(vec![5]));
    ObservationSpace::new(modes).unwrap()
}

fn config() -> StackedLstmConfig<MlpConfig> {
    StackedLstmConfig::new(
        space(),
        ActionSpace::discrete(4).unwrap(),
        MlpConfig::new(vec![16], 8),
    )
    .lstm_layers((8, 12))
}

fn filled(shape: &[usize], start: f32) -> Tensor {
    let n: usize = shape.iter().product();
    let data: Vec<f32> = (0..n).map(|i| start + i as f32 * 0.01).collect();
    Tensor::from_vec(data, shape, &Device::Cpu).unwrap()
}

fn obs_input(rows: usize) -> ObsInput {
    let mut external = BTreeMap::new();
    external.insert("price".to_string(), filled(&[rows, 6, 2], 0.0));
    external.insert("volume".to_string(), filled(&[rows, 4], 0.5));

    let mut obs = BTreeMap::new();
    obs.insert("external".to_string(), ModeInput::Streams(external));
    obs.insert(
        "internal".to_string(),
        ModeInput::Single(filled(&[rows, 5], -0.2)),
    );
    obs
}

fn rollout(rows: usize, batch_size: usize) -> RolloutInput {
    RolloutInput {
        obs: obs_input(rows),
        last_action: filled(&[rows, 4], 0.1),
        last_reward: filled(&[rows], 0.0),
        batch_size,
    }
}

fn meta(trial_num: i64, episode_type: i64) -> EpisodeMetadata {
    EpisodeMetadata {
        trial_num,
        episode_type,
    }
}

#[test]
fn constructed_modes_match_the_space() -> Result<()> {
    let _ = env_logger::try_init();
    let policy = Policy::build(config())?;

    let names: Vec<&str> = policy.observation_space().mode_names().collect();
    assert_eq!(names, vec!["external", "internal"]);
    assert_eq!(policy.debug()["state_external_encoded"], vec![16]);
    assert_eq!(policy.debug()["state_internal_encoded"], vec![8]);
    Ok(())
}

#[test]
fn missing_mandatory_mode_fails_construction() {
    // Deserialization bypasses ObservationSpace::new, so the builder has to
    // re-validate the mandatory modes itself.
    let yaml = "modes:\n  external:\n    Single:\n    - 4\n";
    let space: ObservationSpace = serde_yaml::from_str(yaml).unwrap();

    let config = StackedLstmConfig::new(
        space,
        ActionSpace::discrete(4).unwrap(),
        MlpConfig::new(vec![16], 8),
    );
    let err = Policy::build(config).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PolicyError>(),
        Some(PolicyError::MissingMode(m)) if m == "internal"
    ));
}

#[test]
fn dropout_keep_prob_must_lie_in_unit_interval() {
    for keep_prob in [0.0, -0.5, 1.5] {
        let err = Policy::build(config().dropout_keep_prob(keep_prob)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PolicyError>(),
            Some(PolicyError::InvalidConfig(_))
        ));
    }
    assert!(Policy::build(config().dropout_keep_prob(0.5)).is_ok());
}

#[test]
fn on_and_off_policy_branches_are_weight_tied() -> Result<()> {
    let mut policy = Policy::build(config())?;
    let input = rollout(6, 2);
    let ctx = policy.zero_context(2)?;

    let on = policy.forward_on(&input, &ctx, false)?;
    let off = policy.forward_off(&input, &ctx, false)?;

    assert_eq!(
        on.output.logits.to_vec2::<f32>()?,
        off.output.logits.to_vec2::<f32>()?
    );
    assert_eq!(
        on.output.value.to_vec1::<f32>()?,
        off.output.value.to_vec1::<f32>()?
    );
    assert_eq!(on.time_length, 3);
    Ok(())
}

#[test]
fn uneven_rows_fail_at_execution() -> Result<()> {
    let mut policy = Policy::build(config())?;
    let input = rollout(10, 4);
    let ctx = policy.zero_context(4)?;

    let err = policy.forward_on(&input, &ctx, false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PolicyError>(),
        Some(PolicyError::ShapeMismatch(_))
    ));

    let input = rollout(10, 5);
    let ctx = policy.zero_context(5)?;
    let out = policy.forward_on(&input, &ctx, false)?;
    assert_eq!(out.time_length, 2);
    Ok(())
}

#[test]
fn fused_heads_build_no_stage_one_head() -> Result<()> {
    let policy = Policy::build(config().shared_p_v(true))?;
    let names: Vec<String> = policy
        .varmap()
        .data()
        .lock()
        .unwrap()
        .keys()
        .cloned()
        .collect();

    assert!(names.iter().any(|n| n.starts_with("dense_pi_vfn.")));
    assert!(!names.iter().any(|n| n.starts_with("dense_pi.")));
    assert!(!names.iter().any(|n| n.starts_with("dense_vfn.")));
    Ok(())
}

#[test]
fn split_heads_read_different_stages() -> Result<()> {
    let mut policy = Policy::build(config())?;
    let names: Vec<String> = policy
        .varmap()
        .data()
        .lock()
        .unwrap()
        .keys()
        .cloned()
        .collect();

    assert!(names.iter().any(|n| n.starts_with("dense_pi.")));
    assert!(names.iter().any(|n| n.starts_with("dense_vfn.")));
    assert!(!names.iter().any(|n| n.starts_with("dense_pi_vfn.")));

    let input = rollout(4, 2);
    let ctx = policy.zero_context(2)?;
    let out = policy.forward_on(&input, &ctx, false)?;
    assert_eq!(out.output.logits.dims(), [4, 4]);
    assert_eq!(out.output.value.dims(), [4]);
    assert_eq!(out.output.action.dims(), [4, 4]);
    Ok(())
}

#[test]
fn rp_width_is_fixed_by_class_count() -> Result<()> {
    for rp_sequence_size in [3usize, 6] {
        let policy = Policy::build(config().rp_sequence_size(rp_sequence_size))?;
        let rows = 2 * (rp_sequence_size - 1);
        let logits = policy.forward_rp(&obs_input(rows), 2)?;
        assert_eq!(logits.dims(), [2, policy.rp_classes()]);
        assert_eq!(policy.rp_classes(), 3);
    }
    Ok(())
}

#[test]
fn rp_rejects_a_mis_sized_window() -> Result<()> {
    let policy = Policy::build(config().rp_sequence_size(4))?;
    let err = policy.forward_rp(&obs_input(5), 2).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PolicyError>(),
        Some(PolicyError::ShapeMismatch(_))
    ));
    Ok(())
}

#[test]
fn unexpected_or_missing_input_modes_are_rejected() -> Result<()> {
    let mut policy = Policy::build(config())?;
    let ctx = policy.zero_context(2)?;

    let mut input = rollout(4, 2);
    input.obs.insert(
        "datetime".to_string(),
        ModeInput::Single(filled(&[4, 2], 0.0)),
    );
    assert!(policy.forward_on(&input, &ctx, false).is_err());

    let mut input = rollout(4, 2);
    input.obs.remove("internal");
    let err = policy.forward_on(&input, &ctx, false).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PolicyError>(),
        Some(PolicyError::MissingMode(m)) if m == "internal"
    ));
    Ok(())
}

#[test]
fn trial_carryover_keeps_second_layer_within_a_trial() -> Result<()> {
    let mut policy = Policy::build(config().context_reset(
        ContextResetConfig::TrialCarryover {
            lstm_2_init_period: 50,
        },
    ))?;

    // Run one step so the previous episode ends with a non-zero context.
    let input = rollout(3, 1);
    let ctx = policy.zero_context(1)?;
    let prev = policy.forward_on(&input, &ctx, false)?.state_out;
    let prev_h2 = prev.state_2.h().to_vec2::<f32>()?;

    // Episode 0: no previous context.
    let fresh = policy.initial_context(1, Some(&meta(3, 0)), None)?;
    assert_eq!(
        fresh.state_2.h().abs()?.sum_all()?.to_vec0::<f32>()?,
        0.0
    );

    // Same trial: the second layer carries, the first is zeroed.
    let carried = policy.initial_context(1, Some(&meta(3, 0)), Some(&prev))?;
    assert_eq!(carried.state_2.h().to_vec2::<f32>()?, prev_h2);
    assert_eq!(
        carried.state_1.h().abs()?.sum_all()?.to_vec0::<f32>()?,
        0.0
    );

    // A changed trial resets even with context supplied.
    let reset = policy.initial_context(1, Some(&meta(4, 0)), Some(&prev))?;
    assert_eq!(
        reset.state_2.h().abs()?.sum_all()?.to_vec0::<f32>()?,
        0.0
    );

    // Missing metadata is a per-call error.
    let err = policy.initial_context(1, None, Some(&prev)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PolicyError>(),
        Some(PolicyError::Metadata(_))
    ));
    Ok(())
}

#[test]
fn checkpoint_round_trip_restores_outputs() -> Result<()> {
    let dir = TempDir::new("stratum")?;
    let path = dir.path().join("policy.safetensors");

    let mut source = Policy::build(config())?;
    let mut target = Policy::build(config().seed(43))?;
    source.save(&path)?;
    target.load(&path)?;

    let input = rollout(6, 2);
    let ctx = source.zero_context(2)?;
    let a = source.forward_on(&input, &ctx, false)?;
    let b = target.forward_on(&input, &ctx, false)?;

    assert_eq!(
        a.output.logits.to_vec2::<f32>()?,
        b.output.logits.to_vec2::<f32>()?
    );
    assert_eq!(
        a.output.value.to_vec1::<f32>()?,
        b.output.value.to_vec1::<f32>()?
    );
    Ok(())
}

#[test]
fn trainer_surface_is_exposed() -> Result<()> {
    let policy = Policy::build(config().aux_estimate(true))?;

    assert!(!policy.trainable_vars().is_empty());
    assert_eq!(
        policy.callbacks().keys().collect::<Vec<_>>(),
        vec!["reward_prediction"]
    );

    let stats = policy.param_stats()?;
    assert!(!stats.is_empty());
    assert!(stats.keys().any(|k| k.ends_with("_mean")));

    let no_aux = Policy::build(config())?;
    assert!(no_aux.callbacks().is_empty());
    Ok(())
}

#[test]
fn config_round_trips_through_yaml() -> Result<()> {
    let dir = TempDir::new("stratum")?;
    let path = dir.path().join("policy.yaml");

    let config = config().shared_p_v(true).seed(7);
    config.save(&path)?;
    let restored = StackedLstmConfig::<MlpConfig>::load(&path)?;
    assert_eq!(config, restored);
    Ok(())
}
