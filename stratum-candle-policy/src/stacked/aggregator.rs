//! Per-mode multi-stream encoding.
use crate::model::StateEncoder;
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::VarBuilder;
use std::collections::BTreeMap;
use stratum_core::{error::PolicyError, ModeSpec};

/// Raw data of one observation mode: a single tensor or named stream tensors,
/// each flattened per step to `[rows, ..stream_shape]`.
#[derive(Clone, Debug)]
pub enum ModeInput {
    /// One data stream.
    Single(Tensor),

    /// Named data streams.
    Streams(BTreeMap<String, Tensor>),
}

/// Observation batch: mode name to [`ModeInput`].
pub type ObsInput = BTreeMap<String, ModeInput>;

/// Encodes every stream of one mode and concatenates the results.
///
/// Parameter paths mirror the stream layout (`encoded_<mode>_<stream>`, or
/// `encoded_<mode>_shared` when parameters are shared across streams), so a
/// second pass over the same `VarMap` resolves to the same tensors.
pub(super) enum ModeEncoder<E> {
    Single(E),
    Streams(BTreeMap<String, E>),
    Shared { encoder: E, streams: Vec<String> },
}

impl<E: StateEncoder> ModeEncoder<E> {
    pub(super) fn build(
        vb: &VarBuilder,
        mode: &str,
        spec: &ModeSpec,
        config: &E::Config,
        share_params: bool,
    ) -> Result<Self> {
        match spec {
            ModeSpec::Single(shape) => {
                let encoder = E::build(
                    vb.pp(format!("encoded_{}", mode)),
                    config.clone(),
                    shape,
                )?;
                Ok(Self::Single(encoder))
            }
            ModeSpec::Streams(streams) if share_params => {
                let mut shapes = streams.values();
                let first = shapes.next().ok_or_else(|| {
                    PolicyError::InvalidConfig(format!("mode `{}` has no streams", mode))
                })?;
                if shapes.any(|s| s != first) {
                    return Err(PolicyError::InvalidConfig(format!(
                        "mode `{}` mixes stream shapes, which cannot share encoder parameters",
                        mode
                    ))
                    .into());
                }
                let encoder = E::build(
                    vb.pp(format!("encoded_{}_shared", mode)),
                    config.clone(),
                    first,
                )?;
                Ok(Self::Shared {
                    encoder,
                    streams: streams.keys().cloned().collect(),
                })
            }
            ModeSpec::Streams(streams) => {
                let mut encoders = BTreeMap::new();
                for (name, shape) in streams.iter() {
                    let encoder = E::build(
                        vb.pp(format!("encoded_{}_{}", mode, name)),
                        config.clone(),
                        shape,
                    )?;
                    encoders.insert(name.clone(), encoder);
                }
                if encoders.is_empty() {
                    return Err(
                        PolicyError::InvalidConfig(format!("mode `{}` has no streams", mode))
                            .into(),
                    );
                }
                Ok(Self::Streams(encoders))
            }
        }
    }

    /// Concatenated feature width of the whole mode.
    pub(super) fn out_dim(&self) -> usize {
        match self {
            Self::Single(encoder) => encoder.out_dim(),
            Self::Streams(encoders) => encoders.values().map(|e| e.out_dim()).sum(),
            Self::Shared { encoder, streams } => encoder.out_dim() * streams.len(),
        }
    }

    /// Encodes one mode into `[rows, out_dim]`.
    pub(super) fn forward(&self, mode: &str, input: &ModeInput) -> Result<Tensor> {
        match (self, input) {
            (Self::Single(encoder), ModeInput::Single(xs)) => encoder.forward(xs),
            (Self::Streams(encoders), ModeInput::Streams(inputs)) => {
                let mut encoded = Vec::with_capacity(encoders.len());
                for (name, encoder) in encoders.iter() {
                    let xs = Self::stream_input(mode, name, inputs)?;
                    encoded.push(encoder.forward(xs)?);
                }
                Ok(Tensor::cat(&encoded, D::Minus1)?)
            }
            (Self::Shared { encoder, streams }, ModeInput::Streams(inputs)) => {
                let mut encoded = Vec::with_capacity(streams.len());
                for name in streams.iter() {
                    let xs = Self::stream_input(mode, name, inputs)?;
                    encoded.push(encoder.forward(xs)?);
                }
                Ok(Tensor::cat(&encoded, D::Minus1)?)
            }
            _ => Err(PolicyError::ShapeMismatch(format!(
                "mode `{}` input layout does not match the observation space",
                mode
            ))
            .into()),
        }
    }

    fn stream_input<'a>(
        mode: &str,
        name: &str,
        inputs: &'a BTreeMap<String, Tensor>,
    ) -> Result<&'a Tensor> {
        inputs.get(name).ok_or_else(|| {
            PolicyError::ShapeMismatch(format!(
                "stream `{}` missing from mode `{}` input",
                name, mode
            ))
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlp::{Mlp, MlpConfig};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn streams_spec() -> ModeSpec {
        let mut streams = BTreeMap::new();
        streams.insert("price".to_string(), vec![6, 2]);
        streams.insert("volume".to_string(), vec![6, 2]);
        ModeSpec::Streams(streams)
    }

    fn streams_input(rows: usize) -> ModeInput {
        let mut inputs = BTreeMap::new();
        for name in ["price", "volume"].iter() {
            inputs.insert(
                name.to_string(),
                Tensor::zeros((rows, 6, 2), DType::F32, &Device::Cpu).unwrap(),
            );
        }
        ModeInput::Streams(inputs)
    }

    #[test]
    fn concatenates_streams() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = MlpConfig::new(vec![8], 5);
        let enc =
            ModeEncoder::<Mlp>::build(&vb, "external", &streams_spec(), &config, false)?;

        assert_eq!(enc.out_dim(), 10);
        let ys = enc.forward("external", &streams_input(4))?;
        assert_eq!(ys.dims(), [4, 10]);
        Ok(())
    }

    #[test]
    fn shared_params_build_one_encoder() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = MlpConfig::new(vec![8], 5);
        let enc = ModeEncoder::<Mlp>::build(&vb, "external", &streams_spec(), &config, true)?;

        assert_eq!(enc.out_dim(), 10);
        enc.forward("external", &streams_input(4))?;

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().all(|n| n.starts_with("encoded_external_shared.")));
        Ok(())
    }

    #[test]
    fn missing_stream_is_reported() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = MlpConfig::new(vec![8], 5);
        let enc =
            ModeEncoder::<Mlp>::build(&vb, "external", &streams_spec(), &config, false)?;

        let mut inputs = BTreeMap::new();
        inputs.insert(
            "price".to_string(),
            Tensor::zeros((4, 6, 2), DType::F32, &Device::Cpu)?,
        );
        let err = enc
            .forward("external", &ModeInput::Streams(inputs))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PolicyError>(),
            Some(PolicyError::ShapeMismatch(_))
        ));
        Ok(())
    }
}
