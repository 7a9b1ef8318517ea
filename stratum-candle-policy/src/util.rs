//! Utilities.
use anyhow::Result;
use candle_core::{Device, Tensor, WithDType};
use candle_nn::VarMap;
use ndarray::ArrayD;
use num_traits::AsPrimitive;
use std::convert::TryFrom;
use stratum_core::error::PolicyError;
use stratum_core::record::{Record, RecordValue};

/// Reshapes flattened per-step rows into `[batch, time, features]`.
///
/// The time length is derived as `rows / batch_size` and the division must be
/// exact; anything else is a precondition violation, never a silent truncate.
/// Trailing feature dimensions are flattened, and rank-1 input becomes a
/// width-1 feature axis.
pub fn seq_view(xs: &Tensor, batch_size: usize) -> Result<Tensor> {
    let dims = xs.dims();
    let rows = dims[0];
    if batch_size == 0 || rows % batch_size != 0 {
        return Err(PolicyError::ShapeMismatch(format!(
            "{} rows cannot be split into {} sequences of equal length",
            rows, batch_size
        ))
        .into());
    }
    let time = rows / batch_size;
    let features: usize = dims[1..].iter().product();
    Ok(xs.reshape((batch_size, time, features))?)
}

/// Inverse of [`seq_view`]: `[batch, time, features]` to `[batch*time, features]`.
pub fn merge_steps(xs: &Tensor) -> Result<Tensor> {
    let (batch_size, time, features) = xs.dims3()?;
    Ok(xs.reshape((batch_size * time, features))?)
}

/// One-hot encodes the given class indices.
pub fn one_hot(indices: &[u32], depth: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; indices.len() * depth];
    for (row, &idx) in indices.iter().enumerate() {
        if idx as usize >= depth {
            return Err(PolicyError::ShapeMismatch(format!(
                "class index {} out of range for depth {}",
                idx, depth
            ))
            .into());
        }
        data[row * depth + idx as usize] = 1.0;
    }
    Ok(Tensor::from_slice(&data, (indices.len(), depth), device)?)
}

/// Returns the standard deviation of a tensor.
pub fn std(t: &Tensor) -> Result<f32> {
    let centered = t.broadcast_sub(&t.mean_all()?)?;
    Ok(centered.powf(2.0)?.mean_all()?.sqrt()?.to_vec0::<f32>()?)
}

/// Returns the mean and standard deviation of every parameter in the map.
pub fn param_stats(varmap: &VarMap) -> Result<Record> {
    let mut record = Record::empty();

    for (k, v) in varmap.data().lock().unwrap().iter() {
        let mean: f32 = v.mean_all()?.to_vec0()?;
        record.insert(format!("{}_mean", k), RecordValue::Scalar(mean));
        record.insert(format!("{}_std", k), RecordValue::Scalar(std(v.as_tensor())?));
    }

    Ok(record)
}

/// Converts a vector into a tensor, optionally adding a batch dimension.
pub fn vec_to_tensor<T1, T2>(v: Vec<T1>, add_batch_dim: bool) -> Result<Tensor>
where
    T1: AsPrimitive<T2>,
    T2: WithDType,
{
    let v = v.iter().map(|e| e.as_()).collect::<Vec<_>>();
    let t: Tensor = TryFrom::<Vec<T2>>::try_from(v)?;

    match add_batch_dim {
        true => Ok(t.unsqueeze(0)?),
        false => Ok(t),
    }
}

/// Converts an n-dimensional array into a tensor of the same shape.
pub fn arrayd_to_tensor<T1, T2>(a: ArrayD<T1>, add_batch_dim: bool) -> Result<Tensor>
where
    T1: AsPrimitive<T2>,
    T2: WithDType,
{
    let shape = a.shape();
    let v = a.iter().map(|e| e.as_()).collect::<Vec<_>>();
    let t: Tensor = TryFrom::<Vec<T2>>::try_from(v)?;
    let t = t.reshape(shape)?;

    match add_batch_dim {
        true => Ok(t.unsqueeze(0)?),
        false => Ok(t),
    }
}

/// Converts a tensor into an n-dimensional array.
pub fn tensor_to_arrayd<T>(t: Tensor, delete_batch_dim: bool) -> Result<ArrayD<T>>
where
    T: WithDType,
{
    let shape = match delete_batch_dim {
        false => t.dims()[..].iter().map(|x| *x as usize).collect::<Vec<_>>(),
        true => t.dims()[1..]
            .iter()
            .map(|x| *x as usize)
            .collect::<Vec<_>>(),
    };
    let v: Vec<T> = t.flatten_all()?.to_vec1()?;

    Ok(ndarray::Array1::<T>::from(v).into_shape(ndarray::IxDyn(&shape))?)
}
