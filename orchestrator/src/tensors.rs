use std::{fs, path::Path};

use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{OrchestratorError, Result};

/// Checks the dtype and rank of a named tensor.
pub(crate) fn expect(view: &TensorView<'_>, name: &str, dtype: Dtype, rank: usize) -> Result<()> {
    if view.dtype() != dtype || view.shape().len() != rank {
        return Err(OrchestratorError::InvalidConfig(format!(
            "tensor {name} is {:?} {:?}, expected a rank {rank} {dtype:?} tensor",
            view.dtype(),
            view.shape()
        )));
    }

    Ok(())
}

/// Fetches a tensor that must be present.
pub(crate) fn get<'data>(tensors: &SafeTensors<'data>, name: &str) -> Result<TensorView<'data>> {
    tensors.tensor(name).map_err(|e| {
        OrchestratorError::InvalidConfig(format!("missing tensor {name}: {e}"))
    })
}

// The data of a tensor view is not necessarily aligned, so it's copied into a fresh buffer.

pub(crate) fn read_f32(view: &TensorView<'_>, name: &str) -> Result<Vec<f32>> {
    expect(view, name, Dtype::F32, view.shape().len())?;
    Ok(bytemuck::pod_collect_to_vec(view.data()))
}

pub(crate) fn read_i64(view: &TensorView<'_>, name: &str) -> Result<Vec<i64>> {
    expect(view, name, Dtype::I64, view.shape().len())?;
    Ok(bytemuck::pod_collect_to_vec(view.data()))
}

/// Reads `I64` labels, all of which must be non negative.
pub(crate) fn read_labels(view: &TensorView<'_>, name: &str) -> Result<Vec<usize>> {
    read_i64(view, name)?
        .into_iter()
        .map(|label| {
            usize::try_from(label).map_err(|_| {
                OrchestratorError::InvalidConfig(format!("tensor {name} holds label {label}"))
            })
        })
        .collect()
}

pub(crate) fn view<'data>(
    dtype: Dtype,
    shape: Vec<usize>,
    data: &'data [u8],
) -> Result<TensorView<'data>> {
    Ok(TensorView::new(dtype, shape, data)?)
}

/// Writes named tensors into a safetensors file.
pub(crate) fn write(path: &Path, tensors: Vec<(String, TensorView<'_>)>) -> Result<()> {
    let bytes = safetensors::serialize(tensors, &None)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub(crate) fn labels_to_i64(labels: impl IntoIterator<Item = usize>) -> Vec<i64> {
    labels.into_iter().map(|label| label as i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_unaligned_data() {
        let values = [1.5f32, -2.25, 1e-3];
        let mut buffer = vec![0u8];
        buffer.extend_from_slice(bytemuck::cast_slice(&values));

        let floats = view(Dtype::F32, vec![3], &buffer[1..]).unwrap();
        assert_eq!(read_f32(&floats, "x").unwrap(), values);

        let labels = labels_to_i64([4, 0, 7]);
        let mut buffer = vec![0u8; 3];
        buffer.extend_from_slice(bytemuck::cast_slice(&labels));

        let ints = view(Dtype::I64, vec![3], &buffer[3..]).unwrap();
        assert_eq!(read_labels(&ints, "labels").unwrap(), [4, 0, 7]);
    }

    #[test]
    fn negative_labels_are_rejected() {
        let labels = [1i64, -1];
        let ints = view(Dtype::I64, vec![2], bytemuck::cast_slice(&labels)).unwrap();

        assert!(read_labels(&ints, "labels").is_err());
        assert!(read_f32(&ints, "labels").is_err());
    }
}
