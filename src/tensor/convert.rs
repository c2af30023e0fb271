//! Tensor conversion utilities
//!
//! Convert between ONNX TensorProto and ndarray types. Decoding is exact:
//! a `Float` tensor only decodes to `f32` and a `Double` tensor to `f64`.

use ndarray::{Array, ArrayD, IxDyn};

use crate::error::{OnnxResult, TransformError};
use crate::proto::onnx::tensor_proto::DataType;
use crate::proto::TensorProto;

use super::dtype::{dtype_size, i32_to_dtype};
use super::shape::{numel, to_usize_shape};

/// Convert a `Float` TensorProto to an f32 ndarray
///
/// This handles both raw_data and float_data formats.
pub fn tensor_to_array_f32(tensor: &TensorProto) -> OnnxResult<ArrayD<f32>> {
    expect_dtype(tensor, DataType::Float)?;
    let data = if tensor.has_raw_data() {
        decode_raw(tensor, |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))?
    } else {
        tensor.float_data.clone()
    };
    shape_array(tensor, data)
}

/// Convert a `Double` TensorProto to an f64 ndarray
///
/// This handles both raw_data and double_data formats.
pub fn tensor_to_array_f64(tensor: &TensorProto) -> OnnxResult<ArrayD<f64>> {
    expect_dtype(tensor, DataType::Double)?;
    let data = if tensor.has_raw_data() {
        decode_raw(tensor, |b| {
            f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })?
    } else {
        tensor.double_data.clone()
    };
    shape_array(tensor, data)
}

/// Create TensorProto from f32 array
pub fn array_to_tensor_f32(array: &ArrayD<f32>, name: &str) -> TensorProto {
    TensorProto {
        dims: array.shape().iter().map(|&d| d as i64).collect(),
        data_type: DataType::Float as i32,
        float_data: array.iter().copied().collect(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create TensorProto from f64 array
pub fn array_to_tensor_f64(array: &ArrayD<f64>, name: &str) -> TensorProto {
    TensorProto {
        dims: array.shape().iter().map(|&d| d as i64).collect(),
        data_type: DataType::Double as i32,
        double_data: array.iter().copied().collect(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create scalar TensorProto from f32
pub fn scalar_to_tensor_f32(value: f32, name: &str) -> TensorProto {
    TensorProto {
        dims: vec![],
        data_type: DataType::Float as i32,
        float_data: vec![value],
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create 1D TensorProto from f32 slice
pub fn vec_to_tensor_f32(data: &[f32], name: &str) -> TensorProto {
    TensorProto {
        dims: vec![data.len() as i64],
        data_type: DataType::Float as i32,
        float_data: data.to_vec(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create 1D TensorProto from f64 slice
pub fn vec_to_tensor_f64(data: &[f64], name: &str) -> TensorProto {
    TensorProto {
        dims: vec![data.len() as i64],
        data_type: DataType::Double as i32,
        double_data: data.to_vec(),
        name: name.to_string(),
        ..Default::default()
    }
}

// ============================================================================
// Internal helpers
// ============================================================================

fn expect_dtype(tensor: &TensorProto, expected: DataType) -> OnnxResult<()> {
    let dtype = i32_to_dtype(tensor.data_type)?;
    if dtype != expected {
        return Err(TransformError::InvalidDataType(tensor.data_type));
    }
    Ok(())
}

fn decode_raw<T>(tensor: &TensorProto, decode: impl Fn(&[u8]) -> T) -> OnnxResult<Vec<T>> {
    let elem_size = dtype_size(i32_to_dtype(tensor.data_type)?)?;
    let raw = &tensor.raw_data;
    if raw.len() % elem_size != 0 {
        return Err(TransformError::DataLengthMismatch {
            name: tensor.name.clone(),
            dims: tensor.dims.clone(),
            expected: numel(&tensor.dims).unwrap_or(usize::MAX),
            actual: raw.len() / elem_size,
        });
    }
    Ok(raw.chunks_exact(elem_size).map(decode).collect())
}

fn shape_array<T>(tensor: &TensorProto, data: Vec<T>) -> OnnxResult<ArrayD<T>> {
    let expected = numel(&tensor.dims);
    if expected != Some(data.len()) {
        return Err(TransformError::DataLengthMismatch {
            name: tensor.name.clone(),
            dims: tensor.dims.clone(),
            expected: expected.unwrap_or(usize::MAX),
            actual: data.len(),
        });
    }

    let shape = to_usize_shape(&tensor.name, &tensor.dims)?;
    Array::from_shape_vec(IxDyn(&shape), data).map_err(|e| TransformError::Internal(e.to_string()))
}
