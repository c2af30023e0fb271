//! Shape utilities for ONNX tensors

use crate::error::{OnnxResult, TransformError};

/// Calculate total number of elements from shape
///
/// An empty shape is a scalar. Returns `None` when the product overflows.
pub fn numel(shape: &[i64]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d.max(0)).ok()?))
}

/// Check if shape contains dynamic dimensions (negative values)
pub fn is_dynamic(shape: &[i64]) -> bool {
    shape.iter().any(|&d| d < 0)
}

/// Convert ONNX dims to an ndarray shape, rejecting negative dims
pub fn to_usize_shape(name: &str, dims: &[i64]) -> OnnxResult<Vec<usize>> {
    if is_dynamic(dims) {
        return Err(TransformError::InvalidModel(format!(
            "tensor '{}' has negative dims {:?}",
            name, dims
        )));
    }
    Ok(dims.iter().map(|&d| d as usize).collect())
}

/// Whether `dims` is a per-channel shape `[channels, 1, ..., 1]` of rank `rank`
pub fn is_channel_shape(dims: &[i64], channels: i64, rank: usize) -> bool {
    dims.len() == rank
        && dims.first() == Some(&channels)
        && dims.iter().skip(1).all(|&d| d == 1)
}
