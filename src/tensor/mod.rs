//! Tensor utilities for ONNX models
//!
//! This module provides utilities for working with ONNX tensors:
//! - Data type mappings (`dtype`)
//! - Shape utilities (`shape`)
//! - Conversion between TensorProto and ndarray (`convert`)
//! - Dtype-checked constant arithmetic (`value`)
//!
//! # Example
//!
//! ```ignore
//! use onnx_fuse::tensor::TensorValue;
//!
//! let mut var = TensorValue::from_proto(&variance)?;
//! var.add_scalar(1e-5);
//! var.sqrt();
//!
//! let folded = var.into_proto(&variance);
//! ```

pub mod convert;
pub mod dtype;
pub mod shape;
pub mod value;

// Re-export commonly used items
pub use convert::{
    array_to_tensor_f32, array_to_tensor_f64, scalar_to_tensor_f32, tensor_to_array_f32,
    tensor_to_array_f64, vec_to_tensor_f32, vec_to_tensor_f64,
};
pub use dtype::{dtype_size, i32_to_dtype, is_float_type, is_supported_data_type};
pub use shape::{is_channel_shape, is_dynamic, numel};
pub use value::{TensorData, TensorValue};
