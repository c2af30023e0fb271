//! ONNX data type mappings
//!
//! Maps between ONNX TensorProto data types and Rust types.

use crate::error::{OnnxResult, TransformError};
use crate::proto::onnx::tensor_proto::DataType;
use crate::proto::TensorProto;

/// Size in bytes for each fixed-width ONNX data type
pub fn dtype_size(dtype: DataType) -> OnnxResult<usize> {
    match dtype {
        DataType::Float => Ok(4),
        DataType::Uint8 => Ok(1),
        DataType::Int8 => Ok(1),
        DataType::Uint16 => Ok(2),
        DataType::Int16 => Ok(2),
        DataType::Int32 => Ok(4),
        DataType::Int64 => Ok(8),
        DataType::Bool => Ok(1),
        DataType::Float16 => Ok(2),
        DataType::Double => Ok(8),
        DataType::Uint32 => Ok(4),
        DataType::Uint64 => Ok(8),
        DataType::Bfloat16 => Ok(2),
        _ => Err(TransformError::InvalidDataType(dtype as i32)),
    }
}

/// Convert i32 to DataType enum
pub fn i32_to_dtype(value: i32) -> OnnxResult<DataType> {
    DataType::try_from(value).map_err(|_| TransformError::InvalidDataType(value))
}

/// Check if data type is floating point
pub fn is_float_type(dtype: DataType) -> bool {
    matches!(
        dtype,
        DataType::Float | DataType::Double | DataType::Float16 | DataType::Bfloat16
    )
}

/// Whether constant folding arithmetic supports this element type
///
/// Only 32- and 64-bit floats are supported.
pub fn is_supported_dtype(dtype: DataType) -> bool {
    matches!(dtype, DataType::Float | DataType::Double)
}

/// Whether a tensor's element type is supported by [`TensorValue`]
///
/// [`TensorValue`]: super::TensorValue
pub fn is_supported_data_type(tensor: &TensorProto) -> bool {
    is_supported_dtype(tensor.data_type_enum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(dtype_size(DataType::Float).unwrap(), 4);
        assert_eq!(dtype_size(DataType::Int64).unwrap(), 8);
        assert_eq!(dtype_size(DataType::Double).unwrap(), 8);
        assert!(dtype_size(DataType::String).is_err());
    }

    #[test]
    fn test_i32_to_dtype() {
        assert_eq!(i32_to_dtype(1).unwrap(), DataType::Float);
        assert_eq!(i32_to_dtype(11).unwrap(), DataType::Double);
        assert!(i32_to_dtype(999).is_err());
    }

    #[test]
    fn test_supported_data_type() {
        let mut tensor = TensorProto {
            data_type: DataType::Float as i32,
            ..Default::default()
        };
        assert!(is_supported_data_type(&tensor));

        tensor.data_type = DataType::Double as i32;
        assert!(is_supported_data_type(&tensor));

        for unsupported in [DataType::Float16, DataType::Int64, DataType::Undefined] {
            tensor.data_type = unsupported as i32;
            assert!(!is_supported_data_type(&tensor), "{unsupported:?}");
        }
        assert!(is_float_type(DataType::Float16));
    }
}
