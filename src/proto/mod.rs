//! ONNX Protocol Buffer types
//!
//! This module holds the prost message definitions for the persisted ONNX
//! records the optimizer reads and rewrites. Additional extension methods are
//! provided in the `extensions` submodule.

/// ONNX protobuf message types
#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod onnx;

// Re-export commonly used types at module level
pub use onnx::{
    AttributeProto, FunctionProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    SparseTensorProto, StringStringEntryProto, TensorAnnotation, TensorProto, TensorShapeProto,
    TrainingInfoProto, TypeProto, ValueInfoProto,
};

// Re-export submodules for nested types
pub use onnx::attribute_proto;
pub use onnx::tensor_proto;
pub use onnx::tensor_shape_proto;
pub use onnx::type_proto;

/// Extension methods for ONNX protobuf types
pub mod extensions;
