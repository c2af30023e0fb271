//! Error types for onnx-fuse
//!
//! Rule-inapplicable situations are not errors: rewrite rules report them as
//! `Ok(RuleEffect::None)`. The variants below cover malformed input records and
//! broken graph invariants.

use thiserror::Error;

/// Main error type for graph construction and rewriting
#[derive(Error, Debug)]
pub enum TransformError {
    /// Invalid model or graph record
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Invalid node configuration
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// Node index does not refer to a live node
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Initializer not found
    #[error("Initializer not found: {0}")]
    InitializerNotFound(String),

    /// Invalid tensor data type
    #[error("Invalid data type: {0}")]
    InvalidDataType(i32),

    /// Tensor payload does not match its declared shape
    #[error("Tensor '{name}' holds {actual} elements, shape {dims:?} needs {expected}")]
    DataLengthMismatch {
        /// Tensor name
        name: String,
        /// Declared dims
        dims: Vec<i64>,
        /// Element count implied by dims
        expected: usize,
        /// Element count found in the payload
        actual: usize,
    },

    /// Tensor payload is stored outside the model record
    #[error("Tensor '{0}' stores its data externally")]
    ExternalData(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ONNX operations
pub type OnnxResult<T> = Result<T, TransformError>;
