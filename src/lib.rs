//! # onnx-fuse
//!
//! Rule-based graph rewriting for ONNX models.
//!
//! This crate provides an arena graph over ONNX `GraphProto` records, the
//! query and mutation primitives rewrite rules are written with, a driver
//! that runs rules to a fixed point, and Conv fusion rules built on top.
//!
//! ## Features
//!
//! - **Graph queries**: op type / version / domain predicates, attribute and
//!   edge accessors, recursive subgraph traversal
//! - **Graph mutation**: node removal with consumer rewiring, initializer
//!   replacement
//! - **Constant folding arithmetic**: [`tensor::TensorValue`]
//! - **Fusion rules**: Conv + BatchNormalization, Conv + Mul, Conv + Add
//!
//! ## Example
//!
//! ```ignore
//! use onnx_fuse::prelude::*;
//!
//! let (optimized, stats) = conv_fusion_transformer().apply_to_model(&model)?;
//! println!("removed {} nodes", stats.nodes_removed);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod error;
pub mod graph;
pub mod opset;
pub mod proto;
pub mod tensor;
pub mod traits;
pub mod transform;
pub mod transformers;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use onnx_fuse::prelude::*`
pub mod prelude {
    pub use crate::error::{OnnxResult, TransformError};
    pub use crate::graph::{can_remove_node, query, remove_node, Graph, Node, NodeIndex};
    pub use crate::proto::onnx::*;
    pub use crate::tensor::TensorValue;
    pub use crate::traits::{RewriteRule, RuleEffect};
    pub use crate::transform::{RuleBasedGraphTransformer, TransformConfig, TransformStats};
    pub use crate::transformers::{
        conv_fusion_transformer, FuseConvAdd, FuseConvBN, FuseConvMul,
    };
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{OnnxResult, TransformError};
pub use traits::{RewriteRule, RuleEffect};

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
