//! Graph transformation module
//!
//! - [`RuleBasedGraphTransformer`]: runs [`RewriteRule`]s over a [`Graph`]
//!   until a fixed point
//! - [`TransformConfig`]: pass limit, error policy, cleanup, provider filter
//!
//! # Overview
//!
//! Each pass takes a topological snapshot of node indices. Nodes removed
//! earlier in the pass are skipped, as are nodes assigned to an incompatible
//! execution provider. For every remaining node each rule targeting its op type
//! is probed with `satisfy_condition` and, if that holds, applied. Once a rule
//! removes the node no further rules see it. Nested subgraphs are rewritten
//! before the graph that owns them.
//!
//! # Example
//!
//! ```ignore
//! use onnx_fuse::transform::{RuleBasedGraphTransformer, TransformConfig};
//! use onnx_fuse::transformers::{FuseConvAdd, FuseConvBN, FuseConvMul};
//!
//! let transformer = RuleBasedGraphTransformer::new("conv_fusion")
//!     .with_rule(FuseConvBN)
//!     .with_rule(FuseConvMul)
//!     .with_rule(FuseConvAdd)
//!     .with_config(TransformConfig::default().with_max_iterations(5));
//!
//! let stats = transformer.apply(&mut graph)?;
//! ```
//!
//! [`RewriteRule`]: crate::traits::RewriteRule
//! [`Graph`]: crate::graph::Graph

pub mod core;

// Re-export main types
pub use core::{RuleBasedGraphTransformer, TransformConfig, TransformStats};
