//! Graph representation and manipulation for ONNX models
//!
//! - [`Graph`]: node arena with explicit producer/consumer edges
//! - [`query`]: read-only predicates and accessors used by rewrite rules
//! - [`mutators`]: node removal primitives
//!
//! # Overview
//!
//! Every node lives in an arena slot addressed by [`NodeIndex`]. An edge
//! connects one producer output slot to one consumer input slot and is stored
//! on both endpoints as an [`EdgeEnd`], so fan-out is counted per consumer
//! slot. Initializers and graph inputs have no producer and do not create
//! edges. Control-flow nodes own their subgraphs; names a subgraph reads from
//! the enclosing scope become implicit inputs of the owning node and are
//! linked by edges like explicit inputs.
//!
//! # Example
//!
//! ```ignore
//! use onnx_fuse::graph::{query, remove_node, Graph};
//!
//! let mut graph = Graph::from_model(&model)?;
//! for index in graph.topological_order() {
//!     let Some(node) = graph.node(index) else { continue };
//!     if node.op_type() != "Identity" || query::all_node_inputs_are_constant(&graph, node) {
//!         continue;
//!     }
//!     remove_node(&mut graph, index);
//! }
//! ```

pub mod accessors;
pub mod context;
pub mod maps;
pub mod mutators;
pub mod node;
pub mod query;

// Re-export main types
pub use accessors::NodeArg;
pub use context::Graph;
pub use maps::{ConsumerMap, InitializerMap, ProducerMap};
pub use mutators::{can_remove_node, remove_node, remove_node_output_edges};
pub use node::{EdgeEnd, Node, NodeIndex, Subgraph};
