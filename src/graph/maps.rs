//! Graph map types and builders
//!
//! Lookup tables kept alongside the node arena.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{OnnxResult, TransformError};
use crate::proto::TensorProto;

use super::node::{Node, NodeIndex};

/// Maps output name → (producer node, output slot)
pub type ProducerMap = FxHashMap<String, (NodeIndex, usize)>;

/// Maps value name → every (consumer node, input slot) reading it
///
/// SmallVec optimized for the common case of 1-4 readers
pub type ConsumerMap = FxHashMap<String, SmallVec<[(NodeIndex, usize); 4]>>;

/// Maps initializer name → tensor (record order preserved)
pub type InitializerMap = IndexMap<String, TensorProto>;

/// Register the outputs of `node` in the producer map
///
/// Fails when an output name already has a producer.
pub fn register_producer(map: &mut ProducerMap, node: &Node) -> OnnxResult<()> {
    for (slot, output) in node.defined_outputs() {
        if let Some((other, _)) = map.get(output) {
            return Err(TransformError::InvalidModel(format!(
                "value '{}' is produced by both node {} and node {}",
                output, other, node.index
            )));
        }
        map.insert(output.to_string(), (node.index, slot));
    }
    Ok(())
}

/// Build the initializer map, rejecting duplicate names
pub fn build_initializer_map(initializers: &[TensorProto]) -> OnnxResult<InitializerMap> {
    let mut map = IndexMap::with_capacity(initializers.len());
    for tensor in initializers {
        if map.insert(tensor.name.clone(), tensor.clone()).is_some() {
            return Err(TransformError::InvalidModel(format!(
                "duplicate initializer '{}'",
                tensor.name
            )));
        }
    }
    Ok(map)
}

/// Build the consumer map from live nodes
///
/// Both explicit and implicit inputs are recorded, using the edge slot
/// numbering (implicit inputs follow the explicit ones).
pub fn build_consumer_map<'a>(nodes: impl Iterator<Item = &'a Node>) -> ConsumerMap {
    let mut map: ConsumerMap = FxHashMap::default();

    for node in nodes {
        let slots = node.inputs.iter().chain(node.implicit_inputs.iter());
        for (slot, name) in slots.enumerate() {
            if !name.is_empty() {
                map.entry(name.clone()).or_default().push((node.index, slot));
            }
        }
    }

    map
}
