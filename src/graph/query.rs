//! Read-only predicates and accessors used by rewrite rules
//!
//! These are free functions over [`Graph`] and [`Node`] so rules can combine
//! them without holding a borrow on any particular node for long.

use crate::error::OnnxResult;
use crate::opset::{covers_version, normalize_domain};
use crate::proto::attribute_proto::AttributeType;
use crate::proto::{AttributeProto, TensorProto};

use super::context::Graph;
use super::node::Node;

/// Whether `node` has op type `op_type`, lives in `domain` and covers `version`
pub fn is_supported_optype_version_and_domain(
    node: &Node,
    op_type: &str,
    version: i64,
    domain: &str,
) -> bool {
    is_supported_optype_versions_and_domain(node, op_type, &[version], domain)
}

/// Whether `node` matches `op_type` and `domain` and covers any of `versions`
///
/// Domains are compared after mapping `ai.onnx` onto the default domain.
pub fn is_supported_optype_versions_and_domain(
    node: &Node,
    op_type: &str,
    versions: &[i64],
    domain: &str,
) -> bool {
    node.op_type == op_type
        && node.domain == normalize_domain(domain)
        && versions
            .iter()
            .any(|&v| covers_version(&node.op_type, &node.domain, node.since_version, v))
}

/// Whether a node may run on one of the given providers
///
/// An empty provider list accepts every node.
pub fn is_supported_provider<S: AsRef<str>>(node: &Node, providers: &[S]) -> bool {
    providers.is_empty()
        || providers
            .iter()
            .any(|p| p.as_ref() == node.execution_provider)
}

/// Whether a node reads one value and produces one value
///
/// The node must have no implicit inputs, exactly one provided explicit input
/// and exactly one produced output. The output may fan out to many consumers.
pub fn is_single_in_single_out_node(node: &Node) -> bool {
    node.implicit_inputs.is_empty()
        && node.defined_inputs().count() == 1
        && node.defined_outputs().count() == 1
}

/// Whether a value name is a declared graph input
pub fn is_graph_input(graph: &Graph, name: &str) -> bool {
    graph.is_graph_input(name)
}

/// Whether every provided explicit input of `node` is an initializer
pub fn all_node_inputs_are_constant(graph: &Graph, node: &Node) -> bool {
    node.defined_inputs()
        .all(|(_, name)| graph.is_initializer(name))
}

/// Look up an attribute by name
pub fn get_node_attribute<'a>(node: &'a Node, name: &str) -> Option<&'a AttributeProto> {
    node.attributes.get(name)
}

/// Name of an explicit input
///
/// # Panics
///
/// Panics when `index` is not an explicit input slot.
pub fn get_node_input_name(node: &Node, index: usize) -> &str {
    assert!(
        index < node.inputs.len(),
        "input index {index} out of range for node '{}' with {} inputs",
        node.name,
        node.inputs.len()
    );
    &node.inputs[index]
}

/// Name of an output
///
/// # Panics
///
/// Panics when `index` is not an output slot.
pub fn get_node_output_name(node: &Node, index: usize) -> &str {
    assert!(
        index < node.outputs.len(),
        "output index {index} out of range for node '{}' with {} outputs",
        node.name,
        node.outputs.len()
    );
    &node.outputs[index]
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for String {}
    impl Sealed for crate::proto::TensorProto {}
}

/// Element types a repeated attribute can be decoded into
pub trait RepeatedAttributeValue: sealed::Sealed + Sized {
    /// Attribute type holding a list of `Self`
    const ATTRIBUTE_TYPE: AttributeType;

    /// Copy the list out of an attribute of the matching type
    fn collect(attr: &AttributeProto) -> Vec<Self>;
}

impl RepeatedAttributeValue for i64 {
    const ATTRIBUTE_TYPE: AttributeType = AttributeType::Ints;

    fn collect(attr: &AttributeProto) -> Vec<Self> {
        attr.ints.clone()
    }
}

impl RepeatedAttributeValue for f32 {
    const ATTRIBUTE_TYPE: AttributeType = AttributeType::Floats;

    fn collect(attr: &AttributeProto) -> Vec<Self> {
        attr.floats.clone()
    }
}

impl RepeatedAttributeValue for String {
    const ATTRIBUTE_TYPE: AttributeType = AttributeType::Strings;

    fn collect(attr: &AttributeProto) -> Vec<Self> {
        attr.strings
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }
}

impl RepeatedAttributeValue for TensorProto {
    const ATTRIBUTE_TYPE: AttributeType = AttributeType::Tensors;

    fn collect(attr: &AttributeProto) -> Vec<Self> {
        attr.tensors.clone()
    }
}

/// Decode a repeated attribute
///
/// Returns `None` when the attribute is absent or holds a different type.
pub fn get_repeated_node_attribute_values<T: RepeatedAttributeValue>(
    node: &Node,
    name: &str,
) -> Option<Vec<T>> {
    get_node_attribute(node, name)
        .filter(|attr| attr.attribute_type() == T::ATTRIBUTE_TYPE)
        .map(T::collect)
}

/// Visit every nested subgraph, pre-order
///
/// Each node's subgraphs are visited before descending into them. Stops at
/// the first error.
pub fn for_all_subgraphs<F>(graph: &Graph, func: &mut F) -> OnnxResult<()>
where
    F: FnMut(&Graph) -> OnnxResult<()>,
{
    for node in graph.nodes() {
        for subgraph in &node.subgraphs {
            func(&subgraph.graph)?;
            for_all_subgraphs(&subgraph.graph, func)?;
        }
    }
    Ok(())
}

/// Visit every nested subgraph mutably, pre-order
pub fn for_all_mutable_subgraphs<F>(graph: &mut Graph, func: &mut F) -> OnnxResult<()>
where
    F: FnMut(&mut Graph) -> OnnxResult<()>,
{
    for node in graph.nodes_mut() {
        for subgraph in &mut node.subgraphs {
            func(&mut subgraph.graph)?;
            for_all_mutable_subgraphs(&mut subgraph.graph, func)?;
        }
    }
    Ok(())
}
