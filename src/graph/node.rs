//! Node storage for the graph arena
//!
//! Nodes are addressed by [`NodeIndex`]. Links between nodes are stored twice,
//! once on each endpoint, as [`EdgeEnd`] records naming the node on the other
//! side and the output/input slots the edge connects.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;

use crate::error::OnnxResult;
use crate::opset::{normalize_domain, OpsetMap};
use crate::proto::attribute_proto::AttributeType;
use crate::proto::{AttributeProto, NodeProto, StringStringEntryProto};

use super::context::Graph;

/// Stable index of a node inside its graph's arena
///
/// Indices are never reused after a node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub(crate) usize);

impl NodeIndex {
    /// Raw arena position
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One endpoint of a producer → consumer edge
///
/// Stored on the producer it names the consumer, stored on the consumer it
/// names the producer. `src_slot` indexes the producer's outputs, `dst_slot`
/// the consumer's explicit inputs followed by its implicit inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeEnd {
    /// Node on the other side of the edge
    pub node: NodeIndex,
    /// Output slot on the producer
    pub src_slot: usize,
    /// Input slot on the consumer
    pub dst_slot: usize,
}

/// Subgraph owned by a control-flow node attribute
#[derive(Debug, Clone)]
pub struct Subgraph {
    /// Name of the attribute holding the subgraph
    pub attribute: String,
    /// The nested graph
    pub graph: Graph,
}

/// Operator instance stored in a [`Graph`]
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) index: NodeIndex,
    pub(crate) name: String,
    pub(crate) op_type: String,
    pub(crate) domain: String,
    pub(crate) since_version: i64,
    pub(crate) attributes: IndexMap<String, AttributeProto>,
    pub(crate) inputs: Vec<String>,
    pub(crate) implicit_inputs: Vec<String>,
    pub(crate) outputs: Vec<String>,
    pub(crate) execution_provider: String,
    pub(crate) subgraphs: Vec<Subgraph>,
    pub(crate) input_edges: BTreeSet<EdgeEnd>,
    pub(crate) output_edges: BTreeSet<EdgeEnd>,
    pub(crate) doc_string: String,
    pub(crate) overload: String,
    pub(crate) metadata_props: Vec<StringStringEntryProto>,
}

impl Node {
    /// Build a node from its record
    ///
    /// Subgraph attributes are parsed into owned [`Graph`]s that inherit
    /// `opsets`; their bodies are stripped from the stored attribute. Names the
    /// subgraphs read from the enclosing scope become the node's implicit inputs.
    pub(crate) fn from_proto(
        index: NodeIndex,
        proto: &NodeProto,
        since_version: i64,
        opsets: &OpsetMap,
    ) -> OnnxResult<Self> {
        let mut attributes = IndexMap::with_capacity(proto.attribute.len());
        let mut subgraphs = Vec::new();

        for attr in &proto.attribute {
            let mut stored = attr.clone();
            match attr.attribute_type() {
                AttributeType::Graph => {
                    if let Some(body) = stored.g.take() {
                        subgraphs.push(Subgraph {
                            attribute: attr.name.clone(),
                            graph: Graph::from_graph_proto(&body, opsets)?,
                        });
                    }
                }
                AttributeType::Graphs => {
                    for body in std::mem::take(&mut stored.graphs) {
                        subgraphs.push(Subgraph {
                            attribute: attr.name.clone(),
                            graph: Graph::from_graph_proto(&body, opsets)?,
                        });
                    }
                }
                _ => {}
            }
            attributes.insert(attr.name.clone(), stored);
        }

        let mut implicit_inputs: Vec<String> = Vec::new();
        for subgraph in &subgraphs {
            for name in subgraph.graph.outer_scope_references() {
                if !implicit_inputs.contains(&name) {
                    implicit_inputs.push(name);
                }
            }
        }

        Ok(Self {
            index,
            name: proto.name.clone(),
            op_type: proto.op_type.clone(),
            domain: normalize_domain(&proto.domain).to_string(),
            since_version,
            attributes,
            inputs: proto.input.clone(),
            implicit_inputs,
            outputs: proto.output.clone(),
            execution_provider: String::new(),
            subgraphs,
            input_edges: BTreeSet::new(),
            output_edges: BTreeSet::new(),
            doc_string: proto.doc_string.clone(),
            overload: proto.overload.clone(),
            metadata_props: proto.metadata_props.clone(),
        })
    }

    /// Serialize back into a record, re-attaching subgraph bodies
    pub fn to_proto(&self) -> NodeProto {
        let attribute = self
            .attributes
            .values()
            .map(|attr| {
                let mut attr = attr.clone();
                let mut bodies = self
                    .subgraphs
                    .iter()
                    .filter(|s| s.attribute == attr.name)
                    .map(|s| s.graph.to_graph_proto());
                match attr.attribute_type() {
                    AttributeType::Graph => attr.g = bodies.next(),
                    AttributeType::Graphs => attr.graphs = bodies.collect(),
                    _ => {}
                }
                attr
            })
            .collect();

        NodeProto {
            input: self.inputs.clone(),
            output: self.outputs.clone(),
            name: self.name.clone(),
            op_type: self.op_type.clone(),
            domain: self.domain.clone(),
            overload: self.overload.clone(),
            attribute,
            doc_string: self.doc_string.clone(),
            metadata_props: self.metadata_props.clone(),
        }
    }

    /// Arena index of this node
    pub fn index(&self) -> NodeIndex {
        self.index
    }

    /// Node name (may be empty)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operator type
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    /// Operator domain, empty for the default ONNX domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Schema revision this node is bound to
    pub fn since_version(&self) -> i64 {
        self.since_version
    }

    /// Attributes by name, in record order
    pub fn attributes(&self) -> &IndexMap<String, AttributeProto> {
        &self.attributes
    }

    /// Explicit input names; an empty name marks an omitted optional input
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Names read from the enclosing scope by this node's subgraphs
    pub fn implicit_inputs(&self) -> &[String] {
        &self.implicit_inputs
    }

    /// Output names; an empty name marks an omitted optional output
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Assigned execution provider, empty when unassigned
    pub fn execution_provider(&self) -> &str {
        &self.execution_provider
    }

    /// Subgraphs owned by this node's attributes
    pub fn subgraphs(&self) -> &[Subgraph] {
        &self.subgraphs
    }

    /// Edges arriving at this node
    pub fn input_edges(&self) -> impl Iterator<Item = &EdgeEnd> {
        self.input_edges.iter()
    }

    /// Edges leaving this node
    pub fn output_edges(&self) -> impl Iterator<Item = &EdgeEnd> {
        self.output_edges.iter()
    }

    /// Number of edges arriving at this node
    pub fn input_edges_count(&self) -> usize {
        self.input_edges.len()
    }

    /// Number of edges leaving this node (fan-out counts every consumer slot)
    pub fn output_edges_count(&self) -> usize {
        self.output_edges.len()
    }

    /// Name at an input slot, counting explicit inputs then implicit inputs
    pub fn input_slot_name(&self, slot: usize) -> Option<&str> {
        if slot < self.inputs.len() {
            Some(&self.inputs[slot])
        } else {
            self.implicit_inputs
                .get(slot - self.inputs.len())
                .map(String::as_str)
        }
    }

    /// Explicit inputs that are actually provided
    pub fn defined_inputs(&self) -> impl Iterator<Item = (usize, &str)> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(slot, name)| (slot, name.as_str()))
    }

    /// Outputs that are actually produced
    pub fn defined_outputs(&self) -> impl Iterator<Item = (usize, &str)> {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(slot, name)| (slot, name.as_str()))
    }
}
