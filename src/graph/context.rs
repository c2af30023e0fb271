//! Graph arena for ONNX model manipulation
//!
//! [`Graph`] owns its nodes in an arena addressed by [`NodeIndex`]. Removed
//! nodes leave an empty slot so indices held by callers never alias a
//! different node. Alongside the arena it keeps:
//!
//! | Table | Description |
//! |-------|-------------|
//! | `producer_map` | output name → (producer node, output slot) |
//! | `initializers` | name → TensorProto (record order preserved) |
//! | `inputs` / `outputs` | graph interface, in record order |
//! | `opsets` | domain → imported opset version |

use std::collections::BTreeSet;

use crate::error::{OnnxResult, TransformError};
use crate::opset::{normalize_domain, opset_map, resolve_since_version, OpsetMap};
use crate::proto::{
    GraphProto, ModelProto, NodeProto, SparseTensorProto, StringStringEntryProto,
    TensorAnnotation, TensorProto, ValueInfoProto,
};

use super::maps::{build_initializer_map, register_producer, InitializerMap, ProducerMap};
use super::node::{EdgeEnd, Node, NodeIndex};

/// ONNX graph with explicit producer/consumer edges
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) name: String,
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) producer_map: ProducerMap,
    pub(crate) initializers: InitializerMap,
    pub(crate) inputs: Vec<ValueInfoProto>,
    pub(crate) outputs: Vec<ValueInfoProto>,
    pub(crate) value_info: Vec<ValueInfoProto>,
    pub(crate) opsets: OpsetMap,
    pub(crate) doc_string: String,
    pub(crate) sparse_initializers: Vec<SparseTensorProto>,
    pub(crate) quantization_annotation: Vec<TensorAnnotation>,
    pub(crate) metadata_props: Vec<StringStringEntryProto>,
    pub(crate) name_counter: usize,
}

impl Graph {
    /// Create an empty graph importing the given opsets
    pub fn new(name: &str, opsets: OpsetMap) -> Self {
        Self {
            name: name.to_string(),
            opsets,
            ..Default::default()
        }
    }

    /// Create an empty graph importing `version` of the default domain
    pub fn with_opset(name: &str, version: i64) -> Self {
        let mut opsets = OpsetMap::default();
        opsets.insert(String::new(), version);
        Self::new(name, opsets)
    }

    /// Build a graph from its record
    ///
    /// Fails when two nodes produce the same value or two initializers share
    /// a name.
    pub fn from_graph_proto(proto: &GraphProto, opsets: &OpsetMap) -> OnnxResult<Self> {
        let mut graph = Self::new(&proto.name, opsets.clone());
        graph.initializers = build_initializer_map(&proto.initializer)?;
        graph.inputs = proto.input.clone();
        graph.outputs = proto.output.clone();
        graph.value_info = proto.value_info.clone();
        graph.doc_string = proto.doc_string.clone();
        graph.sparse_initializers = proto.sparse_initializer.clone();
        graph.quantization_annotation = proto.quantization_annotation.clone();
        graph.metadata_props = proto.metadata_props.clone();

        for node in &proto.node {
            let since = graph.resolve_since_version(node);
            graph.insert_node(node, since)?;
        }
        graph.link_all_edges();

        Ok(graph)
    }

    /// Build the main graph of a model
    pub fn from_model(model: &ModelProto) -> OnnxResult<Self> {
        let proto = model
            .graph
            .as_ref()
            .ok_or_else(|| TransformError::MissingField("model.graph".to_string()))?;

        let opsets = opset_map(&model.opset_import);
        if !opsets.contains_key("") {
            return Err(TransformError::MissingField(
                "opset_import for the default domain".to_string(),
            ));
        }

        Self::from_graph_proto(proto, &opsets)
    }

    /// Serialize back into a record
    ///
    /// Live nodes are written in arena order.
    pub fn to_graph_proto(&self) -> GraphProto {
        GraphProto {
            node: self.nodes().map(Node::to_proto).collect(),
            name: self.name.clone(),
            initializer: self.initializers.values().cloned().collect(),
            sparse_initializer: self.sparse_initializers.clone(),
            doc_string: self.doc_string.clone(),
            input: self.inputs.clone(),
            output: self.outputs.clone(),
            value_info: self.value_info.clone(),
            quantization_annotation: self.quantization_annotation.clone(),
            metadata_props: self.metadata_props.clone(),
        }
    }

    /// Write this graph into a copy of `template`
    pub fn to_model(&self, template: &ModelProto) -> ModelProto {
        let mut model = template.clone();
        model.graph = Some(self.to_graph_proto());
        model
    }

    /// Add a node, resolving its since version from the imported opsets
    pub fn add_node(&mut self, proto: NodeProto) -> OnnxResult<NodeIndex> {
        let since = self.resolve_since_version(&proto);
        self.add_node_with_version(proto, since)
    }

    /// Add a node bound to an explicit since version
    ///
    /// Edges are created from existing producers of its inputs and to existing
    /// consumers of its outputs.
    pub fn add_node_with_version(
        &mut self,
        proto: NodeProto,
        since_version: i64,
    ) -> OnnxResult<NodeIndex> {
        let index = self.insert_node(&proto, since_version)?;
        self.link_input_edges(index);

        let outputs: Vec<String> = self
            .node(index)
            .map(|n| n.defined_outputs().map(|(_, o)| o.to_string()).collect())
            .unwrap_or_default();
        let readers: Vec<(NodeIndex, usize, usize)> = self
            .nodes()
            .filter(|n| n.index != index)
            .flat_map(|n| {
                let slots = n.inputs.iter().chain(n.implicit_inputs.iter());
                slots
                    .enumerate()
                    .filter_map(|(dst, name)| {
                        outputs
                            .iter()
                            .position(|o| o == name)
                            .map(|_| (n.index, dst, self.producer_map[name].1))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        for (consumer, dst_slot, src_slot) in readers {
            self.add_edge(index, src_slot, consumer, dst_slot);
        }

        Ok(index)
    }

    fn resolve_since_version(&self, proto: &NodeProto) -> i64 {
        let domain = normalize_domain(&proto.domain);
        let opset = self.opsets.get(domain).copied().unwrap_or(1);
        resolve_since_version(&proto.op_type, domain, opset)
    }

    fn insert_node(&mut self, proto: &NodeProto, since_version: i64) -> OnnxResult<NodeIndex> {
        let index = NodeIndex(self.nodes.len());
        let node = Node::from_proto(index, proto, since_version, &self.opsets)?;
        register_producer(&mut self.producer_map, &node)?;
        self.nodes.push(Some(node));
        Ok(index)
    }

    fn link_all_edges(&mut self) {
        let indices = self.node_indices();
        for index in indices {
            self.link_input_edges(index);
        }
    }

    /// Create edges from the producers of every input slot of `index`
    fn link_input_edges(&mut self, index: NodeIndex) {
        let Some(node) = self.node(index) else {
            return;
        };
        let links: Vec<(NodeIndex, usize, usize)> = node
            .inputs
            .iter()
            .chain(node.implicit_inputs.iter())
            .enumerate()
            .filter_map(|(dst, name)| {
                self.producer_map
                    .get(name)
                    .map(|&(producer, src)| (producer, src, dst))
            })
            .collect();
        for (producer, src_slot, dst_slot) in links {
            self.add_edge(producer, src_slot, index, dst_slot);
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Imported opsets
    pub fn opsets(&self) -> &OpsetMap {
        &self.opsets
    }

    /// Get a live node
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.0).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(index.0).and_then(Option::as_mut)
    }

    /// Iterate over live nodes in arena order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().flatten()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut().flatten()
    }

    /// Snapshot of live node indices in arena order
    pub fn node_indices(&self) -> Vec<NodeIndex> {
        self.nodes().map(|n| n.index).collect()
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    /// Find a live node by name
    pub fn find_node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.nodes().find(|n| n.name == name).map(|n| n.index)
    }

    /// Producer and output slot of a value
    pub fn producer_of(&self, name: &str) -> Option<(NodeIndex, usize)> {
        self.producer_map.get(name).copied()
    }

    /// Get initializer by name
    pub fn initializer(&self, name: &str) -> Option<&TensorProto> {
        self.initializers.get(name)
    }

    /// Iterate over initializers in record order
    pub fn initializers(&self) -> impl Iterator<Item = &TensorProto> {
        self.initializers.values()
    }

    /// Check if a value is an initializer
    pub fn is_initializer(&self, name: &str) -> bool {
        self.initializers.contains_key(name)
    }

    /// Graph inputs in record order
    pub fn inputs(&self) -> &[ValueInfoProto] {
        &self.inputs
    }

    /// Graph outputs in record order
    pub fn outputs(&self) -> &[ValueInfoProto] {
        &self.outputs
    }

    /// Check if a value is a declared graph input
    pub fn is_graph_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|vi| vi.name == name)
    }

    /// Check if a value is a graph output
    pub fn is_graph_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|vi| vi.name == name)
    }

    /// Whether a name resolves inside this graph
    ///
    /// True for node outputs, graph inputs, initializers and sparse
    /// initializers.
    pub fn defines_value(&self, name: &str) -> bool {
        self.producer_map.contains_key(name)
            || self.initializers.contains_key(name)
            || self.is_sparse_initializer(name)
            || self.is_graph_input(name)
    }

    /// Check if a value is a sparse initializer
    pub fn is_sparse_initializer(&self, name: &str) -> bool {
        self.sparse_initializers
            .iter()
            .any(|s| s.values.as_ref().is_some_and(|v| v.name == name))
    }

    /// Names this graph (or its nested subgraphs) read from enclosing scopes
    ///
    /// Returned in first-use order without duplicates.
    pub fn outer_scope_references(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for node in self.nodes() {
            for name in node.inputs.iter().chain(node.implicit_inputs.iter()) {
                if !name.is_empty() && !self.defines_value(name) && seen.insert(name.as_str()) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    // ========================================================================
    // Edge bookkeeping
    // ========================================================================

    /// Record an edge on both endpoints
    pub fn add_edge(
        &mut self,
        producer: NodeIndex,
        src_slot: usize,
        consumer: NodeIndex,
        dst_slot: usize,
    ) {
        if let Some(node) = self.node_mut(producer) {
            node.output_edges.insert(EdgeEnd {
                node: consumer,
                src_slot,
                dst_slot,
            });
        }
        if let Some(node) = self.node_mut(consumer) {
            node.input_edges.insert(EdgeEnd {
                node: producer,
                src_slot,
                dst_slot,
            });
        }
    }

    /// Remove an edge from both endpoints, returning whether it existed
    pub fn remove_edge(
        &mut self,
        producer: NodeIndex,
        src_slot: usize,
        consumer: NodeIndex,
        dst_slot: usize,
    ) -> bool {
        let mut removed = false;
        if let Some(node) = self.node_mut(producer) {
            removed |= node.output_edges.remove(&EdgeEnd {
                node: consumer,
                src_slot,
                dst_slot,
            });
        }
        if let Some(node) = self.node_mut(consumer) {
            removed |= node.input_edges.remove(&EdgeEnd {
                node: producer,
                src_slot,
                dst_slot,
            });
        }
        removed
    }
}
