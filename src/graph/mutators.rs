//! Graph mutation operations
//!
//! Low-level edits on [`Graph`] plus the node removal primitives rewrite rules
//! build on: [`remove_node_output_edges`], [`can_remove_node`] and
//! [`remove_node`].

use crate::proto::{AttributeProto, TensorProto};

use super::context::Graph;
use super::node::{EdgeEnd, Node, NodeIndex};

impl Graph {
    // ========================================================================
    // Node mutation
    // ========================================================================

    /// Point an explicit input slot at a different value
    ///
    /// The edge feeding the slot is dropped and an edge from the new value's
    /// producer, if any, is added.
    ///
    /// # Panics
    ///
    /// Panics when `slot` is not an explicit input slot of a live node.
    pub fn set_node_input(&mut self, index: NodeIndex, slot: usize, name: &str) {
        let node = self
            .node(index)
            .unwrap_or_else(|| panic!("node {index} is not in the graph"));
        assert!(
            slot < node.inputs.len(),
            "input slot {slot} out of range for node '{}'",
            node.name
        );

        let stale: Vec<EdgeEnd> = node
            .input_edges
            .iter()
            .filter(|e| e.dst_slot == slot)
            .copied()
            .collect();
        for edge in stale {
            self.remove_edge(edge.node, edge.src_slot, index, slot);
        }

        if let Some(node) = self.node_mut(index) {
            node.inputs[slot] = name.to_string();
        }
        if let Some((producer, src_slot)) = self.producer_of(name) {
            self.add_edge(producer, src_slot, index, slot);
        }
    }

    /// Append an explicit input and return its slot
    ///
    /// Implicit input slots shift up by one; their edges are renumbered.
    pub fn append_node_input(&mut self, index: NodeIndex, name: &str) -> usize {
        let node = self
            .node(index)
            .unwrap_or_else(|| panic!("node {index} is not in the graph"));
        let slot = node.inputs.len();

        let shifted: Vec<EdgeEnd> = node
            .input_edges
            .iter()
            .filter(|e| e.dst_slot >= slot)
            .copied()
            .collect();
        for edge in &shifted {
            self.remove_edge(edge.node, edge.src_slot, index, edge.dst_slot);
        }
        for edge in &shifted {
            self.add_edge(edge.node, edge.src_slot, index, edge.dst_slot + 1);
        }

        if let Some(node) = self.node_mut(index) {
            node.inputs.push(name.to_string());
        }
        if let Some((producer, src_slot)) = self.producer_of(name) {
            self.add_edge(producer, src_slot, index, slot);
        }
        slot
    }

    /// Set (or replace) an attribute on a node
    pub fn set_node_attribute(&mut self, index: NodeIndex, attr: AttributeProto) -> bool {
        match self.node_mut(index) {
            Some(node) => {
                node.attributes.insert(attr.name.clone(), attr);
                true
            }
            None => false,
        }
    }

    /// Assign a node to an execution provider
    pub fn set_execution_provider(&mut self, index: NodeIndex, provider: &str) -> bool {
        match self.node_mut(index) {
            Some(node) => {
                node.execution_provider = provider.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop a node from the arena along with every edge touching it
    ///
    /// Consumers keep their input names; use [`remove_node`] to rewire them.
    pub(crate) fn erase_node(&mut self, index: NodeIndex) -> Option<Node> {
        let node = self.nodes.get_mut(index.0)?.take()?;

        for edge in &node.input_edges {
            if let Some(producer) = self.node_mut(edge.node) {
                producer.output_edges.remove(&EdgeEnd {
                    node: index,
                    src_slot: edge.src_slot,
                    dst_slot: edge.dst_slot,
                });
            }
        }
        for edge in &node.output_edges {
            if let Some(consumer) = self.node_mut(edge.node) {
                consumer.input_edges.remove(&EdgeEnd {
                    node: index,
                    src_slot: edge.src_slot,
                    dst_slot: edge.dst_slot,
                });
            }
        }
        for (_, output) in node.defined_outputs() {
            if self.producer_map.get(output).map(|p| p.0) == Some(index) {
                self.producer_map.remove(output);
            }
        }

        Some(node)
    }

    // ========================================================================
    // Initializer mutation
    // ========================================================================

    /// Add an initializer, returning the one it replaced
    pub fn add_initializer(&mut self, tensor: TensorProto) -> Option<TensorProto> {
        self.initializers.insert(tensor.name.clone(), tensor)
    }

    /// Replace an existing initializer of the same name, keeping its position
    ///
    /// Returns the previous tensor, or `None` (and stores nothing) when no
    /// initializer of that name exists.
    pub fn replace_initializer(&mut self, tensor: TensorProto) -> Option<TensorProto> {
        let slot = self.initializers.get_mut(&tensor.name)?;
        Some(std::mem::replace(slot, tensor))
    }

    /// Remove an initializer
    pub fn remove_initializer(&mut self, name: &str) -> Option<TensorProto> {
        self.initializers.shift_remove(name)
    }

    /// Remove initializers no node, graph input or graph output refers to
    ///
    /// Reads from nested subgraphs count through the owning node's implicit
    /// inputs. Returns the number of initializers removed.
    pub fn remove_unused_initializers(&mut self) -> usize {
        let before = self.initializers.len();
        let readers = self.consumer_map();

        let unused: Vec<String> = self
            .initializers
            .keys()
            .filter(|name| {
                !readers.contains_key(name.as_str())
                    && !self.is_graph_input(name)
                    && !self.is_graph_output(name)
            })
            .cloned()
            .collect();
        for name in &unused {
            self.initializers.shift_remove(name);
        }

        before - self.initializers.len()
    }
}

/// Value that takes over the removed node's output
enum Replacement {
    /// Output of the node feeding the removed node
    Producer(String),
    /// Initializer the removed node read
    Initializer(String),
}

impl Replacement {
    fn name(&self) -> &str {
        match self {
            Replacement::Producer(name) | Replacement::Initializer(name) => name,
        }
    }
}

/// Work out what the output of `index` can be replaced with, if anything
fn removal_plan(graph: &Graph, index: NodeIndex) -> Option<Replacement> {
    let node = graph.node(index)?;
    if !node.implicit_inputs.is_empty() {
        return None;
    }

    let mut outputs = node.defined_outputs();
    let (_, output) = outputs.next()?;
    if outputs.next().is_some() || graph.is_graph_output(output) {
        return None;
    }

    // consumers reading the value from inside a subgraph cannot be rewired
    for edge in &node.output_edges {
        let consumer = graph.node(edge.node)?;
        if edge.dst_slot >= consumer.inputs.len() {
            return None;
        }
    }

    match node.input_edges.len() {
        1 => {
            let feed = node.input_edges.iter().next()?;
            let others_constant = node
                .defined_inputs()
                .filter(|&(slot, _)| slot != feed.dst_slot)
                .all(|(_, name)| graph.is_initializer(name));
            others_constant.then(|| Replacement::Producer(node.inputs[feed.dst_slot].clone()))
        }
        0 => {
            let mut inputs = node.defined_inputs();
            match (inputs.next(), inputs.next()) {
                (Some((_, name)), None) if graph.is_initializer(name) => {
                    Some(Replacement::Initializer(name.to_string()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Remove every edge leaving a node
///
/// Consumers keep their input names. Returns the number of edges removed.
pub fn remove_node_output_edges(graph: &mut Graph, index: NodeIndex) -> usize {
    let Some(node) = graph.node(index) else {
        return 0;
    };
    let edges: Vec<EdgeEnd> = node.output_edges.iter().copied().collect();
    for edge in &edges {
        graph.remove_edge(index, edge.src_slot, edge.node, edge.dst_slot);
    }
    edges.len()
}

/// Whether [`remove_node`] would succeed for this node
///
/// A node can be removed when it produces exactly one value that is not a
/// graph output and is not read from inside a subgraph, it has no implicit
/// inputs, and either
///
/// 1. exactly one input is fed by another node and every other provided input
///    is an initializer, or
/// 2. no input is fed by a node and its only provided input is an initializer.
pub fn can_remove_node(graph: &Graph, index: NodeIndex) -> bool {
    removal_plan(graph, index).is_some()
}

/// Remove a node, rewiring its consumers to the value it was fed
///
/// Every consumer slot that read the removed node's output is pointed at the
/// replacement value. When the replacement is another node's output, each
/// rewired slot gets its own edge from that producer. Returns `false` and
/// leaves the graph untouched when [`can_remove_node`] is false.
pub fn remove_node(graph: &mut Graph, index: NodeIndex) -> bool {
    let Some(replacement) = removal_plan(graph, index) else {
        return false;
    };
    let consumers: Vec<EdgeEnd> = match graph.node(index) {
        Some(node) => node.output_edges.iter().copied().collect(),
        None => return false,
    };

    remove_node_output_edges(graph, index);
    graph.erase_node(index);

    for edge in consumers {
        graph.set_node_input(edge.node, edge.dst_slot, replacement.name());
    }
    if let Replacement::Initializer(name) = &replacement {
        tracing::trace!(node = %index, initializer = %name, "rewired consumers to initializer");
    }
    true
}
