//! Graph analysis methods
//!
//! Name resolution, connectivity and ordering queries on [`Graph`].

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::FxHashMap;

use super::context::Graph;
use super::maps::{build_consumer_map, ConsumerMap};
use super::node::NodeIndex;
use super::query::for_all_subgraphs;

/// What a value name resolves to inside one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeArg {
    /// Declared graph input
    GraphInput,
    /// Constant initializer
    Initializer,
    /// Sparse constant initializer
    SparseInitializer,
    /// Output of a node
    NodeOutput {
        /// Producing node
        producer: NodeIndex,
        /// Output slot on the producer
        slot: usize,
    },
}

impl Graph {
    /// Resolve a value name
    ///
    /// Node outputs take precedence, then initializers, then graph inputs.
    pub fn resolve_node_arg(&self, name: &str) -> Option<NodeArg> {
        if let Some((producer, slot)) = self.producer_of(name) {
            Some(NodeArg::NodeOutput { producer, slot })
        } else if self.is_initializer(name) {
            Some(NodeArg::Initializer)
        } else if self.is_sparse_initializer(name) {
            Some(NodeArg::SparseInitializer)
        } else if self.is_graph_input(name) {
            Some(NodeArg::GraphInput)
        } else {
            None
        }
    }

    // ========================================================================
    // Connectivity analysis
    // ========================================================================

    /// Number of edges leaving a node, zero for a missing node
    pub fn output_edges_count(&self, index: NodeIndex) -> usize {
        self.node(index).map_or(0, |n| n.output_edges_count())
    }

    /// Number of edges arriving at a node, zero for a missing node
    pub fn input_edges_count(&self, index: NodeIndex) -> usize {
        self.node(index).map_or(0, |n| n.input_edges_count())
    }

    /// Distinct consumers of a node, ascending by index
    pub fn output_nodes(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.node(index)
            .map(|n| {
                n.output_edges()
                    .map(|e| e.node)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distinct producers feeding a node, ascending by index
    pub fn input_nodes(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.node(index)
            .map(|n| {
                n.input_edges()
                    .map(|e| e.node)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check if the output of the first node feeds the second
    pub fn are_adjacent(&self, first: NodeIndex, second: NodeIndex) -> bool {
        self.node(first)
            .map(|n| n.output_edges().any(|e| e.node == second))
            .unwrap_or(false)
    }

    /// Check if any output of a node is a graph output
    pub fn is_node_outputs_in_graph_outputs(&self, index: NodeIndex) -> bool {
        self.node(index)
            .map(|n| n.defined_outputs().any(|(_, o)| self.is_graph_output(o)))
            .unwrap_or(false)
    }

    /// Every (consumer, slot) reading each value in this graph
    pub fn consumer_map(&self) -> ConsumerMap {
        build_consumer_map(self.nodes())
    }

    /// Number of input slots across this graph reading a value
    ///
    /// Reads from inside subgraphs count through the owning node's implicit
    /// inputs.
    pub fn value_use_count(&self, name: &str) -> usize {
        self.nodes()
            .flat_map(|n| n.inputs.iter().chain(n.implicit_inputs.iter()))
            .filter(|input| *input == name)
            .count()
    }

    /// Check if a value is read by exactly one input slot
    pub fn is_single_use(&self, name: &str) -> bool {
        self.value_use_count(name) == 1
    }

    // ========================================================================
    // Ordering and naming
    // ========================================================================

    /// Topological order of live nodes (Kahn's algorithm over edges)
    ///
    /// Ties are broken by arena index. Nodes caught in a cycle are appended
    /// in arena order.
    pub fn topological_order(&self) -> Vec<NodeIndex> {
        let mut in_degree: FxHashMap<NodeIndex, usize> = self
            .nodes()
            .map(|n| (n.index, self.input_nodes(n.index).len()))
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .nodes()
            .filter(|n| in_degree[&n.index] == 0)
            .map(|n| n.index)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(index) = queue.pop_front() {
            order.push(index);
            for consumer in self.output_nodes(index) {
                if let Some(count) = in_degree.get_mut(&consumer) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        queue.push_back(consumer);
                    }
                }
            }
        }

        if order.len() < in_degree.len() {
            let placed: BTreeSet<NodeIndex> = order.iter().copied().collect();
            order.extend(self.node_indices().into_iter().filter(|i| !placed.contains(i)));
        }
        order
    }

    /// Check if a name is taken in this graph or any nested subgraph
    ///
    /// Names are single-assignment across scopes, so a value defined only
    /// inside a subgraph still blocks the name in the enclosing graph.
    pub fn is_name_in_use(&self, name: &str) -> bool {
        if self.is_name_used_locally(name) {
            return true;
        }
        let mut nested = false;
        // the visitor never fails
        let _ = for_all_subgraphs(self, &mut |subgraph: &Graph| {
            nested |= subgraph.is_name_used_locally(name);
            Ok(())
        });
        nested
    }

    fn is_name_used_locally(&self, name: &str) -> bool {
        self.defines_value(name)
            || self.is_graph_output(name)
            || self.value_use_count(name) > 0
    }

    /// Generate a value name not yet used in this graph or its subgraphs
    ///
    /// Returns `base` itself when it is free, otherwise `base_N` for the first
    /// free counter value.
    pub fn generate_node_arg_name(&mut self, base: &str) -> String {
        if !self.is_name_in_use(base) {
            return base.to_string();
        }
        loop {
            let candidate = format!("{}_{}", base, self.name_counter);
            self.name_counter += 1;
            if !self.is_name_in_use(&candidate) {
                return candidate;
            }
        }
    }
}
