//! Core traits for onnx-fuse
//!
//! Defines the two-phase rewrite rule contract the driver runs.

use crate::error::OnnxResult;
use crate::graph::{Graph, NodeIndex};

/// What a successful [`RewriteRule::apply`] did to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleEffect {
    /// Nothing changed
    #[default]
    None,
    /// Nodes other than the current one were changed or removed
    ModifiedRestOfGraph,
    /// The current node was updated in place
    UpdatedCurrentNode,
    /// The current node was removed
    RemovedCurrentNode,
}

impl RuleEffect {
    /// Whether the graph changed
    pub fn modified(self) -> bool {
        self != RuleEffect::None
    }

    /// Whether the current node no longer exists
    pub fn deleted(self) -> bool {
        self == RuleEffect::RemovedCurrentNode
    }
}

/// Local graph rewrite anchored on one node
///
/// The driver calls [`satisfy_condition`](RewriteRule::satisfy_condition)
/// first and only calls [`apply`](RewriteRule::apply) when it holds. `apply`
/// re-validates what it needs and either performs the whole rewrite or leaves
/// the graph untouched, reporting `Ok(RuleEffect::None)`.
///
/// # Example
///
/// ```ignore
/// struct DropIdentity;
///
/// impl RewriteRule for DropIdentity {
///     fn name(&self) -> &'static str { "DropIdentity" }
///     fn target_op_types(&self) -> &[&'static str] { &["Identity"] }
///     fn satisfy_condition(&self, graph: &Graph, node: NodeIndex) -> bool {
///         can_remove_node(graph, node)
///     }
///     fn apply(&self, graph: &mut Graph, node: NodeIndex) -> OnnxResult<RuleEffect> {
///         Ok(if remove_node(graph, node) {
///             RuleEffect::RemovedCurrentNode
///         } else {
///             RuleEffect::None
///         })
///     }
/// }
/// ```
pub trait RewriteRule {
    /// Rule name used in logs and statistics
    fn name(&self) -> &'static str;

    /// Op types this rule anchors on; empty means every op type
    fn target_op_types(&self) -> &[&'static str];

    /// Cheap structural check; must not mutate the graph
    fn satisfy_condition(&self, graph: &Graph, node: NodeIndex) -> bool;

    /// Perform the rewrite
    ///
    /// Returns `Err` only for broken graph invariants.
    fn apply(&self, graph: &mut Graph, node: NodeIndex) -> OnnxResult<RuleEffect>;
}
