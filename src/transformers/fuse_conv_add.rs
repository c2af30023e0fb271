//! Conv + Add fusion rule

use crate::error::OnnxResult;
use crate::graph::{can_remove_node, Graph, NodeIndex};
use crate::traits::{RewriteRule, RuleEffect};

use super::common::{
    channel_operand, commit, conv_bias, conv_successor, conv_weight, load, side_operand,
    BiasUpdate, Check, ConvUpdate, ELEMENTWISE_VERSIONS,
};

/// Fuse Conv + Add of a per-channel or scalar constant
///
/// Conv: y = W * x + b
/// Add:  z = y + a
///
/// Fused: z = W * x + (b + a)
///
/// The weight is untouched, so it may be shared with other nodes. A Conv
/// without bias gets `a`, spread to one value per output channel, as its new
/// third input.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseConvAdd;

impl FuseConvAdd {
    /// Create the rule
    pub fn new() -> Self {
        Self
    }

    fn plan(&self, graph: &Graph, conv: NodeIndex, add: NodeIndex) -> Check<ConvUpdate> {
        let conv_node = graph.node(conv).ok_or("conv vanished")?;
        let add_node = graph.node(add).ok_or("add vanished")?;

        let conv_output = conv_node.outputs().first().ok_or("conv has no output")?;
        let side = side_operand(add_node, conv_output)?;
        if !can_remove_node(graph, add) {
            return Err("add cannot be removed");
        }

        let weight = conv_weight(graph, conv_node, false)?;
        let bias = conv_bias(graph, conv_node, weight)?;
        let mut addend = channel_operand(graph, side, weight)?;

        let channels = weight.dims[0] as usize;
        if addend.shape() != [channels] {
            addend = addend.broadcast_to_len(channels);
        }

        let new_bias = match bias {
            Some(bias) => {
                let mut value = load(bias)?;
                value.add(&addend);
                BiasUpdate::Replace(value.into_proto(bias))
            }
            None => {
                let template = graph
                    .initializer(side)
                    .ok_or("side operand is not an initializer")?;
                BiasUpdate::Attach(addend.into_proto(template))
            }
        };

        Ok(ConvUpdate {
            weight: None,
            bias: Some(new_bias),
        })
    }
}

impl RewriteRule for FuseConvAdd {
    fn name(&self) -> &'static str {
        "FuseConvAdd"
    }

    fn target_op_types(&self) -> &[&'static str] {
        &["Conv"]
    }

    fn satisfy_condition(&self, graph: &Graph, node: NodeIndex) -> bool {
        conv_successor(graph, node, "Add", ELEMENTWISE_VERSIONS).is_some()
    }

    fn apply(&self, graph: &mut Graph, node: NodeIndex) -> OnnxResult<RuleEffect> {
        let Some(add) = conv_successor(graph, node, "Add", ELEMENTWISE_VERSIONS) else {
            return Ok(RuleEffect::None);
        };

        match self.plan(graph, node, add) {
            Ok(update) => {
                tracing::debug!(conv = %node, add = %add, "folding add into conv bias");
                commit(graph, node, add, update)
            }
            Err(reason) => {
                tracing::debug!(conv = %node, add = %add, reason, "conv + add not fused");
                Ok(RuleEffect::None)
            }
        }
    }
}
