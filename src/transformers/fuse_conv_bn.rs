//! Conv + BatchNormalization fusion rule
//!
//! Folds an inference-mode BatchNormalization that directly follows a Conv
//! into the Conv's weight and bias.

use crate::error::OnnxResult;
use crate::graph::{can_remove_node, Graph, NodeIndex};
use crate::traits::{RewriteRule, RuleEffect};

use super::common::{
    channel_vector, commit, conv_bias, conv_successor, conv_weight, get_attr_f, get_attr_i, load,
    BiasUpdate, Check, ConvUpdate, BATCH_NORM_VERSIONS,
};

/// Fuse Conv + BatchNormalization
///
/// BatchNorm can be folded into Conv by modifying weights and biases:
///
/// Conv: y = W * x + b
/// BN:   z = gamma * (y - mean) / sqrt(var + eps) + beta
///
/// Fused: z = W' * x + b'
/// where:
///   s  = gamma / sqrt(var + eps)
///   W' = W * s           (per output channel)
///   b' = (b - mean) * s + beta
///
/// A Conv without bias gets a new one, `beta - mean * s`, appended as its
/// third input. Grouped convolutions are left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseConvBN;

impl FuseConvBN {
    /// Create the rule
    pub fn new() -> Self {
        Self
    }

    /// Validate the pair and compute the new Conv initializers
    fn plan(&self, graph: &Graph, conv: NodeIndex, bn: NodeIndex) -> Check<ConvUpdate> {
        let conv_node = graph.node(conv).ok_or("conv vanished")?;
        let bn_node = graph.node(bn).ok_or("batch norm vanished")?;

        if let Some(group) = get_attr_i(conv_node, "group") {
            if group != 1 {
                return Err("grouped convolution");
            }
        }
        let epsilon = get_attr_f(bn_node, "epsilon").ok_or("epsilon missing or not a float")?;

        let conv_output = conv_node.outputs().first().ok_or("conv has no output")?;
        let bn_inputs = bn_node.inputs();
        if bn_inputs.len() < 5 {
            return Err("batch norm needs five inputs");
        }
        if &bn_inputs[0] != conv_output {
            return Err("batch norm does not normalize the conv output");
        }
        if !can_remove_node(graph, bn) {
            return Err("batch norm cannot be removed");
        }

        let weight = conv_weight(graph, conv_node, true)?;
        let bias = conv_bias(graph, conv_node, weight)?;
        let gamma = channel_vector(graph, &bn_inputs[1], weight)?;
        let beta = channel_vector(graph, &bn_inputs[2], weight)?;
        let mean = channel_vector(graph, &bn_inputs[3], weight)?;
        let var = channel_vector(graph, &bn_inputs[4], weight)?;

        let mut scale = load(gamma)?;
        let mut mean_value = load(mean)?;
        let mut beta_value = load(beta)?;
        let mut std = load(var)?;
        std.add_scalar(f64::from(epsilon));
        std.sqrt();
        scale.div(&std);

        let mut new_weight = load(weight)?;
        new_weight.scale_by_axis(&scale, 0);

        let new_bias = match bias {
            Some(bias) => {
                let mut value = load(bias)?;
                value.sub(&mean_value);
                value.mul(&scale);
                value.add(&beta_value);
                BiasUpdate::Replace(value.into_proto(bias))
            }
            None => {
                mean_value.mul(&scale);
                beta_value.sub(&mean_value);
                BiasUpdate::Attach(beta_value.into_proto(beta))
            }
        };

        Ok(ConvUpdate {
            weight: Some(new_weight.into_proto(weight)),
            bias: Some(new_bias),
        })
    }
}

impl RewriteRule for FuseConvBN {
    fn name(&self) -> &'static str {
        "FuseConvBN"
    }

    fn target_op_types(&self) -> &[&'static str] {
        &["Conv"]
    }

    fn satisfy_condition(&self, graph: &Graph, node: NodeIndex) -> bool {
        conv_successor(graph, node, "BatchNormalization", BATCH_NORM_VERSIONS).is_some()
    }

    fn apply(&self, graph: &mut Graph, node: NodeIndex) -> OnnxResult<RuleEffect> {
        let Some(bn) = conv_successor(graph, node, "BatchNormalization", BATCH_NORM_VERSIONS)
        else {
            return Ok(RuleEffect::None);
        };

        match self.plan(graph, node, bn) {
            Ok(update) => {
                tracing::debug!(conv = %node, bn = %bn, "folding batch norm into conv");
                commit(graph, node, bn, update)
            }
            Err(reason) => {
                tracing::debug!(conv = %node, bn = %bn, reason, "conv + batch norm not fused");
                Ok(RuleEffect::None)
            }
        }
    }
}
