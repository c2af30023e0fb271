//! Common utilities for transformers
//!
//! Shared matching and initializer helpers used by the Conv fusion rules.

use crate::error::{OnnxResult, TransformError};
use crate::graph::query::{get_node_attribute, is_supported_optype_versions_and_domain};
use crate::graph::{remove_node, Graph, Node, NodeIndex};
use crate::proto::attribute_proto::AttributeType;
use crate::proto::TensorProto;
use crate::tensor::shape::{is_channel_shape, to_usize_shape};
use crate::tensor::TensorValue;
use crate::traits::RuleEffect;

/// Conv schema revisions the fusion rules accept
pub const CONV_VERSIONS: &[i64] = &[1, 11, 22];

/// BatchNormalization schema revisions
pub const BATCH_NORM_VERSIONS: &[i64] = &[7, 9, 14, 15];

/// Mul / Add schema revisions
pub const ELEMENTWISE_VERSIONS: &[i64] = &[7, 13, 14];

/// Outcome of a validation step: the value, or why the rule does not apply
pub(crate) type Check<T> = Result<T, &'static str>;

/// Get attribute value as i64, only when the attribute is INT-typed
pub fn get_attr_i(node: &Node, name: &str) -> Option<i64> {
    get_node_attribute(node, name)
        .filter(|a| a.attribute_type() == AttributeType::Int)
        .map(|a| a.i)
}

/// Get attribute value as f32, only when the attribute is FLOAT-typed
pub fn get_attr_f(node: &Node, name: &str) -> Option<f32> {
    get_node_attribute(node, name)
        .filter(|a| a.attribute_type() == AttributeType::Float)
        .map(|a| a.f)
}

/// Find the single consumer of a Conv when it matches `op_type`
///
/// The Conv must have exactly one output edge. The consumer must be one of
/// `versions` of `op_type` in the default domain, have exactly one input edge,
/// not produce a graph output and run on the same provider as the Conv.
pub(crate) fn conv_successor(
    graph: &Graph,
    conv: NodeIndex,
    op_type: &str,
    versions: &[i64],
) -> Option<NodeIndex> {
    let conv_node = graph.node(conv)?;
    if !is_supported_optype_versions_and_domain(conv_node, "Conv", CONV_VERSIONS, "")
        || conv_node.output_edges_count() != 1
    {
        return None;
    }

    let next = conv_node.output_edges().next()?.node;
    let next_node = graph.node(next)?;
    if !is_supported_optype_versions_and_domain(next_node, op_type, versions, "")
        || next_node.input_edges_count() != 1
        || graph.is_node_outputs_in_graph_outputs(next)
        || next_node.execution_provider() != conv_node.execution_provider()
    {
        return None;
    }
    Some(next)
}

/// Whether an initializer is read only once and is not a graph output
///
/// Only such initializers may be rewritten in place.
pub(crate) fn is_exclusive_initializer(graph: &Graph, name: &str) -> bool {
    graph.is_initializer(name) && graph.is_single_use(name) && !graph.is_graph_output(name)
}

/// Conv weight initializer of rank > 2 with a supported element type
pub(crate) fn conv_weight<'g>(
    graph: &'g Graph,
    conv: &Node,
    exclusive: bool,
) -> Check<&'g TensorProto> {
    let name = conv.inputs().get(1).ok_or("conv has no weight input")?;
    let weight = graph
        .initializer(name)
        .ok_or("conv weight is not an initializer")?;
    if exclusive && !is_exclusive_initializer(graph, name) {
        return Err("conv weight is shared");
    }
    if !TensorValue::is_supported_data_type(weight) {
        return Err("conv weight has unsupported element type");
    }
    if weight.dims.len() <= 2 {
        return Err("conv weight rank must exceed 2");
    }
    Ok(weight)
}

/// Conv bias initializer, if the Conv has one
///
/// A present bias must be an exclusively used initializer of the weight's
/// element type with dims `[C_out]`.
pub(crate) fn conv_bias<'g>(
    graph: &'g Graph,
    conv: &Node,
    weight: &TensorProto,
) -> Check<Option<&'g TensorProto>> {
    let name = match conv.inputs().get(2) {
        Some(name) if !name.is_empty() => name,
        _ => return Ok(None),
    };
    let bias = graph
        .initializer(name)
        .ok_or("conv bias is not an initializer")?;
    if !is_exclusive_initializer(graph, name) {
        return Err("conv bias is shared");
    }
    if bias.data_type != weight.data_type {
        return Err("conv bias element type differs from weight");
    }
    if bias.dims != [weight.dims[0]] {
        return Err("conv bias is not one value per output channel");
    }
    Ok(Some(bias))
}

/// Name of the operand of a binary node that is not `conv_output`
pub(crate) fn side_operand<'n>(node: &'n Node, conv_output: &str) -> Check<&'n str> {
    match node.inputs() {
        [a, b] if a == conv_output => Ok(b.as_str()),
        [a, b] if b == conv_output => Ok(a.as_str()),
        [_, _] => Err("node does not read the conv output"),
        _ => Err("node must have exactly two inputs"),
    }
}

/// Per-channel side tensor folded into a Conv
///
/// The tensor must be an initializer of the weight's element type that is
/// either a scalar or of shape `[C_out, 1, ..., 1]` with rank `rank(W) - 1`.
/// The result is flattened to `[C_out]`, or left as a single element.
pub(crate) fn channel_operand(
    graph: &Graph,
    name: &str,
    weight: &TensorProto,
) -> Check<TensorValue> {
    let tensor = graph
        .initializer(name)
        .ok_or("side operand is not an initializer")?;
    if tensor.data_type != weight.data_type {
        return Err("side operand element type differs from weight");
    }
    let channels = weight.dims[0];
    let scalar = tensor.dims.is_empty();
    if !scalar && !is_channel_shape(&tensor.dims, channels, weight.dims.len() - 1) {
        return Err("side operand is not per-channel");
    }

    let mut value = load(tensor)?;
    if !scalar {
        value.reshape(&[channels as usize]);
    }
    Ok(value)
}

/// Decode an initializer, mapping failures to a rejection
pub(crate) fn load(tensor: &TensorProto) -> Check<TensorValue> {
    to_usize_shape(&tensor.name, &tensor.dims).map_err(|_| "tensor has negative dims")?;
    TensorValue::from_proto(tensor).map_err(|_| "tensor payload does not decode")
}

/// Register a new bias initializer and wire it into the Conv's bias slot
///
/// The name is derived from the Conv's name and made unique. Slot 2 is reused
/// when present but empty, otherwise the input is appended.
pub(crate) fn attach_bias(graph: &mut Graph, conv: NodeIndex, mut bias: TensorProto) -> String {
    let base = match graph.node(conv) {
        Some(node) if !node.name().is_empty() => format!("{}_bias", node.name()),
        _ => "conv_bias".to_string(),
    };
    let name = graph.generate_node_arg_name(&base);
    bias.name = name.clone();
    bias.doc_string.clear();
    graph.add_initializer(bias);

    let has_bias_slot = graph
        .node(conv)
        .map(|n| n.inputs().len() > 2)
        .unwrap_or(false);
    if has_bias_slot {
        graph.set_node_input(conv, 2, &name);
    } else {
        graph.append_node_input(conv, &name);
    }
    name
}

/// Rank-1 per-channel initializer of the weight's element type
pub(crate) fn channel_vector<'g>(
    graph: &'g Graph,
    name: &str,
    weight: &TensorProto,
) -> Check<&'g TensorProto> {
    let tensor = graph
        .initializer(name)
        .ok_or("per-channel input is not an initializer")?;
    if tensor.data_type != weight.data_type {
        return Err("per-channel input element type differs from weight");
    }
    if tensor.dims != [weight.dims[0]] {
        return Err("per-channel input is not one value per output channel");
    }
    Ok(tensor)
}

/// New bias for a Conv
#[derive(Debug)]
pub(crate) enum BiasUpdate {
    /// Overwrite the existing bias initializer of the same name
    Replace(TensorProto),
    /// Register under a fresh name and wire into the bias slot
    Attach(TensorProto),
}

/// Everything a fusion writes back, computed before the first mutation
#[derive(Debug)]
pub(crate) struct ConvUpdate {
    pub weight: Option<TensorProto>,
    pub bias: Option<BiasUpdate>,
}

/// Write a computed update into the graph and drop the folded node
///
/// Callers must have checked that every replaced initializer exists and that
/// `folded` can be removed; a failure here is a broken invariant.
pub(crate) fn commit(
    graph: &mut Graph,
    conv: NodeIndex,
    folded: NodeIndex,
    update: ConvUpdate,
) -> OnnxResult<RuleEffect> {
    if let Some(weight) = update.weight {
        let name = weight.name.clone();
        graph
            .replace_initializer(weight)
            .ok_or(TransformError::InitializerNotFound(name))?;
    }
    match update.bias {
        Some(BiasUpdate::Replace(bias)) => {
            let name = bias.name.clone();
            graph
                .replace_initializer(bias)
                .ok_or(TransformError::InitializerNotFound(name))?;
        }
        Some(BiasUpdate::Attach(bias)) => {
            attach_bias(graph, conv, bias);
        }
        None => {}
    }

    if !remove_node(graph, folded) {
        return Err(TransformError::Internal(format!(
            "node {folded} could not be removed after folding into conv {conv}"
        )));
    }
    Ok(RuleEffect::UpdatedCurrentNode)
}
