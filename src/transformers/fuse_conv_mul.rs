//! Conv + Mul fusion rule

use crate::error::OnnxResult;
use crate::graph::{can_remove_node, Graph, NodeIndex};
use crate::traits::{RewriteRule, RuleEffect};

use super::common::{
    channel_operand, commit, conv_bias, conv_successor, conv_weight, load, side_operand,
    BiasUpdate, Check, ConvUpdate, ELEMENTWISE_VERSIONS,
};

/// Fuse Conv + Mul by a per-channel or scalar constant
///
/// Conv: y = W * x + b
/// Mul:  z = y * m
///
/// Fused: z = (W * m) * x + b * m
///
/// `m` is a scalar or has shape `[C_out, 1, ..., 1]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseConvMul;

impl FuseConvMul {
    /// Create the rule
    pub fn new() -> Self {
        Self
    }

    fn plan(&self, graph: &Graph, conv: NodeIndex, mul: NodeIndex) -> Check<ConvUpdate> {
        let conv_node = graph.node(conv).ok_or("conv vanished")?;
        let mul_node = graph.node(mul).ok_or("mul vanished")?;

        let conv_output = conv_node.outputs().first().ok_or("conv has no output")?;
        let side = side_operand(mul_node, conv_output)?;
        if !can_remove_node(graph, mul) {
            return Err("mul cannot be removed");
        }

        let weight = conv_weight(graph, conv_node, true)?;
        let bias = conv_bias(graph, conv_node, weight)?;
        let factor = channel_operand(graph, side, weight)?;

        let mut new_weight = load(weight)?;
        new_weight.scale_by_axis(&factor, 0);

        let new_bias = match bias {
            Some(bias) => {
                let mut value = load(bias)?;
                value.scale_by_axis(&factor, 0);
                Some(BiasUpdate::Replace(value.into_proto(bias)))
            }
            None => None,
        };

        Ok(ConvUpdate {
            weight: Some(new_weight.into_proto(weight)),
            bias: new_bias,
        })
    }
}

impl RewriteRule for FuseConvMul {
    fn name(&self) -> &'static str {
        "FuseConvMul"
    }

    fn target_op_types(&self) -> &[&'static str] {
        &["Conv"]
    }

    fn satisfy_condition(&self, graph: &Graph, node: NodeIndex) -> bool {
        conv_successor(graph, node, "Mul", ELEMENTWISE_VERSIONS).is_some()
    }

    fn apply(&self, graph: &mut Graph, node: NodeIndex) -> OnnxResult<RuleEffect> {
        let Some(mul) = conv_successor(graph, node, "Mul", ELEMENTWISE_VERSIONS) else {
            return Ok(RuleEffect::None);
        };

        match self.plan(graph, node, mul) {
            Ok(update) => {
                tracing::debug!(conv = %node, mul = %mul, "folding mul into conv");
                commit(graph, node, mul, update)
            }
            Err(reason) => {
                tracing::debug!(conv = %node, mul = %mul, reason, "conv + mul not fused");
                Ok(RuleEffect::None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::make_node;
    use crate::proto::TensorProto;
    use crate::tensor::convert::{scalar_to_tensor_f32, vec_to_tensor_f32};
    use crate::tensor::TensorValue;

    fn tensor(name: &str, dims: Vec<i64>, data: &[f32]) -> TensorProto {
        let mut t = vec_to_tensor_f32(data, name);
        t.dims = dims;
        t
    }

    fn values(graph: &Graph, name: &str) -> Vec<f64> {
        TensorValue::from_proto(graph.initializer(name).unwrap())
            .unwrap()
            .to_f64_vec()
    }

    /// X -> Conv(W[2,1,2,2], B) -> Mul(factor) -> Relu
    fn make_conv_mul_graph(factor: TensorProto, factor_first: bool) -> (Graph, NodeIndex) {
        let mut graph = Graph::with_opset("g", 14);
        graph.add_initializer(tensor("W", vec![2, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0, 1.0, 1.0, 1.0, 1.0]));
        graph.add_initializer(vec_to_tensor_f32(&[0.5, -1.0], "B"));
        let name = factor.name.clone();
        graph.add_initializer(factor);

        let conv = graph
            .add_node(make_node("Conv", &["X", "W", "B"], &["c"], "conv"))
            .unwrap();
        let inputs = if factor_first {
            [name.as_str(), "c"]
        } else {
            ["c", name.as_str()]
        };
        graph.add_node(make_node("Mul", &inputs, &["m"], "mul")).unwrap();
        graph.add_node(make_node("Relu", &["m"], &["Y"], "relu")).unwrap();
        (graph, conv)
    }

    #[test]
    fn test_scalar_factor() {
        let (mut graph, conv) = make_conv_mul_graph(scalar_to_tensor_f32(3.0, "k"), false);
        let rule = FuseConvMul::new();
        assert!(rule.satisfy_condition(&graph, conv));
        assert!(rule.apply(&mut graph, conv).unwrap().modified());

        assert!(graph.find_node_by_name("mul").is_none());
        assert_eq!(values(&graph, "W"), vec![3.0, 6.0, 9.0, 12.0, 3.0, 3.0, 3.0, 3.0]);
        assert_eq!(values(&graph, "B"), vec![1.5, -3.0]);
        let relu = graph.find_node_by_name("relu").unwrap();
        assert_eq!(graph.node(relu).unwrap().inputs(), &["c"]);
    }

    #[test]
    fn test_per_channel_factor_on_left() {
        let factor = tensor("k", vec![2, 1, 1], &[2.0, -1.0]);
        let (mut graph, conv) = make_conv_mul_graph(factor, true);
        assert!(FuseConvMul::new().apply(&mut graph, conv).unwrap().modified());

        assert_eq!(values(&graph, "W"), vec![2.0, 4.0, 6.0, 8.0, -1.0, -1.0, -1.0, -1.0]);
        assert_eq!(values(&graph, "B"), vec![1.0, 1.0]);
    }

    #[test]
    fn test_non_channel_factor_rejected() {
        // broadcasts along width, not channels
        let factor = tensor("k", vec![1, 1, 2], &[2.0, 3.0]);
        let (mut graph, conv) = make_conv_mul_graph(factor, false);
        let before = graph.to_graph_proto();

        assert_eq!(FuseConvMul::new().apply(&mut graph, conv).unwrap(), RuleEffect::None);
        assert_eq!(graph.to_graph_proto(), before);
    }

    #[test]
    fn test_oversized_weight_dims_rejected() {
        let mut graph = Graph::with_opset("g", 14);
        graph.add_initializer(tensor("W", vec![2, i64::MAX, i64::MAX, 2], &[1.0, 2.0]));
        graph.add_initializer(scalar_to_tensor_f32(3.0, "k"));
        let conv = graph
            .add_node(make_node("Conv", &["X", "W"], &["c"], "conv"))
            .unwrap();
        graph.add_node(make_node("Mul", &["c", "k"], &["m"], "mul")).unwrap();
        graph.add_node(make_node("Relu", &["m"], &["Y"], "relu")).unwrap();

        assert_eq!(FuseConvMul::new().apply(&mut graph, conv).unwrap(), RuleEffect::None);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.initializer("W").unwrap().float_data.len(), 2);
    }

    #[test]
    fn test_runtime_factor_rejected() {
        let mut graph = Graph::with_opset("g", 14);
        graph.add_initializer(tensor("W", vec![1, 1, 1, 1], &[1.0]));
        let conv = graph
            .add_node(make_node("Conv", &["X", "W"], &["c"], "conv"))
            .unwrap();
        graph
            .add_node(make_node("Mul", &["c", "scale_in"], &["Y"], "mul"))
            .unwrap();
        graph.add_node(make_node("Relu", &["Y"], &["Z"], "relu")).unwrap();

        let rule = FuseConvMul::new();
        assert!(rule.satisfy_condition(&graph, conv));
        assert_eq!(rule.apply(&mut graph, conv).unwrap(), RuleEffect::None);
        assert_eq!(graph.node_count(), 3);
    }
}
