//! Numerical equivalence of fused Conv models against the unfused originals
//!
//! Both models are run through a small reference evaluator (NCHW, stride 1,
//! no padding) and compared element by element.

use std::collections::HashMap;

use onnx_fuse::prelude::*;
use onnx_fuse::proto::extensions::{make_node, make_value_info};
use onnx_fuse::tensor::convert::vec_to_tensor_f32;

const TOLERANCE: f64 = 1e-5;

#[derive(Debug, Clone)]
struct Value {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Value {
    fn from_tensor(tensor: &TensorProto) -> Self {
        let value = TensorValue::from_proto(tensor).unwrap();
        Value {
            shape: value.shape().to_vec(),
            data: value.to_f64_vec(),
        }
    }
}

/// Deterministic values in [-1, 1)
fn pseudo_random(seed: u64, len: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        })
        .collect()
}

fn tensor(name: &str, dims: &[i64], data: Vec<f32>) -> TensorProto {
    let mut t = vec_to_tensor_f32(&data, name);
    t.dims = dims.to_vec();
    t
}

fn conv(x: &Value, w: &Value, b: Option<&Value>) -> Value {
    let (n, c, h, wd) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    let (m, kc, kh, kw) = (w.shape[0], w.shape[1], w.shape[2], w.shape[3]);
    assert_eq!(c, kc);
    let (oh, ow) = (h - kh + 1, wd - kw + 1);
    let mut out = vec![0.0; n * m * oh * ow];

    for ni in 0..n {
        for mi in 0..m {
            for y in 0..oh {
                for xo in 0..ow {
                    let mut acc = b.map(|b| b.data[mi]).unwrap_or(0.0);
                    for ci in 0..c {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let xv = x.data[((ni * c + ci) * h + y + ky) * wd + xo + kx];
                                let wv = w.data[((mi * kc + ci) * kh + ky) * kw + kx];
                                acc += xv * wv;
                            }
                        }
                    }
                    out[((ni * m + mi) * oh + y) * ow + xo] = acc;
                }
            }
        }
    }
    Value {
        shape: vec![n, m, oh, ow],
        data: out,
    }
}

fn batch_norm(x: &Value, params: [&Value; 4], epsilon: f64) -> Value {
    let [gamma, beta, mean, var] = params;
    let channels = x.shape[1];
    let plane: usize = x.shape[2..].iter().product();
    let data = x
        .data
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let c = (i / plane) % channels;
            gamma.data[c] * (v - mean.data[c]) / (var.data[c] + epsilon).sqrt() + beta.data[c]
        })
        .collect();
    Value {
        shape: x.shape.clone(),
        data,
    }
}

/// Numpy-style broadcast of a binary operator
fn broadcast(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    let rank = a.shape.len().max(b.shape.len());
    let pad = |s: &[usize]| {
        let mut padded = vec![1; rank - s.len()];
        padded.extend_from_slice(s);
        padded
    };
    let (sa, sb) = (pad(&a.shape), pad(&b.shape));
    let shape: Vec<usize> = sa.iter().zip(&sb).map(|(&x, &y)| x.max(y)).collect();
    let len: usize = shape.iter().product();

    let offset = |index: usize, s: &[usize]| {
        let mut rem = index;
        let mut flat = 0;
        let mut stride = 1;
        for axis in (0..rank).rev() {
            let coord = rem % shape[axis];
            rem /= shape[axis];
            if s[axis] != 1 {
                flat += coord * stride;
            }
            stride *= s[axis];
        }
        flat
    };
    let data = (0..len)
        .map(|i| f(a.data[offset(i, &sa)], b.data[offset(i, &sb)]))
        .collect();
    Value { shape, data }
}

/// Evaluate a graph built from Conv, BatchNormalization, Mul, Add and Relu
fn evaluate(graph: &GraphProto, x: &Value) -> Value {
    let mut env: HashMap<String, Value> = graph
        .initializer
        .iter()
        .map(|t| (t.name.clone(), Value::from_tensor(t)))
        .collect();
    env.insert("X".to_string(), x.clone());

    for node in &graph.node {
        let arg = |i: usize| &env[&node.input[i]];
        let out = match node.op_type.as_str() {
            "Conv" => {
                let bias = node.input.get(2).filter(|n| !n.is_empty()).map(|n| &env[n]);
                conv(arg(0), arg(1), bias)
            }
            "BatchNormalization" => {
                let epsilon = node
                    .attribute
                    .iter()
                    .find(|a| a.name == "epsilon")
                    .map(|a| f64::from(a.f))
                    .unwrap();
                batch_norm(arg(0), [arg(1), arg(2), arg(3), arg(4)], epsilon)
            }
            "Mul" => broadcast(arg(0), arg(1), |a, b| a * b),
            "Add" => broadcast(arg(0), arg(1), |a, b| a + b),
            "Relu" => Value {
                shape: arg(0).shape.clone(),
                data: arg(0).data.iter().map(|v| v.max(0.0)).collect(),
            },
            other => panic!("unsupported op {other}"),
        };
        env.insert(node.output[0].clone(), out);
    }
    env.remove("Y").expect("graph output Y")
}

fn model(nodes: Vec<NodeProto>, initializers: Vec<TensorProto>) -> ModelProto {
    ModelProto {
        ir_version: 8,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        graph: Some(GraphProto {
            name: "test".to_string(),
            node: nodes,
            initializer: initializers,
            input: vec![make_value_info("X")],
            output: vec![make_value_info("Y")],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn bn_node(input: &str, prefix: &str, output: &str, epsilon: f32) -> NodeProto {
    let names: Vec<String> = ["gamma", "beta", "mean", "var"]
        .iter()
        .map(|p| format!("{prefix}_{p}"))
        .collect();
    let mut node = make_node(
        "BatchNormalization",
        &[
            input,
            names[0].as_str(),
            names[1].as_str(),
            names[2].as_str(),
            names[3].as_str(),
        ],
        &[output],
        &format!("{prefix}_bn"),
    );
    node.attribute.push(AttributeProto::new_float("epsilon", epsilon));
    node
}

fn bn_params(prefix: &str, channels: usize, seed: u64) -> Vec<TensorProto> {
    let dims = [channels as i64];
    let var: Vec<f32> = pseudo_random(seed + 3, channels)
        .into_iter()
        .map(|v| v.abs() + 0.5)
        .collect();
    vec![
        tensor(&format!("{prefix}_gamma"), &dims, pseudo_random(seed, channels)),
        tensor(&format!("{prefix}_beta"), &dims, pseudo_random(seed + 1, channels)),
        tensor(&format!("{prefix}_mean"), &dims, pseudo_random(seed + 2, channels)),
        tensor(&format!("{prefix}_var"), &dims, var),
    ]
}

fn input(shape: &[usize], seed: u64) -> Value {
    let len = shape.iter().product();
    Value {
        shape: shape.to_vec(),
        data: pseudo_random(seed, len).into_iter().map(f64::from).collect(),
    }
}

fn assert_equivalent(original: &ModelProto, fused: &ModelProto, x: &Value) {
    let expected = evaluate(original.graph.as_ref().unwrap(), x);
    let actual = evaluate(fused.graph.as_ref().unwrap(), x);
    assert_eq!(expected.shape, actual.shape);
    for (i, (e, a)) in expected.data.iter().zip(&actual.data).enumerate() {
        assert!(
            (e - a).abs() <= TOLERANCE * e.abs().max(1.0),
            "element {i}: expected {e}, got {a}"
        );
    }
}

fn op_types(model: &ModelProto) -> Vec<String> {
    model
        .graph
        .as_ref()
        .unwrap()
        .node
        .iter()
        .map(|n| n.op_type.clone())
        .collect()
}

#[test]
fn test_single_channel_conv_bn() {
    let original = model(
        vec![
            make_node("Conv", &["X", "W", "B"], &["c"], "conv"),
            bn_node("c", "bn", "Y_pre", 0.1),
            make_node("Relu", &["Y_pre"], &["Y"], "relu"),
        ],
        vec![
            tensor("W", &[1, 1, 1, 1], vec![2.0]),
            tensor("B", &[1], vec![1.0]),
            tensor("bn_gamma", &[1], vec![2.0]),
            tensor("bn_beta", &[1], vec![0.5]),
            tensor("bn_mean", &[1], vec![1.0]),
            tensor("bn_var", &[1], vec![3.0]),
        ],
    );

    let (fused, stats) = conv_fusion_transformer().apply_to_model(&original).unwrap();
    assert_eq!(stats.rules_applied, 1);
    assert_eq!(op_types(&fused), vec!["Conv", "Relu"]);

    let x = Value {
        shape: vec![1, 1, 1, 1],
        data: vec![1.5],
    };
    assert_equivalent(&original, &fused, &x);
}

#[test]
fn test_conv_bn_with_and_without_bias() {
    for with_bias in [true, false] {
        let mut initializers = vec![tensor("W", &[3, 2, 3, 3], pseudo_random(1, 54))];
        if with_bias {
            initializers.push(tensor("B", &[3], pseudo_random(2, 3)));
        }
        initializers.extend(bn_params("bn", 3, 10));
        let conv_inputs: &[&str] = if with_bias { &["X", "W", "B"] } else { &["X", "W"] };

        let original = model(
            vec![
                make_node("Conv", conv_inputs, &["c"], "conv"),
                bn_node("c", "bn", "b", 1e-5),
                make_node("Relu", &["b"], &["Y"], "relu"),
            ],
            initializers,
        );

        let (fused, _) = conv_fusion_transformer().apply_to_model(&original).unwrap();
        assert_eq!(op_types(&fused), vec!["Conv", "Relu"]);
        assert_eq!(fused.graph.as_ref().unwrap().node[0].input.len(), 3);
        assert_equivalent(&original, &fused, &input(&[1, 2, 6, 6], 99));
    }
}

#[test]
fn test_conv_mul_add_chain() {
    let original = model(
        vec![
            make_node("Conv", &["X", "W"], &["c"], "conv"),
            make_node("Mul", &["c", "k"], &["m"], "mul"),
            make_node("Add", &["offset", "m"], &["a"], "add"),
            make_node("Relu", &["a"], &["Y"], "relu"),
        ],
        vec![
            tensor("W", &[4, 3, 2, 2], pseudo_random(5, 48)),
            tensor("k", &[4, 1, 1], pseudo_random(6, 4)),
            tensor("offset", &[], vec![0.25]),
        ],
    );

    let (fused, stats) = conv_fusion_transformer().apply_to_model(&original).unwrap();
    assert_eq!(stats.rules_applied, 2);
    assert_eq!(op_types(&fused), vec!["Conv", "Relu"]);
    assert_equivalent(&original, &fused, &input(&[2, 3, 5, 5], 7));
}

#[test]
fn test_stacked_blocks() {
    let mut initializers = vec![
        tensor("W1", &[4, 2, 3, 3], pseudo_random(11, 72)),
        tensor("B1", &[4], pseudo_random(12, 4)),
        tensor("W2", &[2, 4, 1, 1], pseudo_random(13, 8)),
        tensor("k", &[], vec![1.5]),
    ];
    initializers.extend(bn_params("bn1", 4, 20));

    let original = model(
        vec![
            make_node("Conv", &["X", "W1", "B1"], &["c1"], "conv1"),
            bn_node("c1", "bn1", "b1", 1e-3),
            make_node("Relu", &["b1"], &["r1"], "relu1"),
            make_node("Conv", &["r1", "W2"], &["c2"], "conv2"),
            make_node("Mul", &["c2", "k"], &["m2"], "mul2"),
            make_node("Relu", &["m2"], &["Y"], "relu2"),
        ],
        initializers,
    );

    let (fused, stats) = conv_fusion_transformer().apply_to_model(&original).unwrap();
    assert_eq!(stats.rules_applied, 2);
    assert_eq!(op_types(&fused), vec!["Conv", "Relu", "Conv", "Relu"]);
    // BN parameters and the Mul factor were dropped
    let names: Vec<&str> = fused
        .graph
        .as_ref()
        .unwrap()
        .initializer
        .iter()
        .map(|t| t.name.as_str())
        .collect();
    assert_eq!(names, vec!["W1", "B1", "W2"]);
    assert_equivalent(&original, &fused, &input(&[1, 2, 7, 7], 3));
}

#[test]
fn test_unfusable_model_unchanged() {
    let mut conv = make_node("Conv", &["X", "W"], &["c"], "conv");
    conv.attribute.push(AttributeProto::new_int("group", 2));
    let original = model(
        vec![conv, bn_node("c", "bn", "b", 1e-5), make_node("Relu", &["b"], &["Y"], "relu")],
        {
            let mut inits = vec![tensor("W", &[2, 1, 1, 1], vec![1.0, 2.0])];
            inits.extend(bn_params("bn", 2, 40));
            inits
        },
    );

    let (fused, stats) = conv_fusion_transformer().apply_to_model(&original).unwrap();
    assert_eq!(stats.rules_applied, 0);
    assert_eq!(stats.iterations, 1);
    assert_eq!(fused, original);
}
