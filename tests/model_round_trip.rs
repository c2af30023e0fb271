//! Loading a model and writing it back keeps every record field
//!
//! Covers fields the rewrite rules never look at: external tensor storage,
//! sparse initializers, model functions, training info and metadata.

use prost::Message;

use onnx_fuse::prelude::*;
use onnx_fuse::proto::extensions::{make_node, make_tensor_value_info, make_value_info};
use onnx_fuse::tensor::convert::vec_to_tensor_f32;

fn entry(key: &str, value: &str) -> StringStringEntryProto {
    StringStringEntryProto {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn tensor(name: &str, dims: &[i64], data: &[f32]) -> TensorProto {
    let mut t = vec_to_tensor_f32(data, name);
    t.dims = dims.to_vec();
    t
}

/// Weight whose payload lives in a side file
fn external_weight(name: &str) -> TensorProto {
    TensorProto {
        name: name.to_string(),
        dims: vec![2, 1, 1, 1],
        data_type: tensor_proto::DataType::Float as i32,
        data_location: tensor_proto::DataLocation::External as i32,
        external_data: vec![
            entry("location", "weights.bin"),
            entry("offset", "0"),
            entry("length", "8"),
        ],
        ..Default::default()
    }
}

fn sequence_of_floats() -> TypeProto {
    let float = TypeProto {
        value: Some(type_proto::Value::TensorType(type_proto::Tensor {
            elem_type: tensor_proto::DataType::Float as i32,
            shape: None,
        })),
        ..Default::default()
    };
    TypeProto {
        value: Some(type_proto::Value::SequenceType(type_proto::Sequence {
            elem_type: Some(Box::new(float)),
        })),
        ..Default::default()
    }
}

/// Conv(E) -> Relu with every auxiliary record populated; nothing to fuse
fn annotated_model() -> ModelProto {
    let mut conv = make_node("Conv", &["X", "E"], &["c"], "conv");
    conv.overload = "v2".to_string();
    conv.metadata_props.push(entry("origin", "stem"));
    conv.attribute.push(AttributeProto {
        name: "hint".to_string(),
        r#type: attribute_proto::AttributeType::TypeProto as i32,
        tp: Some(sequence_of_floats()),
        ..Default::default()
    });

    let sparse = SparseTensorProto {
        values: Some(tensor("S", &[1], &[4.0])),
        indices: Some(TensorProto {
            name: "S_indices".to_string(),
            dims: vec![1],
            data_type: tensor_proto::DataType::Int64 as i32,
            int64_data: vec![3],
            ..Default::default()
        }),
        dims: vec![8],
    };

    let mut sequence_info = make_value_info("seq");
    sequence_info.r#type = Some(sequence_of_floats());
    sequence_info.metadata_props.push(entry("note", "unused"));

    let graph = GraphProto {
        name: "annotated".to_string(),
        node: vec![conv, make_node("Relu", &["c"], &["Y"], "relu")],
        initializer: vec![external_weight("E")],
        sparse_initializer: vec![sparse],
        input: vec![make_tensor_value_info(
            "X",
            tensor_proto::DataType::Float as i32,
            &[1, 1, 4, 4],
        )],
        output: vec![make_value_info("Y")],
        value_info: vec![sequence_info],
        quantization_annotation: vec![TensorAnnotation {
            tensor_name: "c".to_string(),
            quant_parameter_tensor_names: vec![entry("SCALE_TENSOR", "c_scale")],
        }],
        metadata_props: vec![entry("stage", "backbone")],
        ..Default::default()
    };

    ModelProto {
        ir_version: 10,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        producer_name: "round-trip".to_string(),
        graph: Some(graph),
        metadata_props: vec![entry("author", "someone")],
        functions: vec![FunctionProto {
            name: "Swish".to_string(),
            domain: "custom".to_string(),
            input: vec!["x".to_string()],
            output: vec!["y".to_string()],
            node: vec![
                make_node("Sigmoid", &["x"], &["s"], ""),
                make_node("Mul", &["x", "s"], &["y"], ""),
            ],
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: 13,
            }],
            ..Default::default()
        }],
        training_info: vec![TrainingInfoProto {
            update_binding: vec![entry("E", "E_updated")],
            ..Default::default()
        }],
        ..Default::default()
    }
}

#[test]
fn test_untouched_model_encodes_identically() {
    let bytes = annotated_model().encode_to_vec();
    let model = ModelProto::decode(bytes.as_slice()).unwrap();

    let (optimized, stats) = conv_fusion_transformer().apply_to_model(&model).unwrap();

    assert_eq!(stats.rules_applied, 0);
    assert_eq!(stats.initializers_removed, 0);
    assert_eq!(optimized, model);
    assert_eq!(optimized.encode_to_vec(), bytes);
}

#[test]
fn test_fusion_keeps_untouched_records() {
    let mut model = annotated_model();
    let graph = model.graph.as_mut().unwrap();

    // second branch: Conv(W) -> Mul(k) -> Relu, fusable
    graph.initializer.push(tensor("W", &[2, 1, 1, 1], &[1.0, 2.0]));
    graph.initializer.push(tensor("k", &[], &[3.0]));
    graph.node.push(make_node("Conv", &["X", "W"], &["c2"], "conv2"));
    graph.node.push(make_node("Mul", &["c2", "k"], &["m2"], "mul2"));
    graph.node.push(make_node("Relu", &["m2"], &["Y2"], "relu2"));
    graph.output.push(make_value_info("Y2"));

    let bytes = model.encode_to_vec();
    let model = ModelProto::decode(bytes.as_slice()).unwrap();
    let (optimized, stats) = conv_fusion_transformer().apply_to_model(&model).unwrap();
    assert_eq!(stats.rules_applied, 1);

    let decoded = ModelProto::decode(optimized.encode_to_vec().as_slice()).unwrap();
    assert_eq!(decoded.metadata_props, vec![entry("author", "someone")]);
    assert_eq!(decoded.functions, model.functions);
    assert_eq!(decoded.training_info, model.training_info);

    let graph = decoded.graph.unwrap();
    let original = model.graph.as_ref().unwrap();
    let weight = graph.initializer.iter().find(|t| t.name == "E").unwrap();
    assert_eq!(weight, &external_weight("E"));
    assert_eq!(graph.sparse_initializer, original.sparse_initializer);
    assert_eq!(graph.quantization_annotation, original.quantization_annotation);
    assert_eq!(graph.metadata_props, original.metadata_props);
    assert_eq!(graph.value_info, original.value_info);

    let conv = graph.node.iter().find(|n| n.name == "conv").unwrap();
    assert_eq!(conv.overload, "v2");
    assert_eq!(conv.metadata_props, vec![entry("origin", "stem")]);
    assert_eq!(conv.attribute[0].tp, Some(sequence_of_floats()));
    assert!(graph.node.iter().all(|n| n.name != "mul2"));
}

#[test]
fn test_external_weight_is_not_folded() {
    let mut model = annotated_model();
    let graph = model.graph.as_mut().unwrap();

    // Conv(E) now feeds a Mul; E has no inline payload to scale
    graph.initializer.push(tensor("k", &[], &[3.0]));
    graph.node[1] = make_node("Mul", &["c", "k"], &["m"], "mul");
    graph.node.push(make_node("Relu", &["m"], &["Y"], "relu"));

    let (optimized, stats) = conv_fusion_transformer().apply_to_model(&model).unwrap();

    assert_eq!(stats.rules_applied, 0);
    assert_eq!(optimized, model);
}
