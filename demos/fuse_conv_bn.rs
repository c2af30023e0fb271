//! Run the Conv fusion rules over a model
//!
//! Usage: cargo run --example fuse_conv_bn [model.onnx [out.onnx]]
//!
//! Without arguments a small Conv -> BatchNormalization -> Relu model is
//! built in memory. Set `RUST_LOG=onnx_fuse=debug` to see each rule fire.

use std::env;
use std::path::Path;
use std::time::Instant;

use prost::Message;
use tracing_subscriber::EnvFilter;

use onnx_fuse::prelude::*;
use onnx_fuse::proto::extensions::{make_node, make_tensor_value_info, make_value_info};
use onnx_fuse::tensor::convert::vec_to_tensor_f32;

fn sample_model() -> ModelProto {
    let mut weight = vec_to_tensor_f32(&[0.5; 2 * 3 * 3 * 3], "W");
    weight.dims = vec![2, 3, 3, 3];

    let mut bn = make_node(
        "BatchNormalization",
        &["conv_out", "gamma", "beta", "mean", "var"],
        &["bn_out"],
        "bn",
    );
    bn.attribute.push(AttributeProto::new_float("epsilon", 1e-5));

    let graph = GraphProto {
        name: "conv_bn_relu".to_string(),
        node: vec![
            make_node("Conv", &["X", "W"], &["conv_out"], "conv"),
            bn,
            make_node("Relu", &["bn_out"], &["Y"], "relu"),
        ],
        initializer: vec![
            weight,
            vec_to_tensor_f32(&[1.2, 0.8], "gamma"),
            vec_to_tensor_f32(&[0.1, -0.1], "beta"),
            vec_to_tensor_f32(&[0.3, 0.6], "mean"),
            vec_to_tensor_f32(&[1.0, 4.0], "var"),
        ],
        input: vec![make_tensor_value_info(
            "X",
            tensor_proto::DataType::Float as i32,
            &[1, 3, 8, 8],
        )],
        output: vec![make_value_info("Y")],
        ..Default::default()
    };

    ModelProto {
        ir_version: 8,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        graph: Some(graph),
        ..Default::default()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("onnx_fuse=info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let model = match args.get(1) {
        Some(path) => {
            let bytes = std::fs::read(Path::new(path))?;
            ModelProto::decode(bytes.as_slice())?
        }
        None => sample_model(),
    };

    let original_nodes = model.graph.as_ref().map(|g| g.node.len()).unwrap_or(0);
    println!("Conv fusion");
    println!("{}", "=".repeat(60));
    println!("Original nodes: {}", original_nodes);

    let start = Instant::now();
    let (optimized, stats) = conv_fusion_transformer().apply_to_model(&model)?;
    let elapsed = start.elapsed();

    let remaining_nodes = optimized.graph.as_ref().map(|g| g.node.len()).unwrap_or(0);
    println!("\n## Fusion Results");
    println!("  Passes: {}", stats.iterations);
    println!("  Rules applied: {}", stats.rules_applied);
    println!("  Nodes removed: {}", stats.nodes_removed);
    println!("  Initializers removed: {}", stats.initializers_removed);
    println!("  Time: {:?}", elapsed);
    println!("  Remaining nodes: {}", remaining_nodes);

    if let Some(graph) = optimized.graph.as_ref() {
        for node in &graph.node {
            println!("  {} ({}): {:?} -> {:?}", node.name, node.op_type, node.input, node.output);
        }
    }

    if let Some(out) = args.get(2) {
        std::fs::write(out, optimized.encode_to_vec())?;
        println!("\nSaved to {}", out);
    }

    Ok(())
}
