//! Extension methods for ONNX protobuf types
//!
//! Provides convenient helper methods for working with ONNX protobuf types.

use super::onnx::*;

// ============================================================================
// TensorProto extensions
// ============================================================================

impl TensorProto {
    /// Check if the payload is stored outside the model record
    pub fn has_external_data(&self) -> bool {
        self.data_location == tensor_proto::DataLocation::External as i32
    }

    /// Check if this tensor has raw_data
    pub fn has_raw_data(&self) -> bool {
        !self.raw_data.is_empty()
    }

    /// Get data type enum value
    pub fn data_type_enum(&self) -> tensor_proto::DataType {
        tensor_proto::DataType::try_from(self.data_type)
            .unwrap_or(tensor_proto::DataType::Undefined)
    }
}

// ============================================================================
// AttributeProto extensions
// ============================================================================

impl AttributeProto {
    /// Get the attribute type enum value
    pub fn attribute_type(&self) -> attribute_proto::AttributeType {
        attribute_proto::AttributeType::try_from(self.r#type)
            .unwrap_or(attribute_proto::AttributeType::Undefined)
    }

    /// Create a new integer attribute
    pub fn new_int(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            i: value,
            r#type: attribute_proto::AttributeType::Int as i32,
            ..Default::default()
        }
    }

    /// Create a new float attribute
    pub fn new_float(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            f: value,
            r#type: attribute_proto::AttributeType::Float as i32,
            ..Default::default()
        }
    }

    /// Create a new ints attribute
    pub fn new_ints(name: &str, values: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            ints: values,
            r#type: attribute_proto::AttributeType::Ints as i32,
            ..Default::default()
        }
    }

    /// Create a new strings attribute
    pub fn new_strings(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            strings: values.iter().map(|s| s.as_bytes().to_vec()).collect(),
            r#type: attribute_proto::AttributeType::Strings as i32,
            ..Default::default()
        }
    }

    /// Create a new subgraph attribute
    pub fn new_graph(name: &str, graph: GraphProto) -> Self {
        Self {
            name: name.to_string(),
            g: Some(graph),
            r#type: attribute_proto::AttributeType::Graph as i32,
            ..Default::default()
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Create a new ValueInfoProto for a tensor
pub fn make_tensor_value_info(name: &str, elem_type: i32, shape: &[i64]) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type,
                shape: Some(TensorShapeProto {
                    dim: shape
                        .iter()
                        .map(|&d| tensor_shape_proto::Dimension {
                            value: Some(tensor_shape_proto::dimension::Value::DimValue(d)),
                            denotation: String::new(),
                        })
                        .collect(),
                }),
            })),
            denotation: String::new(),
        }),
        ..Default::default()
    }
}

/// Create an untyped ValueInfoProto carrying only a name
pub fn make_value_info(name: &str) -> ValueInfoProto {
    ValueInfoProto {
        name: name.to_string(),
        ..Default::default()
    }
}

/// Create a new NodeProto
pub fn make_node(op_type: &str, inputs: &[&str], outputs: &[&str], name: &str) -> NodeProto {
    NodeProto {
        op_type: op_type.to_string(),
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        name: name.to_string(),
        ..Default::default()
    }
}
