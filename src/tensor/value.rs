//! Dtype-checked constant arithmetic
//!
//! [`TensorValue`] wraps the payload of a floating point initializer so rules
//! can fold arithmetic into it. Operations combine tensors of identical element
//! type and shape; mixing either is a programming error and panics.

use ndarray::{ArrayD, Axis, IxDyn};

use crate::error::{OnnxResult, TransformError};
use crate::proto::tensor_proto::{DataLocation, DataType};
use crate::proto::TensorProto;

use super::convert::{tensor_to_array_f32, tensor_to_array_f64};
use super::dtype::is_supported_dtype;

/// Typed payload of a [`TensorValue`]
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// 32-bit float elements
    Float(ArrayD<f32>),
    /// 64-bit float elements
    Double(ArrayD<f64>),
}

impl TensorData {
    fn data_type(&self) -> DataType {
        match self {
            TensorData::Float(_) => DataType::Float,
            TensorData::Double(_) => DataType::Double,
        }
    }
}

/// Constant tensor supporting in-place element-wise arithmetic
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    data: TensorData,
}

/// Dispatch a binary element-wise operator over matching payloads
macro_rules! elementwise {
    ($self:ident, $other:ident, $name:literal, $op:tt) => {
        match (&mut $self.data, &$other.data) {
            (TensorData::Float(lhs), TensorData::Float(rhs)) => {
                zip_in_place(lhs, rhs, $name, |a, b| a $op b)
            }
            (TensorData::Double(lhs), TensorData::Double(rhs)) => {
                zip_in_place(lhs, rhs, $name, |a, b| a $op b)
            }
            (lhs, rhs) => dtype_mismatch($name, lhs.data_type(), rhs.data_type()),
        }
    };
}

impl TensorValue {
    /// Decode a tensor record
    ///
    /// Fails for element types other than `Float` and `Double`, for external
    /// payloads, and when the payload does not match the declared dims.
    pub fn from_proto(tensor: &TensorProto) -> OnnxResult<Self> {
        if tensor.has_external_data() {
            return Err(TransformError::ExternalData(tensor.name.clone()));
        }
        let data = match tensor.data_type_enum() {
            DataType::Float => TensorData::Float(tensor_to_array_f32(tensor)?),
            DataType::Double => TensorData::Double(tensor_to_array_f64(tensor)?),
            _ => return Err(TransformError::InvalidDataType(tensor.data_type)),
        };
        Ok(Self { data })
    }

    /// Whether [`TensorValue::from_proto`] accepts this tensor's element type
    pub fn is_supported_data_type(tensor: &TensorProto) -> bool {
        is_supported_dtype(tensor.data_type_enum())
    }

    /// Wrap an f32 array
    pub fn from_f32(array: ArrayD<f32>) -> Self {
        Self {
            data: TensorData::Float(array),
        }
    }

    /// Wrap an f64 array
    pub fn from_f64(array: ArrayD<f64>) -> Self {
        Self {
            data: TensorData::Double(array),
        }
    }

    /// Borrow the typed payload
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Element type
    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Shape in elements per axis
    pub fn shape(&self) -> &[usize] {
        match &self.data {
            TensorData::Float(a) => a.shape(),
            TensorData::Double(a) => a.shape(),
        }
    }

    /// Shape as ONNX dims
    pub fn dims(&self) -> Vec<i64> {
        self.shape().iter().map(|&d| d as i64).collect()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::Float(a) => a.len(),
            TensorData::Double(a) => a.len(),
        }
    }

    /// Whether the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements widened to f64, in logical order
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            TensorData::Float(a) => a.iter().map(|&v| f64::from(v)).collect(),
            TensorData::Double(a) => a.iter().copied().collect(),
        }
    }

    /// Add a scalar to every element
    ///
    /// The scalar is narrowed to the element type first.
    pub fn add_scalar(&mut self, value: f64) {
        match &mut self.data {
            TensorData::Float(a) => {
                let value = value as f32;
                a.mapv_inplace(|x| x + value);
            }
            TensorData::Double(a) => a.mapv_inplace(|x| x + value),
        }
    }

    /// Square root of every element
    pub fn sqrt(&mut self) {
        match &mut self.data {
            TensorData::Float(a) => a.mapv_inplace(f32::sqrt),
            TensorData::Double(a) => a.mapv_inplace(f64::sqrt),
        }
    }

    /// Element-wise `self += other`
    ///
    /// # Panics
    ///
    /// Panics when element types or shapes differ.
    pub fn add(&mut self, other: &TensorValue) {
        elementwise!(self, other, "add", +)
    }

    /// Element-wise `self -= other`
    ///
    /// # Panics
    ///
    /// Panics when element types or shapes differ.
    pub fn sub(&mut self, other: &TensorValue) {
        elementwise!(self, other, "sub", -)
    }

    /// Element-wise `self *= other`
    ///
    /// # Panics
    ///
    /// Panics when element types or shapes differ.
    pub fn mul(&mut self, other: &TensorValue) {
        elementwise!(self, other, "mul", *)
    }

    /// Element-wise `self /= other`
    ///
    /// # Panics
    ///
    /// Panics when element types or shapes differ.
    pub fn div(&mut self, other: &TensorValue) {
        elementwise!(self, other, "div", /)
    }

    /// Multiply every slice along `axis` by the matching element of `factors`
    ///
    /// `factors` holds one element per index of `axis`, or a single element
    /// applied to the whole tensor.
    ///
    /// # Panics
    ///
    /// Panics when element types differ, `axis` is out of range or `factors`
    /// has the wrong length.
    pub fn scale_by_axis(&mut self, factors: &TensorValue, axis: usize) {
        match (&mut self.data, &factors.data) {
            (TensorData::Float(a), TensorData::Float(f)) => scale_lanes(a, f, axis),
            (TensorData::Double(a), TensorData::Double(f)) => scale_lanes(a, f, axis),
            (lhs, rhs) => dtype_mismatch("scale_by_axis", lhs.data_type(), rhs.data_type()),
        }
    }

    /// Reinterpret the elements under a new shape
    ///
    /// # Panics
    ///
    /// Panics when the element count changes.
    pub fn reshape(&mut self, shape: &[usize]) {
        fn relabel<T: Copy>(a: &ArrayD<T>, shape: &[usize]) -> ArrayD<T> {
            let elements: Vec<T> = a.iter().copied().collect();
            ArrayD::from_shape_vec(IxDyn(shape), elements).unwrap_or_else(|e| {
                panic!("cannot reshape {:?} into {:?}: {}", a.shape(), shape, e)
            })
        }

        self.data = match &self.data {
            TensorData::Float(a) => TensorData::Float(relabel(a, shape)),
            TensorData::Double(a) => TensorData::Double(relabel(a, shape)),
        };
    }

    /// Repeat a single-element tensor into a rank-1 tensor of `len` elements
    ///
    /// # Panics
    ///
    /// Panics when the tensor holds more than one element.
    pub fn broadcast_to_len(&self, len: usize) -> TensorValue {
        assert_eq!(
            self.len(),
            1,
            "only single-element tensors broadcast, got shape {:?}",
            self.shape()
        );
        let data = match &self.data {
            TensorData::Float(a) => {
                TensorData::Float(ArrayD::from_elem(IxDyn(&[len]), a.iter().copied().sum()))
            }
            TensorData::Double(a) => {
                TensorData::Double(ArrayD::from_elem(IxDyn(&[len]), a.iter().copied().sum()))
            }
        };
        TensorValue { data }
    }

    /// Write dims, element type and payload into `record`
    ///
    /// The payload is stored as little-endian `raw_data`; typed payload fields
    /// are cleared. Name and doc string are left alone.
    pub fn to_proto(&self, record: &mut TensorProto) {
        record.dims = self.dims();
        record.data_type = self.data_type() as i32;
        record.raw_data = match &self.data {
            TensorData::Float(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
            TensorData::Double(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
        };
        record.float_data.clear();
        record.double_data.clear();
        record.int32_data.clear();
        record.int64_data.clear();
        record.uint64_data.clear();
        record.string_data.clear();
        record.external_data.clear();
        record.data_location = DataLocation::Default as i32;
        record.segment = None;
    }

    /// Copy `template` and overwrite its payload with this value
    pub fn into_proto(&self, template: &TensorProto) -> TensorProto {
        let mut record = template.clone();
        self.to_proto(&mut record);
        record
    }
}

fn zip_in_place<T: Copy>(
    lhs: &mut ArrayD<T>,
    rhs: &ArrayD<T>,
    op: &str,
    f: impl Fn(T, T) -> T,
) {
    assert_eq!(
        lhs.shape(),
        rhs.shape(),
        "{op}: shape mismatch {:?} vs {:?}",
        lhs.shape(),
        rhs.shape()
    );
    lhs.zip_mut_with(rhs, |a, &b| *a = f(*a, b));
}

fn scale_lanes<T>(target: &mut ArrayD<T>, factors: &ArrayD<T>, axis: usize)
where
    T: Copy + std::ops::Mul<Output = T>,
{
    assert!(
        axis < target.ndim(),
        "axis {axis} out of range for rank {}",
        target.ndim()
    );

    if factors.len() == 1 {
        if let Some(&factor) = factors.iter().next() {
            target.mapv_inplace(|x| x * factor);
        }
        return;
    }

    assert_eq!(
        factors.len(),
        target.shape()[axis],
        "scale_by_axis: {} factors for axis {axis} of shape {:?}",
        factors.len(),
        target.shape()
    );
    for (mut lane, &factor) in target.axis_iter_mut(Axis(axis)).zip(factors.iter()) {
        lane.mapv_inplace(|x| x * factor);
    }
}

fn dtype_mismatch(op: &str, lhs: DataType, rhs: DataType) -> ! {
    panic!("{op}: element type mismatch {lhs:?} vs {rhs:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::convert::{vec_to_tensor_f32, vec_to_tensor_f64};
    use ndarray::ArrayD;
    use proptest::prelude::*;

    fn f32_value(shape: &[usize], data: Vec<f32>) -> TensorValue {
        TensorValue::from_f32(ArrayD::from_shape_vec(IxDyn(shape), data).unwrap())
    }

    #[test]
    fn test_from_proto_rejects_integers() {
        let tensor = TensorProto {
            dims: vec![1],
            data_type: DataType::Int64 as i32,
            int64_data: vec![3],
            ..Default::default()
        };
        assert!(!TensorValue::is_supported_data_type(&tensor));
        assert!(matches!(
            TensorValue::from_proto(&tensor),
            Err(TransformError::InvalidDataType(7))
        ));
    }

    #[test]
    fn test_from_proto_rejects_external_payload() {
        let mut tensor = vec_to_tensor_f32(&[1.0, 2.0], "W");
        tensor.data_location = DataLocation::External as i32;
        tensor.external_data.push(crate::proto::StringStringEntryProto {
            key: "location".to_string(),
            value: "weights.bin".to_string(),
        });

        assert!(matches!(
            TensorValue::from_proto(&tensor),
            Err(TransformError::ExternalData(name)) if name == "W"
        ));
    }

    #[test]
    fn test_elementwise_chain() {
        let mut value = TensorValue::from_proto(&vec_to_tensor_f32(&[3.0, 8.0], "v")).unwrap();
        let other = TensorValue::from_proto(&vec_to_tensor_f32(&[1.0, 2.0], "o")).unwrap();

        value.add_scalar(1.0); // [4, 9]
        value.sqrt(); // [2, 3]
        value.mul(&other); // [2, 6]
        value.sub(&other); // [1, 4]
        value.div(&other); // [1, 2]
        value.add(&other); // [2, 4]

        assert_eq!(value.to_f64_vec(), vec![2.0, 4.0]);
        assert_eq!(value.data_type(), DataType::Float);
    }

    #[test]
    fn test_double_arithmetic() {
        let mut value = TensorValue::from_proto(&vec_to_tensor_f64(&[0.1, 0.2], "v")).unwrap();
        value.add_scalar(0.1);
        assert_eq!(value.data_type(), DataType::Double);
        assert!((value.to_f64_vec()[0] - 0.2).abs() < 1e-15);

        let factors =
            TensorValue::from_f64(ArrayD::from_shape_vec(IxDyn(&[2]), vec![10.0, -1.0]).unwrap());
        value.scale_by_axis(&factors, 0);
        assert!((value.to_f64_vec()[0] - 2.0).abs() < 1e-12);
        assert!((value.to_f64_vec()[1] + 0.3).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "element type mismatch")]
    fn test_mixed_dtypes_panic() {
        let mut lhs = TensorValue::from_proto(&vec_to_tensor_f32(&[1.0], "a")).unwrap();
        let rhs = TensorValue::from_proto(&vec_to_tensor_f64(&[1.0], "b")).unwrap();
        lhs.add(&rhs);
    }

    #[test]
    #[should_panic(expected = "shape mismatch")]
    fn test_mixed_shapes_panic() {
        let mut lhs = f32_value(&[2], vec![1.0, 2.0]);
        let rhs = f32_value(&[1], vec![1.0]);
        lhs.mul(&rhs);
    }

    #[test]
    fn test_scale_by_axis() {
        // [2, 3]: scale rows
        let mut rows = f32_value(&[2, 3], vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        rows.scale_by_axis(&f32_value(&[2], vec![10.0, 0.5]), 0);
        assert_eq!(rows.to_f64_vec(), vec![10.0, 10.0, 10.0, 1.0, 1.0, 1.0]);

        // scale columns
        let mut cols = f32_value(&[2, 3], vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        cols.scale_by_axis(&f32_value(&[3], vec![1.0, 2.0, 3.0]), 1);
        assert_eq!(cols.to_f64_vec(), vec![1.0, 2.0, 3.0, 2.0, 4.0, 6.0]);

        // single factor scales everything
        let mut all = f32_value(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        all.scale_by_axis(&f32_value(&[], vec![2.0]), 0);
        assert_eq!(all.to_f64_vec(), vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_reshape_and_broadcast() {
        let mut value = f32_value(&[3, 1, 1], vec![1.0, 2.0, 3.0]);
        value.reshape(&[3]);
        assert_eq!(value.shape(), &[3]);
        assert_eq!(value.dims(), vec![3]);

        let scalar = f32_value(&[], vec![0.5]);
        let spread = scalar.broadcast_to_len(4);
        assert_eq!(spread.shape(), &[4]);
        assert_eq!(spread.to_f64_vec(), vec![0.5; 4]);
    }

    #[test]
    fn test_to_proto_clears_typed_fields() {
        let template = vec_to_tensor_f32(&[1.0, 2.0], "bias");
        let value = f32_value(&[2], vec![3.0, 4.0]);
        let record = value.into_proto(&template);

        assert_eq!(record.name, "bias");
        assert_eq!(record.dims, vec![2]);
        assert!(record.float_data.is_empty());
        assert_eq!(record.raw_data.len(), 8);
        assert_eq!(TensorValue::from_proto(&record).unwrap(), value);
    }

    proptest! {
        #[test]
        fn scale_by_axis_matches_manual_loop(
            rows in 1usize..5,
            cols in 1usize..5,
            seed in prop::collection::vec(-100.0f32..100.0, 25),
            factors in prop::collection::vec(-4.0f32..4.0, 5),
        ) {
            let data: Vec<f32> = seed.iter().copied().take(rows * cols).collect();
            let mut value = f32_value(&[rows, cols], data.clone());
            value.scale_by_axis(&f32_value(&[rows], factors[..rows].to_vec()), 0);

            let result = value.to_f64_vec();
            for r in 0..rows {
                for c in 0..cols {
                    let expected = data[r * cols + c] * factors[r];
                    prop_assert_eq!(result[r * cols + c], f64::from(expected));
                }
            }
        }
    }
}
