//! Named tensor maps passed in and out of a forward pass.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{EvalPoolError, Result};

/// A single node's tensor value.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    /// The tensor data as a dynamic-dimensional array.
    pub data: ArrayD<f32>,
}

impl TensorData {
    /// Build a tensor from a flat buffer and a shape.
    ///
    /// Fails with a schema mismatch when the buffer length is not the
    /// product of the dimensions.
    pub fn from_flat(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(EvalPoolError::schema(format!(
                "buffer of length {} does not match shape {:?} ({} elements)",
                data.len(),
                shape,
                expected
            )));
        }
        let data = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| EvalPoolError::schema(format!("Array shape error: {}", e)))?;
        Ok(Self { data })
    }

    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Get the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Get the total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy the elements out in logical (row-major) order.
    pub fn to_flat_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

impl From<ArrayD<f32>> for TensorData {
    fn from(data: ArrayD<f32>) -> Self {
        Self { data }
    }
}

/// On-disk form of one tensor: `{"shape": [..], "data": [..]}`.
#[derive(Debug, Serialize, Deserialize)]
struct WireTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Mapping from unique node name to tensor, ordered by node name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorMap {
    tensors: BTreeMap<String, TensorData>,
}

impl TensorMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, returning the previous value for that node if any.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        tensor: impl Into<TensorData>,
    ) -> Option<TensorData> {
        self.tensors.insert(name.into(), tensor.into())
    }

    /// Insert a tensor built from a flat buffer and its shape.
    pub fn insert_flat(
        &mut self,
        name: impl Into<String>,
        shape: &[usize],
        data: Vec<f32>,
    ) -> Result<()> {
        let tensor = TensorData::from_flat(shape, data)?;
        self.tensors.insert(name.into(), tensor);
        Ok(())
    }

    /// Builder-style [`insert_flat`](Self::insert_flat).
    pub fn with_flat(
        mut self,
        name: impl Into<String>,
        shape: &[usize],
        data: Vec<f32>,
    ) -> Result<Self> {
        self.insert_flat(name, shape, data)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&TensorData> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<TensorData> {
        self.tensors.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Node names in map order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, TensorData> {
        self.tensors.iter()
    }

    /// Parse a map from its JSON form:
    /// `{"<node>": {"shape": [..], "data": [..]}, ...}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let wire: BTreeMap<String, WireTensor> = serde_json::from_str(json)?;
        let mut map = Self::new();
        for (name, tensor) in wire {
            map.insert_flat(name, &tensor.shape, tensor.data)?;
        }
        Ok(map)
    }

    /// Load a map from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EvalPoolError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Convert to the same JSON form accepted by [`from_json_str`](Self::from_json_str).
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        let wire: BTreeMap<&str, WireTensor> = self
            .tensors
            .iter()
            .map(|(name, t)| {
                (
                    name.as_str(),
                    WireTensor {
                        shape: t.shape().to_vec(),
                        data: t.to_flat_vec(),
                    },
                )
            })
            .collect();
        Ok(serde_json::to_value(wire)?)
    }
}

impl<'a> IntoIterator for &'a TensorMap {
    type Item = (&'a String, &'a TensorData);
    type IntoIter = btree_map::Iter<'a, String, TensorData>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}

impl IntoIterator for TensorMap {
    type Item = (String, TensorData);
    type IntoIter = btree_map::IntoIter<String, TensorData>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

impl FromIterator<(String, TensorData)> for TensorMap {
    fn from_iter<I: IntoIterator<Item = (String, TensorData)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}
