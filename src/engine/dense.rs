//! Pure-Rust reference engine over a stack of fully connected layers.
//!
//! The artifact is a serialized [`DenseModelSpec`] in JSON or YAML:
//!
//! ```json
//! {
//!   "input":  {"name": "features", "shape": [4]},
//!   "output": {"name": "scores",   "shape": [2]},
//!   "layers": [
//!     {"weights": [[...], [...], [...]], "bias": [0, 0, 0], "activation": "relu"},
//!     {"weights": [[...], [...]],        "bias": [0, 0],    "activation": "softmax"}
//!   ]
//! }
//! ```

use ndarray::{Array1, Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{Device, Engine, ModelHandle};
use crate::error::{EvalPoolError, Result};
use crate::schema::NodeSchema;
use crate::tensor::TensorMap;

/// Element-wise function applied after a layer's affine transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    fn apply(self, x: &mut Array1<f32>) {
        match self {
            Self::Identity => {}
            Self::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Self::Sigmoid => x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
            Self::Tanh => x.mapv_inplace(f32::tanh),
            Self::Softmax => {
                let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                x.mapv_inplace(|v| (v - max).exp());
                let sum = x.sum();
                if sum > 0.0 {
                    x.mapv_inplace(|v| v / sum);
                }
            }
        }
    }
}

/// A named node and its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl NodeSpec {
    fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// One fully connected layer: `activation(weights · x + bias)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayerSpec {
    /// Row-major weights, `out_features` rows of `in_features` columns.
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub activation: Activation,
}

/// Serialized form of a dense model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseModelSpec {
    pub input: NodeSpec,
    pub output: NodeSpec,
    pub layers: Vec<DenseLayerSpec>,
}

impl DenseModelSpec {
    /// Read a spec from disk, choosing YAML or JSON by file extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EvalPoolError::load(format!(
                "artifact not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvalPoolError::load(format!("cannot read {}: {}", path.display(), e))
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let spec = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };
        spec.map_err(|e| EvalPoolError::load(format!("cannot parse {}: {}", path.display(), e)))
    }
}

struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

/// A loaded dense model replica. Owns its own copy of every weight.
pub struct DenseModel {
    schema: NodeSchema,
    device: Device,
    input: String,
    output: NodeSpec,
    layers: Vec<DenseLayer>,
    passes: u64,
}

impl DenseModel {
    /// Build a replica from a parsed spec, checking that the layer chain
    /// connects the input node to the output node.
    pub fn from_spec(spec: DenseModelSpec, device: Device) -> Result<Self> {
        if device != Device::Cpu {
            return Err(EvalPoolError::load(format!(
                "device {} unavailable: the dense engine runs on cpu only",
                device
            )));
        }
        if spec.layers.is_empty() {
            return Err(EvalPoolError::load("model has no layers"));
        }

        let mut width = spec.input.numel();
        let mut layers = Vec::with_capacity(spec.layers.len());
        for (i, layer) in spec.layers.into_iter().enumerate() {
            let rows = layer.weights.len();
            if rows == 0 {
                return Err(EvalPoolError::load(format!("layer {} has no weights", i)));
            }
            if let Some(row) = layer.weights.iter().position(|r| r.len() != width) {
                return Err(EvalPoolError::load(format!(
                    "layer {} row {} has {} columns, expected {}",
                    i,
                    row,
                    layer.weights[row].len(),
                    width
                )));
            }
            if layer.bias.len() != rows {
                return Err(EvalPoolError::load(format!(
                    "layer {} bias has {} entries, expected {}",
                    i,
                    layer.bias.len(),
                    rows
                )));
            }
            let flat: Vec<f32> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((rows, width), flat)
                .map_err(|e| EvalPoolError::load(format!("layer {}: {}", i, e)))?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from_vec(layer.bias),
                activation: layer.activation,
            });
            width = rows;
        }

        if width != spec.output.numel() {
            return Err(EvalPoolError::load(format!(
                "last layer produces {} values but output '{}' declares {:?}",
                width, spec.output.name, spec.output.shape
            )));
        }

        let schema = NodeSchema::new()
            .with_input(spec.input.name.clone(), spec.input.shape.clone())
            .with_output(spec.output.name.clone(), spec.output.shape.clone());

        Ok(Self {
            schema,
            device,
            input: spec.input.name,
            output: spec.output,
            layers,
            passes: 0,
        })
    }

    /// Number of forward passes this replica has run.
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

impl ModelHandle for DenseModel {
    fn schema(&self) -> &NodeSchema {
        &self.schema
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&mut self, inputs: &TensorMap) -> Result<TensorMap> {
        let input = inputs
            .get(&self.input)
            .ok_or_else(|| EvalPoolError::evaluation(format!("missing input '{}'", self.input)))?;

        let mut x = Array1::from_vec(input.to_flat_vec());
        for (i, layer) in self.layers.iter().enumerate() {
            let mut y = layer.weights.dot(&x) + &layer.bias;
            // Checked before the activation: relu would mask a NaN.
            if y.iter().any(|v| !v.is_finite()) {
                return Err(EvalPoolError::evaluation(format!(
                    "layer {} produced a non-finite value",
                    i
                )));
            }
            layer.activation.apply(&mut y);
            x = y;
        }
        self.passes += 1;

        let out = ArrayD::from_shape_vec(IxDyn(&self.output.shape), x.to_vec())
            .map_err(|e| EvalPoolError::evaluation(format!("Array shape error: {}", e)))?;
        let mut outputs = TensorMap::new();
        outputs.insert(self.output.name.clone(), out);
        Ok(outputs)
    }
}

/// Engine that loads [`DenseModel`] replicas.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseEngine;

impl DenseEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for DenseEngine {
    fn name(&self) -> &'static str {
        "dense"
    }

    fn load(&self, path: &Path, device: &Device) -> Result<Box<dyn ModelHandle>> {
        let spec = DenseModelSpec::from_file(path)?;
        debug!(
            path = %path.display(),
            layers = spec.layers.len(),
            "parsed dense model"
        );
        Ok(Box::new(DenseModel::from_spec(spec, device.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn spec() -> DenseModelSpec {
        DenseModelSpec {
            input: NodeSpec {
                name: "x".into(),
                shape: vec![2],
            },
            output: NodeSpec {
                name: "y".into(),
                shape: vec![1, 2],
            },
            layers: vec![
                DenseLayerSpec {
                    weights: vec![vec![1.0, 0.0], vec![0.0, -1.0]],
                    bias: vec![0.0, 0.0],
                    activation: Activation::Relu,
                },
                DenseLayerSpec {
                    weights: vec![vec![2.0, 0.0], vec![1.0, 1.0]],
                    bias: vec![0.5, 0.0],
                    activation: Activation::Identity,
                },
            ],
        }
    }

    #[test]
    fn test_forward() {
        let mut model = DenseModel::from_spec(spec(), Device::Cpu).unwrap();
        let inputs = TensorMap::new().with_flat("x", &[2], vec![3.0, 4.0]).unwrap();

        let out = model.forward(&inputs).unwrap();
        let y = out.get("y").unwrap();
        // relu([3, -4]) = [3, 0]; [2*3 + 0.5, 3 + 0] = [6.5, 3]
        assert_eq!(y.shape(), &[1, 2]);
        assert_eq!(y.to_flat_vec(), vec![6.5, 3.0]);
        assert_eq!(model.passes(), 1);
    }

    #[test]
    fn test_schema_from_spec() {
        let model = DenseModel::from_spec(spec(), Device::Cpu).unwrap();
        assert_eq!(model.schema().element_count(crate::NodeGroup::Input, "x"), Some(2));
        assert_eq!(model.schema().element_count(crate::NodeGroup::Output, "y"), Some(2));
    }

    #[test]
    fn test_gpu_device_unavailable() {
        let err = DenseModel::from_spec(spec(), Device::Gpu(0)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Load);
        assert!(err.to_string().contains("gpu:0"));
    }

    #[test]
    fn test_inconsistent_layers_rejected() {
        let mut bad = spec();
        bad.layers[1].weights[0].push(1.0);
        let err = DenseModel::from_spec(bad, Device::Cpu).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Load);

        let mut bad = spec();
        bad.layers[0].bias.pop();
        assert!(DenseModel::from_spec(bad, Device::Cpu).is_err());

        let mut bad = spec();
        bad.output.shape = vec![3];
        assert!(DenseModel::from_spec(bad, Device::Cpu).is_err());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut x = Array1::from_vec(vec![1.0, 2.0, 3.0]);
        Activation::Softmax.apply(&mut x);
        assert!((x.sum() - 1.0).abs() < 1e-6);
        assert!(x[2] > x[1] && x[1] > x[0]);
    }

    #[test]
    fn test_non_finite_output_is_evaluation_error() {
        let mut model = DenseModel::from_spec(spec(), Device::Cpu).unwrap();
        let inputs = TensorMap::new()
            .with_flat("x", &[2], vec![f32::NAN, 0.0])
            .unwrap();
        let err = model.forward(&inputs).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Evaluation);
    }

    #[test]
    fn test_missing_artifact_is_load_error() {
        let err = DenseEngine::new()
            .load(Path::new("/no/such/model.json"), &Device::Cpu)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn test_activation_names() {
        let a: Activation = serde_json::from_str("\"sigmoid\"").unwrap();
        assert_eq!(a, Activation::Sigmoid);
    }
}
