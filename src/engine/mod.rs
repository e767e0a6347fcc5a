//! Inference engines.
//!
//! An [`Engine`] turns a model artifact into a [`ModelHandle`]: one loaded
//! replica bound to one device. The pool owns handles and only ever lets one
//! caller at a time drive a given handle, so handles need to be `Send` but
//! not `Sync`.

mod dense;
#[cfg(feature = "native")]
mod native;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{EvalPoolError, Result};
use crate::schema::NodeSchema;
use crate::tensor::TensorMap;

pub use dense::{Activation, DenseEngine, DenseLayerSpec, DenseModel, DenseModelSpec, NodeSpec};
#[cfg(feature = "native")]
pub use native::{NativeEngine, NativeModel};

/// Compute device a model replica is loaded on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU device.
    #[default]
    Cpu,
    /// GPU device with index.
    Gpu(usize),
}

impl Device {
    /// Create a CPU device.
    pub fn cpu() -> Self {
        Self::Cpu
    }

    /// Create a GPU device with the given index.
    pub fn gpu(index: usize) -> Self {
        Self::Gpu(index)
    }

    /// Numeric device id: `-1` for CPU, the GPU index otherwise.
    ///
    /// GPU indices beyond `i32::MAX` saturate, so they never alias the CPU.
    pub fn id(&self) -> i32 {
        match self {
            Self::Cpu => -1,
            Self::Gpu(idx) => i32::try_from(*idx).unwrap_or(i32::MAX),
        }
    }

    /// Inverse of [`id`](Self::id); any negative id is the CPU.
    pub fn from_id(id: i32) -> Self {
        if id < 0 {
            Self::Cpu
        } else {
            Self::Gpu(id as usize)
        }
    }
}

impl FromStr for Device {
    type Err = EvalPoolError;

    /// Parse "cpu", "gpu", "gpu:N", "cuda", "cuda:N" or a numeric device id.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            return Ok(Self::Cpu);
        }
        if s == "gpu" || s == "cuda" {
            return Ok(Self::Gpu(0));
        }
        if let Some(idx) = s.strip_prefix("gpu:").or_else(|| s.strip_prefix("cuda:")) {
            let index = idx
                .parse::<i32>()
                .ok()
                .filter(|i| *i >= 0)
                .ok_or_else(|| EvalPoolError::config(format!("Invalid GPU index: {}", idx)))?;
            return Ok(Self::from_id(index));
        }
        s.parse::<i32>()
            .map(Self::from_id)
            .map_err(|_| EvalPoolError::config(format!("Invalid device: {}", s)))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(idx) => write!(f, "gpu:{}", idx),
        }
    }
}

/// Loads model replicas from an artifact.
pub trait Engine: Send + Sync {
    /// Short engine name used in logs and on the command line.
    fn name(&self) -> &'static str;

    /// Load one independent replica of the model at `path` onto `device`.
    ///
    /// Every call must return a handle that shares no mutable state with
    /// handles returned by earlier calls.
    fn load(&self, path: &Path, device: &Device) -> Result<Box<dyn ModelHandle>>;
}

/// One loaded model replica.
pub trait ModelHandle: Send {
    /// Declared input and output nodes.
    fn schema(&self) -> &NodeSchema;

    /// Device this replica runs on.
    fn device(&self) -> &Device;

    /// Run a forward pass. Inputs have already been validated against
    /// [`schema`](Self::schema).
    fn forward(&mut self, inputs: &TensorMap) -> Result<TensorMap>;
}

/// Names accepted by [`engine_by_name`].
pub fn available_engines() -> &'static [&'static str] {
    if cfg!(feature = "native") {
        &["dense", "native"]
    } else {
        &["dense"]
    }
}

/// Look up a built-in engine by name.
pub fn engine_by_name(name: &str) -> Result<Arc<dyn Engine>> {
    match name.trim().to_lowercase().as_str() {
        "dense" => Ok(Arc::new(DenseEngine::new())),
        #[cfg(feature = "native")]
        "native" => Ok(Arc::new(NativeEngine::new())),
        other => Err(EvalPoolError::config(format!(
            "unknown engine '{}'; available: {}",
            other,
            available_engines().join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parsing() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("gpu".parse::<Device>().unwrap(), Device::Gpu(0));
        assert_eq!("gpu:1".parse::<Device>().unwrap(), Device::Gpu(1));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Gpu(2));
        assert_eq!("-1".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("3".parse::<Device>().unwrap(), Device::Gpu(3));
        assert!("tpu".parse::<Device>().is_err());
        assert!("gpu:x".parse::<Device>().is_err());
        assert!("gpu:-1".parse::<Device>().is_err());
    }

    #[test]
    fn test_out_of_range_gpu_index_rejected() {
        let err = "gpu:3000000000".parse::<Device>().unwrap_err();
        assert!(err.to_string().contains("Invalid GPU index"));
        assert!("cuda:2147483648".parse::<Device>().is_err());
        assert!("3000000000".parse::<Device>().is_err());
        assert_eq!("gpu:2147483647".parse::<Device>().unwrap().id(), i32::MAX);
        assert_eq!(Device::gpu(3_000_000_000).id(), i32::MAX);
    }

    #[test]
    fn test_device_display_and_id() {
        assert_eq!(Device::cpu().to_string(), "cpu");
        assert_eq!(Device::gpu(1).to_string(), "gpu:1");
        assert_eq!(Device::Cpu.id(), -1);
        assert_eq!(Device::from_id(Device::gpu(4).id()), Device::Gpu(4));
    }

    #[test]
    fn test_engine_lookup() {
        assert_eq!(engine_by_name("dense").unwrap().name(), "dense");
        assert!(engine_by_name("nope").is_err());
    }
}
