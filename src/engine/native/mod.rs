//! Safe wrappers over the native evaluation bridge.
//!
//! Enabled with the `native` feature. `build.rs` links `libevalbridge` from
//! `EVALBRIDGE_LIB_DIR`.

mod ffi;

use std::ffi::{CStr, CString};
use std::path::Path;
use tracing::debug;

use super::{Device, Engine, ModelHandle};
use crate::error::{EvalPoolError, Result};
use crate::schema::NodeSchema;
use crate::tensor::{TensorData, TensorMap};

/// Get the last error message from the bridge.
fn get_last_error() -> String {
    unsafe {
        let err_ptr = ffi::evb_get_last_error();
        if err_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(err_ptr).to_string_lossy().into_owned()
        }
    }
}

/// Read one node group from a loaded model, in the bridge's index order.
///
/// # Safety
///
/// `handle` must be a live model pointer from `evb_model_load`.
unsafe fn read_nodes(handle: ffi::ModelHandle, group: i32) -> Result<Vec<(String, usize)>> {
    let count = ffi::evb_node_count(handle, group);
    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let name_ptr = ffi::evb_node_name(handle, group, i);
        if name_ptr.is_null() {
            return Err(EvalPoolError::load(format!(
                "bridge returned no name for node {} of group {}",
                i, group
            )));
        }
        let name = CStr::from_ptr(name_ptr).to_string_lossy().into_owned();
        nodes.push((name, ffi::evb_node_dim(handle, group, i)));
    }
    Ok(nodes)
}

/// A model replica living inside the native bridge.
///
/// The handle is freed when the value is dropped.
pub struct NativeModel {
    handle: ffi::ModelHandle,
    device: Device,
    schema: NodeSchema,
    inputs: Vec<(String, usize)>,
    outputs: Vec<(String, usize)>,
}

// SAFETY: the bridge allows a handle to move between threads as long as it is
// not used concurrently; the pool never shares a replica between callers.
unsafe impl Send for NativeModel {}

impl NativeModel {
    /// Load a model through the bridge.
    pub fn load(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EvalPoolError::load(format!(
                "artifact not found: {}",
                path.display()
            )));
        }

        if let Device::Gpu(idx) = device {
            if i32::try_from(idx).is_err() {
                return Err(EvalPoolError::load(format!("GPU index {} is out of range", idx)));
            }
        }

        let path_str = path.to_string_lossy();
        let path_cstr = CString::new(path_str.as_ref())
            .map_err(|_| EvalPoolError::load("Invalid path encoding"))?;

        let handle = unsafe { ffi::evb_model_load(path_cstr.as_ptr(), device.id()) };
        if handle.is_null() {
            return Err(EvalPoolError::load(format!(
                "Failed to load model on {}: {}",
                device,
                get_last_error()
            )));
        }

        // From here on `model` owns the handle, so early returns free it.
        let mut model = Self {
            handle,
            device,
            schema: NodeSchema::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        model.inputs = unsafe { read_nodes(handle, ffi::GROUP_INPUT)? };
        model.outputs = unsafe { read_nodes(handle, ffi::GROUP_OUTPUT)? };

        let mut schema = NodeSchema::new();
        for (name, dim) in &model.inputs {
            schema = schema.with_input(name.clone(), vec![*dim]);
        }
        for (name, dim) in &model.outputs {
            schema = schema.with_output(name.clone(), vec![*dim]);
        }
        model.schema = schema;
        Ok(model)
    }
}

impl ModelHandle for NativeModel {
    fn schema(&self) -> &NodeSchema {
        &self.schema
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(&mut self, inputs: &TensorMap) -> Result<TensorMap> {
        // Contiguous copies in the bridge's node order.
        let input_bufs = self
            .inputs
            .iter()
            .map(|(name, _)| {
                inputs
                    .get(name)
                    .map(TensorData::to_flat_vec)
                    .ok_or_else(|| EvalPoolError::evaluation(format!("missing input '{}'", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        let input_ptrs: Vec<*const f32> = input_bufs.iter().map(|b| b.as_ptr()).collect();

        let mut output_bufs: Vec<Vec<f32>> =
            self.outputs.iter().map(|(_, dim)| vec![0.0; *dim]).collect();
        let output_ptrs: Vec<*mut f32> =
            output_bufs.iter_mut().map(|b| b.as_mut_ptr()).collect();

        let rc = unsafe {
            ffi::evb_model_evaluate(self.handle, input_ptrs.as_ptr(), output_ptrs.as_ptr())
        };
        if rc != 0 {
            return Err(EvalPoolError::evaluation(get_last_error()));
        }

        let mut outputs = TensorMap::new();
        for ((name, dim), buf) in self.outputs.iter().zip(output_bufs) {
            outputs.insert_flat(name.clone(), &[*dim], buf)?;
        }
        Ok(outputs)
    }
}

impl Drop for NativeModel {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe {
                ffi::evb_model_free(self.handle);
            }
        }
    }
}

/// Engine that loads [`NativeModel`] replicas through the bridge.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn load(&self, path: &Path, device: &Device) -> Result<Box<dyn ModelHandle>> {
        let model = NativeModel::load(path, device.clone())?;
        debug!(
            path = %path.display(),
            inputs = model.inputs.len(),
            outputs = model.outputs.len(),
            "loaded native model"
        );
        Ok(Box::new(model))
    }
}
