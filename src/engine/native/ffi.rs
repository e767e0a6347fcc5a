//! FFI declarations for the C evaluation bridge (`libevalbridge`).
//!
//! This module contains the raw FFI bindings. Use the safe wrappers
//! in the parent module instead of calling these directly.

use std::ffi::c_void;
use std::os::raw::c_char;

/// Opaque handle to a loaded native model.
pub type ModelHandle = *mut c_void;

/// Node group selector for the schema queries.
pub const GROUP_INPUT: i32 = 0;
pub const GROUP_OUTPUT: i32 = 1;

extern "C" {
    // Model lifecycle
    pub fn evb_model_load(path: *const c_char, device_id: i32) -> ModelHandle;
    pub fn evb_model_free(model: ModelHandle);
    pub fn evb_get_last_error() -> *const c_char;

    // Schema
    pub fn evb_node_count(model: ModelHandle, group: i32) -> usize;
    pub fn evb_node_name(model: ModelHandle, group: i32, index: usize) -> *const c_char;
    pub fn evb_node_dim(model: ModelHandle, group: i32, index: usize) -> usize;

    // Evaluation. `inputs` and `outputs` hold one buffer per node, in node
    // index order, each sized to that node's dimension. Returns 0 on success.
    pub fn evb_model_evaluate(
        model: ModelHandle,
        inputs: *const *const f32,
        outputs: *const *mut f32,
    ) -> i32;
}
