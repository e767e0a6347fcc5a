//! Pool slots and the RAII guard that hands one back to the pool.
//!
//! A [`SlotGuard`] is the only way to reach a replica. Dropping the guard
//! returns the slot to the idle set, so a slot is released on every exit
//! path of an evaluation, including errors and panics inside the engine.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use super::PoolInner;
use crate::engine::ModelHandle;
use crate::error::{EvalPoolError, Result};
use crate::schema::NodeSchema;
use crate::tensor::TensorMap;

/// One loaded replica plus its exclusivity guard.
pub(crate) struct PoolSlot {
    model: Mutex<Box<dyn ModelHandle>>,
    schema: Arc<NodeSchema>,
}

impl PoolSlot {
    pub(crate) fn new(model: Box<dyn ModelHandle>, schema: Arc<NodeSchema>) -> Self {
        Self {
            model: Mutex::new(model),
            schema,
        }
    }

    pub(crate) fn schema(&self) -> &Arc<NodeSchema> {
        &self.schema
    }
}

/// Exclusive access to one slot for the duration of a single evaluation.
pub(crate) struct SlotGuard {
    slot: Arc<PoolSlot>,
    index: usize,
    generation: u64,
    pool: Arc<PoolInner>,
}

impl SlotGuard {
    pub(crate) fn new(
        slot: Arc<PoolSlot>,
        index: usize,
        generation: u64,
        pool: Arc<PoolInner>,
    ) -> Self {
        Self {
            slot,
            index,
            generation,
            pool,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn schema(&self) -> &Arc<NodeSchema> {
        self.slot.schema()
    }

    /// Run the forward pass on this slot's replica.
    ///
    /// A panic inside the engine is caught and reported as an `Evaluation`
    /// error. The replica stays in service for later calls.
    pub(crate) fn forward(&self, inputs: &TensorMap) -> Result<TensorMap> {
        // Uncontended: only the holder of this guard ever locks it.
        let mut model = self.slot.model.lock().unwrap_or_else(|poisoned| {
            self.slot.model.clear_poison();
            PoisonError::into_inner(poisoned)
        });
        panic::catch_unwind(AssertUnwindSafe(|| model.forward(inputs))).unwrap_or_else(
            |payload| {
                Err(EvalPoolError::evaluation(format!(
                    "engine panicked in slot {}: {}",
                    self.index,
                    panic_message(payload.as_ref())
                )))
            },
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.release(self.index, self.generation);
    }
}

impl std::fmt::Debug for SlotGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}
