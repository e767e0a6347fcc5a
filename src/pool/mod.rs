//! Fixed-size pool of model replicas with slot-level mutual exclusion.
//!
//! The [`EvaluationPool`] owns N replicas loaded from the same artifact. An
//! evaluation takes one idle slot, runs the forward pass on that slot's
//! replica and gives the slot back, so up to N evaluations run in parallel
//! and no replica is ever driven by two callers at once.
//!
//! ```text
//! evaluate(inputs)
//!       │  validate against NodeSchema
//!       ▼
//!   acquire() ──── blocks on Condvar while no slot is idle
//!       │
//!       ▼
//!   SlotGuard::forward() ──► ModelHandle::forward()
//!       │
//!       │  drop()
//!       ▼
//!   PoolInner::release() ──► idle set, notify one waiter
//! ```
//!
//! # Lifecycle
//! `Uninitialized → Ready → Closed`, and `Closed → Ready` again through
//! [`EvaluationPool::initialize`].

mod slot;
mod stats;

pub use stats::EvaluationStats;

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::{Device, Engine, ModelHandle};
use crate::error::{ErrorKind, EvalPoolError, Result};
use crate::schema::NodeSchema;
use crate::tensor::TensorMap;
use slot::{PoolSlot, SlotGuard};
use stats::StatsCollector;

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized,
    Ready,
    Closed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Slot bookkeeping, guarded by one mutex.
struct Availability {
    state: PoolState,
    /// Bumped on every initialization so guards from an earlier
    /// generation never return their slot to the new idle set.
    generation: u64,
    slots: Vec<Arc<PoolSlot>>,
    idle: Vec<usize>,
    schema: Option<Arc<NodeSchema>>,
    device: Option<Device>,
}

/// State shared between the pool handles and outstanding slot guards.
pub(crate) struct PoolInner {
    engine: Arc<dyn Engine>,
    avail: Mutex<Availability>,
    slot_freed: Condvar,
    in_flight: AtomicUsize,
    stats: Mutex<StatsCollector>,
}

impl PoolInner {
    fn lock_avail(&self) -> MutexGuard<'_, Availability> {
        // Nothing panics while holding this lock; recover rather than poison the pool.
        self.avail.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stats(&self) -> MutexGuard<'_, StatsCollector> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a slot is idle, then take it.
    fn acquire(self: &Arc<Self>) -> Result<SlotGuard> {
        let mut avail = self.lock_avail();
        loop {
            if avail.state != PoolState::Ready {
                return Err(EvalPoolError::PoolClosed);
            }
            if let Some(index) = avail.idle.pop() {
                let slot = Arc::clone(&avail.slots[index]);
                let generation = avail.generation;
                drop(avail);

                let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                self.lock_stats().get_mut().update_peak(in_flight);
                return Ok(SlotGuard::new(slot, index, generation, Arc::clone(self)));
            }
            avail = self
                .slot_freed
                .wait(avail)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Called by `SlotGuard::drop` to hand a slot back.
    pub(crate) fn release(&self, index: usize, generation: u64) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        let mut avail = self.lock_avail();
        if avail.state == PoolState::Ready && avail.generation == generation {
            avail.idle.push(index);
            drop(avail);
            self.slot_freed.notify_one();
        }
    }
}

/// A fixed-size pool of model replicas.
///
/// Cloning the pool is cheap and yields another handle to the same replicas,
/// which is how worker threads share it.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use evalpool_rs::{DenseEngine, Device, EvaluationPool, TensorMap};
///
/// let pool = EvaluationPool::new(Arc::new(DenseEngine::new()));
/// pool.initialize(4, "model.json", Device::cpu())?;
///
/// let inputs = TensorMap::new().with_flat("features", &[4], vec![0.0; 4])?;
/// let outputs = pool.evaluate(&inputs)?;
/// println!("{:?}", outputs.names().collect::<Vec<_>>());
///
/// pool.shutdown();
/// # Ok::<(), evalpool_rs::EvalPoolError>(())
/// ```
#[derive(Clone)]
pub struct EvaluationPool {
    inner: Arc<PoolInner>,
}

impl EvaluationPool {
    /// Create an uninitialized pool that will load replicas with `engine`.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                engine,
                avail: Mutex::new(Availability {
                    state: PoolState::Uninitialized,
                    generation: 0,
                    slots: Vec::new(),
                    idle: Vec::new(),
                    schema: None,
                    device: None,
                }),
                slot_freed: Condvar::new(),
                in_flight: AtomicUsize::new(0),
                stats: Mutex::new(StatsCollector::new()),
            }),
        }
    }

    /// Load `pool_size` independent replicas of the model at `model_path`
    /// onto `device` and make the pool ready.
    ///
    /// # Errors
    ///
    /// - `Config` if `pool_size` is zero or the pool is already ready.
    /// - `Load` if any replica fails to load, or the replicas disagree on
    ///   their schema. Replicas loaded so far are dropped and the pool keeps
    ///   its previous state.
    pub fn initialize(
        &self,
        pool_size: usize,
        model_path: impl AsRef<Path>,
        device: Device,
    ) -> Result<()> {
        if pool_size < 1 {
            return Err(EvalPoolError::config("pool size must be at least 1"));
        }
        if self.state() == PoolState::Ready {
            return Err(EvalPoolError::config("pool is already initialized"));
        }

        let path = model_path.as_ref();
        info!(
            engine = self.inner.engine.name(),
            path = %path.display(),
            device = %device,
            pool_size,
            "loading model replicas"
        );

        let mut models: Vec<Box<dyn ModelHandle>> = Vec::with_capacity(pool_size);
        for replica in 0..pool_size {
            let model = self
                .inner
                .engine
                .load(path, &device)
                .map_err(|e| match e.kind() {
                    ErrorKind::Load | ErrorKind::Config => e,
                    _ => EvalPoolError::load(e.to_string()),
                })?;
            if let Some(first) = models.first() {
                if model.schema() != first.schema() {
                    return Err(EvalPoolError::load(format!(
                        "replica {} declares a different node schema than replica 0",
                        replica
                    )));
                }
            }
            debug!(replica, "replica loaded");
            models.push(model);
        }

        let schema = Arc::new(models[0].schema().clone());
        let slots: Vec<Arc<PoolSlot>> = models
            .into_iter()
            .map(|m| Arc::new(PoolSlot::new(m, Arc::clone(&schema))))
            .collect();

        {
            let mut avail = self.inner.lock_avail();
            if avail.state == PoolState::Ready {
                // Lost a race with a concurrent initialize.
                return Err(EvalPoolError::config("pool is already initialized"));
            }
            avail.generation += 1;
            avail.idle = (0..slots.len()).rev().collect();
            avail.slots = slots;
            avail.schema = Some(schema);
            avail.device = Some(device);
            avail.state = PoolState::Ready;
        }
        self.reset_stats();

        info!(pool_size, "pool ready");
        Ok(())
    }

    /// Evaluate one input map on an idle replica, blocking until one is free.
    ///
    /// # Errors
    ///
    /// - `PoolClosed` if the pool is not ready, including when it is shut
    ///   down while this call waits for a slot.
    /// - `SchemaMismatch` if an input node is unknown, missing or mis-sized.
    ///   No slot is taken.
    /// - `Evaluation` if the engine fails or returns outputs that do not
    ///   match the declared output nodes. The slot is still released.
    pub fn evaluate(&self, inputs: &TensorMap) -> Result<TensorMap> {
        let schema = self.schema().ok_or(EvalPoolError::PoolClosed)?;
        if let Err(e) = schema.validate_inputs(inputs) {
            self.inner.lock_stats().get_mut().record_schema_error();
            debug!(error = %e, "rejected inputs");
            return Err(e);
        }

        let wait_started = Instant::now();
        let guard = self.inner.acquire()?;
        let waited = wait_started.elapsed();

        // The pool may have been re-initialized with another model meanwhile.
        if !Arc::ptr_eq(guard.schema(), &schema) {
            if let Err(e) = guard.schema().validate_inputs(inputs) {
                drop(guard);
                self.inner.lock_stats().get_mut().record_schema_error();
                return Err(e);
            }
        }

        let started = Instant::now();
        let result = guard.forward(inputs).and_then(|outputs| {
            guard.schema().validate_outputs(&outputs)?;
            Ok(outputs)
        });
        let busy = started.elapsed();
        let index = guard.index();
        drop(guard);

        let mut stats = self.inner.lock_stats();
        match &result {
            Ok(_) => stats.get_mut().record_success(busy, waited),
            Err(e) => {
                stats.get_mut().record_evaluation_error(busy, waited);
                warn!(slot = index, error = %e, "forward pass failed");
            }
        }
        result
    }

    /// Release every replica. Idempotent.
    ///
    /// Callers waiting for a slot fail with `PoolClosed`. A forward pass
    /// already running finishes, and its replica is dropped when it does.
    pub fn shutdown(&self) {
        let slots = {
            let mut avail = self.inner.lock_avail();
            if avail.state != PoolState::Ready {
                return;
            }
            avail.state = PoolState::Closed;
            avail.idle.clear();
            avail.schema = None;
            avail.device = None;
            std::mem::take(&mut avail.slots)
        };
        self.inner.slot_freed.notify_all();

        let running = slots.iter().filter(|s| Arc::strong_count(s) > 1).count();
        let released = slots.len();
        drop(slots);
        info!(released, running, "pool closed");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.inner.lock_avail().state
    }

    /// Number of slots, or 0 unless the pool is ready.
    pub fn pool_size(&self) -> usize {
        self.inner.lock_avail().slots.len()
    }

    /// Number of slots not currently serving an evaluation.
    pub fn idle_slots(&self) -> usize {
        self.inner.lock_avail().idle.len()
    }

    /// Number of forward passes currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// The loaded node schema, if the pool is ready.
    pub fn schema(&self) -> Option<Arc<NodeSchema>> {
        self.inner.lock_avail().schema.clone()
    }

    /// Device the replicas are loaded on, if the pool is ready.
    pub fn device(&self) -> Option<Device> {
        self.inner.lock_avail().device.clone()
    }

    /// Name of the engine this pool loads replicas with.
    pub fn engine_name(&self) -> &'static str {
        self.inner.engine.name()
    }

    /// Snapshot of the statistics for the current run.
    pub fn stats(&self) -> EvaluationStats {
        self.inner.lock_stats().snapshot()
    }

    /// Start a new run: zero every counter and restart the clock.
    pub fn reset_stats(&self) {
        self.inner.lock_stats().reset();
    }
}

impl fmt::Debug for EvaluationPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let avail = self.inner.lock_avail();
        f.debug_struct("EvaluationPool")
            .field("engine", &self.inner.engine.name())
            .field("state", &avail.state)
            .field("pool_size", &avail.slots.len())
            .field("idle", &avail.idle.len())
            .finish()
    }
}
