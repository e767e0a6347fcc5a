//! evalpool-rs: pooled, thread-safe model evaluation sessions.
//!
//! This crate manages a fixed-size pool of model replicas loaded through an
//! inference [`Engine`](engine::Engine). Callers hand the pool a map of named
//! input tensors and get back a map of named output tensors. Up to N
//! evaluations run in parallel, one per replica, and a replica is never used
//! by two callers at once.
//!
//! # Features
//!
//! - **native**: Load models through the C evaluation bridge
//!   (`libevalbridge`). Set `EVALBRIDGE_LIB_DIR` to the directory holding
//!   the library.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use evalpool_rs::{DenseEngine, Device, EvaluationPool, TensorMap};
//!
//! // Load four replicas
//! let pool = EvaluationPool::new(Arc::new(DenseEngine::new()));
//! pool.initialize(4, "model.json", Device::cpu())?;
//!
//! // Evaluate from as many threads as you like
//! let inputs = TensorMap::new().with_flat("features", &[4], vec![0.1, 0.2, 0.3, 0.4])?;
//! let outputs = pool.evaluate(&inputs)?;
//! println!("{}", pool.stats().summary());
//!
//! pool.shutdown();
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod runner;
pub mod schema;
pub mod tensor;

// Re-export commonly used types
pub use engine::{DenseEngine, Device, Engine, ModelHandle};
pub use error::{ErrorKind, EvalPoolError, Result};
pub use pool::{EvaluationPool, EvaluationStats, PoolState};
pub use runner::{BatchReport, BatchRunner};
pub use schema::{NodeGroup, NodeSchema};
pub use tensor::{TensorData, TensorMap};
