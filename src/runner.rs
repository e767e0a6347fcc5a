//! Batch runs: many evaluations fed to one pool from worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::info;

use crate::error::{EvalPoolError, Result};
use crate::pool::{EvaluationPool, EvaluationStats, PoolState};
use crate::tensor::TensorMap;

/// Outcome of a batch run.
#[derive(Debug)]
pub struct BatchReport {
    /// One result per request, in request order.
    pub results: Vec<Result<TensorMap>>,
    /// Pool statistics at the end of the run.
    pub stats: EvaluationStats,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Drives a list of requests through a pool from a fixed number of worker
/// threads. Execution order across workers is unspecified.
#[derive(Debug)]
pub struct BatchRunner<'a> {
    pool: &'a EvaluationPool,
    threads: usize,
}

impl<'a> BatchRunner<'a> {
    /// A runner with one worker thread per pool slot.
    pub fn new(pool: &'a EvaluationPool) -> Self {
        Self {
            pool,
            threads: pool.pool_size().max(1),
        }
    }

    /// Set the number of worker threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Evaluate every request and collect the results.
    ///
    /// Resets the pool statistics first, so the report covers this run only.
    /// Per-request failures are reported in [`BatchReport::results`]; the
    /// run itself only fails if it cannot start.
    pub fn run(&self, requests: &[TensorMap]) -> Result<BatchReport> {
        if self.threads == 0 {
            return Err(EvalPoolError::config("worker thread count must be at least 1"));
        }
        if self.pool.state() != PoolState::Ready {
            return Err(EvalPoolError::PoolClosed);
        }

        self.pool.reset_stats();
        let workers = self.threads.min(requests.len());
        info!(requests = requests.len(), workers, "starting batch run");

        let next = AtomicUsize::new(0);
        let next = &next;
        let pool = self.pool;
        let mut slots: Vec<Option<Result<TensorMap>>> =
            (0..requests.len()).map(|_| None).collect();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(request) = requests.get(i) else {
                                break;
                            };
                            done.push((i, pool.evaluate(request)));
                        }
                        done
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, result) in done {
                            slots[i] = Some(result);
                        }
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
        });

        let results: Vec<Result<TensorMap>> = slots
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(EvalPoolError::evaluation("request was not processed")))
            })
            .collect();
        let stats = self.pool.stats();
        info!("{}", stats.summary());

        Ok(BatchReport { results, stats })
    }
}
