//! Evaluation statistics for one run of a pool.
//!
//! [`EvaluationStats`] counts finished evaluations, failures by kind and the
//! time spent in forward passes and waiting for slots. The pool resets the
//! counters on every (re)initialization and whenever a caller starts a new
//! run through [`EvaluationPool::reset_stats`](crate::EvaluationPool::reset_stats).

use serde::Serialize;
use std::time::{Duration, Instant};

/// Counters for one evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationStats {
    /// Every `evaluate` call that got past the pool-state check.
    pub total_evaluations: u64,
    /// Calls that returned outputs.
    pub successful: u64,
    /// Calls rejected because the inputs did not match the schema.
    pub schema_errors: u64,
    /// Calls whose forward pass failed.
    pub evaluation_errors: u64,
    /// Highest number of forward passes observed running at once.
    pub peak_in_flight: usize,
    /// Total time spent inside forward passes.
    pub busy_time: Duration,
    /// Total time callers spent blocked waiting for an idle slot.
    pub wait_time: Duration,
    /// Wall-clock time since the counters were last reset.
    pub elapsed: Duration,
}

impl EvaluationStats {
    /// Failed calls of either kind.
    pub fn error_count(&self) -> u64 {
        self.schema_errors + self.evaluation_errors
    }

    /// Fraction of calls that failed, in `[0.0, 1.0]`.
    pub fn error_rate(&self) -> f64 {
        if self.total_evaluations == 0 {
            return 0.0;
        }
        self.error_count() as f64 / self.total_evaluations as f64
    }

    /// Completed evaluations per second of wall-clock time.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_evaluations as f64 / secs
    }

    /// Mean forward-pass time over the calls that reached a slot.
    pub fn mean_forward_time(&self) -> Duration {
        let passes = self.successful + self.evaluation_errors;
        if passes == 0 {
            return Duration::ZERO;
        }
        self.busy_time.div_f64(passes as f64)
    }

    pub(crate) fn record_success(&mut self, busy: Duration, wait: Duration) {
        self.total_evaluations += 1;
        self.successful += 1;
        self.busy_time += busy;
        self.wait_time += wait;
    }

    pub(crate) fn record_evaluation_error(&mut self, busy: Duration, wait: Duration) {
        self.total_evaluations += 1;
        self.evaluation_errors += 1;
        self.busy_time += busy;
        self.wait_time += wait;
    }

    pub(crate) fn record_schema_error(&mut self) {
        self.total_evaluations += 1;
        self.schema_errors += 1;
    }

    pub(crate) fn update_peak(&mut self, in_flight: usize) {
        if in_flight > self.peak_in_flight {
            self.peak_in_flight = in_flight;
        }
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Evaluations: {} total ({} ok, {} schema errors, {} engine errors, {:.1}% error rate) \
             in {:.2}ms, {:.1} eval/s, mean forward {:.2}ms, slot wait {:.2}ms, peak {} in flight",
            self.total_evaluations,
            self.successful,
            self.schema_errors,
            self.evaluation_errors,
            self.error_rate() * 100.0,
            self.elapsed.as_secs_f64() * 1000.0,
            self.throughput(),
            self.mean_forward_time().as_secs_f64() * 1000.0,
            self.wait_time.as_secs_f64() * 1000.0,
            self.peak_in_flight,
        )
    }
}

/// Running counters plus the instant the current run started.
#[derive(Debug)]
pub(crate) struct StatsCollector {
    current: EvaluationStats,
    started: Instant,
}

impl StatsCollector {
    pub(crate) fn new() -> Self {
        Self {
            current: EvaluationStats::default(),
            started: Instant::now(),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn get_mut(&mut self) -> &mut EvaluationStats {
        &mut self.current
    }

    pub(crate) fn snapshot(&self) -> EvaluationStats {
        EvaluationStats {
            elapsed: self.started.elapsed(),
            ..self.current.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let s = EvaluationStats::default();
        assert_eq!(s.total_evaluations, 0);
        assert_eq!(s.error_rate(), 0.0);
        assert_eq!(s.throughput(), 0.0);
        assert_eq!(s.mean_forward_time(), Duration::ZERO);
    }

    #[test]
    fn test_error_rate() {
        let mut s = EvaluationStats::default();
        s.record_success(Duration::from_millis(10), Duration::ZERO);
        s.record_success(Duration::from_millis(10), Duration::ZERO);
        s.record_schema_error();
        s.record_evaluation_error(Duration::from_millis(4), Duration::from_millis(1));
        assert_eq!(s.total_evaluations, 4);
        assert_eq!(s.error_count(), 2);
        assert!((s.error_rate() - 0.5).abs() < 1e-9);
        assert_eq!(s.busy_time, Duration::from_millis(24));
        assert!((s.mean_forward_time().as_secs_f64() - 0.008).abs() < 1e-9);
    }

    #[test]
    fn test_mean_forward_time_past_u32_passes() {
        let s = EvaluationStats {
            successful: 1 << 32,
            busy_time: Duration::from_secs(1 << 32),
            ..Default::default()
        };
        assert!((s.mean_forward_time().as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput() {
        let s = EvaluationStats {
            total_evaluations: 100,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert!((s.throughput() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_peak_tracking() {
        let mut s = EvaluationStats::default();
        s.update_peak(2);
        s.update_peak(1);
        assert_eq!(s.peak_in_flight, 2);
        s.update_peak(3);
        assert_eq!(s.peak_in_flight, 3);
    }

    #[test]
    fn test_collector_reset() {
        let mut c = StatsCollector::new();
        c.get_mut().record_schema_error();
        assert_eq!(c.snapshot().total_evaluations, 1);
        c.reset();
        assert_eq!(c.snapshot().total_evaluations, 0);
    }

    #[test]
    fn test_summary() {
        let mut s = EvaluationStats::default();
        s.record_success(Duration::from_millis(5), Duration::ZERO);
        s.record_schema_error();
        let summary = s.summary();
        assert!(summary.contains("2 total"));
        assert!(summary.contains("1 ok"));
        assert!(summary.contains("1 schema errors"));
    }
}
