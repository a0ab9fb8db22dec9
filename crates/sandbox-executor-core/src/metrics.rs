//! Bounded execution-time ring buffer backing each provider's
//! [`ExecutorMetrics`](crate::types::ExecutorMetrics) snapshot.
//!
//! Percentiles are recomputed from the ring's current contents on every
//! read rather than maintained incrementally — at a 1000-sample cap a full
//! sort is cheap, and an exact p99 from the real sample set is worth more
//! than an approximation that drifts.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;

use crate::types::{ExecutorMetrics, ProviderKind};

const RING_CAPACITY: usize = 1000;

struct Inner {
    metrics: ExecutorMetrics,
    samples_ms: VecDeque<f64>,
}

/// Single-writer-per-provider metrics accumulator. Each provider owns one
/// `MetricsCollector`; nothing outside that provider ever mutates it.
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            inner: Mutex::new(Inner {
                metrics: ExecutorMetrics::new(provider),
                samples_ms: VecDeque::with_capacity(RING_CAPACITY),
            }),
        }
    }

    /// Records one completed (or timed-out) execution.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        duration_ms: f64,
        succeeded: bool,
        timed_out: bool,
        cold_start: bool,
        pool_hit: bool,
        memory_used_mb: Option<f64>,
        cpu_time_ms: Option<f64>,
    ) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");

        if inner.samples_ms.len() == RING_CAPACITY {
            inner.samples_ms.pop_front();
        }
        inner.samples_ms.push_back(duration_ms);

        let now = Utc::now();
        let m = &mut inner.metrics;
        m.total_executions += 1;
        // Mutually exclusive: a timeout is counted as a timeout, never also
        // as a plain failure, so successful + failed + timeout == total.
        if succeeded {
            m.successful_executions += 1;
        } else if timed_out {
            m.timeout_executions += 1;
        } else {
            m.failed_executions += 1;
        }
        if cold_start {
            m.cold_start_count += 1;
        } else {
            m.warm_start_count += 1;
        }
        if pool_hit {
            m.pool_hits += 1;
        } else {
            m.pool_misses += 1;
        }
        if let Some(mem) = memory_used_mb {
            m.total_memory_used_mb += mem;
        }
        if let Some(cpu) = cpu_time_ms {
            m.total_cpu_time_ms += cpu;
        }
        if m.first_execution_at.is_none() {
            m.first_execution_at = Some(now);
        }
        m.last_execution_at = Some(now);

        recompute_latency_stats(m, &inner.samples_ms);
    }

    pub fn snapshot(&self) -> ExecutorMetrics {
        self.inner.lock().expect("metrics mutex poisoned").metrics.clone()
    }
}

fn recompute_latency_stats(m: &mut ExecutorMetrics, samples: &VecDeque<f64>) {
    if samples.is_empty() {
        return;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("execution duration is never NaN"));

    let sum: f64 = sorted.iter().sum();
    m.avg_execution_time_ms = sum / sorted.len() as f64;
    m.min_execution_time_ms = sorted[0];
    m.max_execution_time_ms = sorted[sorted.len() - 1];
    m.p50_execution_time_ms = percentile(&sorted, 0.50);
    m.p95_execution_time_ms = percentile(&sorted, 0.95);
    m.p99_execution_time_ms = percentile(&sorted, 0.99);
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_timeout_is_counted_only_once_not_also_as_a_failure() {
        let c = MetricsCollector::new(ProviderKind::LocalDocker);
        c.record(5000.0, false, true, false, false, None, None);
        let m = c.snapshot();
        assert_eq!(m.timeout_executions, 1);
        assert_eq!(m.failed_executions, 0);
        assert_eq!(
            m.successful_executions + m.failed_executions + m.timeout_executions,
            m.total_executions
        );
    }

    #[test]
    fn first_record_sets_min_max_and_average_equal() {
        let c = MetricsCollector::new(ProviderKind::LocalDocker);
        c.record(12.0, true, false, true, false, None, None);
        let m = c.snapshot();
        assert_eq!(m.avg_execution_time_ms, 12.0);
        assert_eq!(m.min_execution_time_ms, 12.0);
        assert_eq!(m.max_execution_time_ms, 12.0);
        assert_eq!(m.total_executions, 1);
    }

    #[test]
    fn ring_buffer_drops_the_oldest_sample_past_capacity() {
        let c = MetricsCollector::new(ProviderKind::LocalDocker);
        for i in 0..RING_CAPACITY {
            c.record(i as f64, true, false, false, true, None, None);
        }
        // One more sample evicts the oldest (0.0), so the min should rise.
        c.record(5000.0, true, false, false, true, None, None);
        let m = c.snapshot();
        assert_eq!(m.min_execution_time_ms, 1.0);
        assert_eq!(m.total_executions, RING_CAPACITY as u64 + 1);
    }

    #[test]
    fn success_and_cold_start_ratios_reflect_recorded_executions() {
        let c = MetricsCollector::new(ProviderKind::LocalDocker);
        c.record(10.0, true, false, true, false, None, None);
        c.record(20.0, false, false, false, true, None, None);
        let m = c.snapshot();
        assert_eq!(m.success_rate(), 0.5);
        assert_eq!(m.cold_start_ratio(), 0.5);
        assert_eq!(m.pool_hit_ratio(), 0.5);
    }

    #[test]
    fn p99_of_a_uniform_sample_set_is_near_the_top() {
        let c = MetricsCollector::new(ProviderKind::LocalDocker);
        for i in 1..=100 {
            c.record(i as f64, true, false, false, true, None, None);
        }
        let m = c.snapshot();
        assert!(m.p99_execution_time_ms >= 98.0);
        assert!(m.p50_execution_time_ms >= 49.0 && m.p50_execution_time_ms <= 51.0);
    }
}
