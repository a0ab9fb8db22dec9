//! A single warm container and its lifecycle state machine.
//!
//! State transitions: `Creating -> Warm -> Busy -> Resetting -> Warm`, with
//! any state able to fall to `Unhealthy -> Terminating` on a failed health
//! check or container crash.

use std::time::{Duration, Instant};

use crate::types::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Creating,
    Warm,
    Busy,
    Resetting,
    Unhealthy,
    Terminating,
}

/// A warm Docker container tracked by the [`crate::pool::PoolManager`].
///
/// Every field here is mutated only while the owning pool's per-runtime lock
/// is held, or — for the duration of one execution — by the caller that has
/// exclusively checked the handle out via [`crate::pool::PoolManager::acquire`].
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub container_id: String,
    pub runtime: Runtime,
    pub state: WorkerState,

    created_at: Instant,
    last_used_at: Instant,

    pub execution_count: u32,
    pub consecutive_failures: u32,
}

/// A container is recycled once it crosses either threshold: age, in case of
/// slow memory/fd leaks across many resets, or idle time, to avoid paying to
/// keep an unused container warm forever.
const MAX_AGE: Duration = Duration::from_secs(3600);
const MAX_IDLE: Duration = Duration::from_secs(900);

impl WorkerHandle {
    pub fn new(container_id: impl Into<String>, runtime: Runtime) -> Self {
        let now = Instant::now();
        Self {
            container_id: container_id.into(),
            runtime,
            state: WorkerState::Creating,
            created_at: now,
            last_used_at: now,
            execution_count: 0,
            consecutive_failures: 0,
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_time(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub fn mark_warm(&mut self) {
        self.state = WorkerState::Warm;
        self.last_used_at = Instant::now();
    }

    pub fn mark_busy(&mut self) {
        self.state = WorkerState::Busy;
    }

    pub fn mark_resetting(&mut self) {
        self.state = WorkerState::Resetting;
    }

    pub fn mark_unhealthy(&mut self) {
        self.state = WorkerState::Unhealthy;
    }

    pub fn mark_terminating(&mut self) {
        self.state = WorkerState::Terminating;
    }

    /// Records a completed execution's outcome: resets the idle clock and
    /// tracks consecutive failures, which feed into [`Self::should_replace`].
    pub fn record_execution(&mut self, succeeded: bool) {
        self.execution_count += 1;
        self.last_used_at = Instant::now();
        if succeeded {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    /// A container is replaced instead of reset-and-returned-to-the-pool
    /// once it has aged out, sat idle too long, failed a health check, or
    /// accumulated enough consecutive failures across enough executions to
    /// suggest a degraded runtime rather than one bad user program.
    pub fn should_replace(&self) -> bool {
        self.age() > MAX_AGE
            || self.idle_time() > MAX_IDLE
            || self.state == WorkerState::Unhealthy
            || (self.execution_count >= 10 && self.consecutive_failures >= 3)
    }
}
