//! Warm container pool, one slice of state per [`Runtime`].
//!
//! Concurrency discipline: each runtime's member list is guarded by its own
//! `tokio::sync::Mutex`, so creating containers for `python:3.11` never
//! blocks an `acquire` against `node:20`. A single global mutex guards the
//! per-runtime *target size* table, since growing one runtime's target must
//! never race with another runtime's replenish decision reading a stale
//! total. `acquire` never blocks: an empty pool returns `None` immediately
//! and the caller is expected to cold-create, rather than wait on a
//! container another task might release.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::SandboxResult;
use crate::types::{PoolStatus, Runtime};
use crate::worker::{WorkerHandle, WorkerState};

/// Abstraction over the container engine a [`PoolManager`] creates and tears
/// down workers through. `providers::local::BollardEngine` is the real
/// implementation; tests use an in-memory fake so the pool's concurrency
/// logic is exercised without a Docker daemon.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Creates and starts a container for `runtime`, returning its id.
    async fn create_container(&self, runtime: Runtime) -> SandboxResult<String>;

    /// Stops and removes a container. Errors are logged by the caller and
    /// otherwise swallowed — a failed removal must not stop the pool from
    /// making progress.
    async fn remove_container(&self, container_id: &str) -> SandboxResult<()>;

    /// Lightweight liveness probe (e.g. a no-op exec) used by the Health
    /// Monitor.
    async fn health_check(&self, container_id: &str) -> SandboxResult<bool>;
}

struct RuntimePool {
    members: Mutex<Vec<WorkerHandle>>,
}

impl RuntimePool {
    fn new() -> Self {
        Self {
            members: Mutex::new(Vec::new()),
        }
    }
}

/// Owns every runtime's warm container set and the target-size table that
/// the Replenisher reads to decide how many containers to top up.
pub struct PoolManager {
    engine: Arc<dyn ContainerEngine>,
    pools: DashMap<Runtime, Arc<RuntimePool>>,
    targets: Mutex<HashMap<Runtime, usize>>,
}

impl PoolManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            pools: DashMap::new(),
            targets: Mutex::new(HashMap::new()),
        }
    }

    fn runtime_pool(&self, runtime: Runtime) -> Arc<RuntimePool> {
        self.pools
            .entry(runtime)
            .or_insert_with(|| Arc::new(RuntimePool::new()))
            .clone()
    }

    /// Raises `runtime`'s target size to at least `count` and creates the
    /// shortfall in parallel, mirroring the original warm-pool manager's
    /// `target = max(current, count)` rule. Returns the number of
    /// containers successfully created.
    pub async fn warm_up(&self, runtime: Runtime, count: usize) -> usize {
        {
            let mut targets = self.targets.lock().await;
            let entry = targets.entry(runtime).or_insert(0);
            *entry = (*entry).max(count);
        }

        let pool = self.runtime_pool(runtime);
        let deficit = {
            let members = pool.members.lock().await;
            count.saturating_sub(members.len())
        };
        if deficit == 0 {
            return 0;
        }

        let mut created = Vec::with_capacity(deficit);
        for _ in 0..deficit {
            created.push(self.create_one(runtime, &pool));
        }
        let results = futures::future::join_all(created).await;
        let ok = results.into_iter().filter(|r| r.is_ok()).count();
        info!(?runtime, requested = deficit, created = ok, "warm_up");
        ok
    }

    async fn create_one(&self, runtime: Runtime, pool: &Arc<RuntimePool>) -> SandboxResult<()> {
        let container_id = self.engine.create_container(runtime).await?;
        let mut handle = WorkerHandle::new(container_id, runtime);
        handle.mark_warm();
        pool.members.lock().await.push(handle);
        Ok(())
    }

    /// Adds one freshly created container to `runtime`'s pool without
    /// touching the target size (used when a caller cold-creates after a
    /// miss and wants the container to join the warm set once it resets).
    pub async fn add(&self, runtime: Runtime, mut handle: WorkerHandle) {
        handle.mark_warm();
        let pool = self.runtime_pool(runtime);
        pool.members.lock().await.push(handle);
    }

    /// Scans for the first `Warm` member, flips it to `Busy`, and returns a
    /// copy of its handle. Returns `None` without waiting if no member is
    /// currently warm — the caller is expected to cold-create in that case.
    pub async fn acquire(&self, runtime: Runtime) -> Option<WorkerHandle> {
        let pool = self.runtime_pool(runtime);
        let mut members = pool.members.lock().await;
        let idx = members.iter().position(|h| h.state == WorkerState::Warm)?;
        members[idx].mark_busy();
        debug!(?runtime, container_id = %members[idx].container_id, "pool hit");
        Some(members[idx].clone())
    }

    /// Returns a checked-out container to the pool. If `succeeded` is
    /// false the failure is recorded before the replace decision is made,
    /// so a container that has just tipped over the consecutive-failure
    /// threshold is torn down immediately rather than handed out again.
    pub async fn release(&self, runtime: Runtime, container_id: &str, succeeded: bool) {
        let pool = self.runtime_pool(runtime);
        let should_remove = {
            let mut members = pool.members.lock().await;
            match members.iter_mut().find(|h| h.container_id == container_id) {
                Some(handle) => {
                    handle.record_execution(succeeded);
                    if handle.should_replace() {
                        handle.mark_terminating();
                        true
                    } else {
                        handle.mark_resetting();
                        handle.mark_warm();
                        false
                    }
                }
                None => {
                    warn!(container_id, "release of unknown container ignored");
                    false
                }
            }
        };
        if should_remove {
            self.remove(runtime, container_id).await;
        }
    }

    /// Removes a container from its pool and tears it down via the engine.
    /// Engine failures are logged, not propagated — a stuck removal must
    /// not take down the pool's bookkeeping with it.
    pub async fn remove(&self, runtime: Runtime, container_id: &str) {
        let pool = self.runtime_pool(runtime);
        {
            let mut members = pool.members.lock().await;
            members.retain(|h| h.container_id != container_id);
        }
        if let Err(err) = self.engine.remove_container(container_id).await {
            warn!(container_id, %err, "failed to remove container");
        }
    }

    /// Marks a member unhealthy in place; the Health Monitor calls this
    /// after a failed probe, and a subsequent [`Self::remove`] evicts it.
    pub async fn mark_unhealthy(&self, runtime: Runtime, container_id: &str) {
        let pool = self.runtime_pool(runtime);
        let mut members = pool.members.lock().await;
        if let Some(handle) = members.iter_mut().find(|h| h.container_id == container_id) {
            handle.mark_unhealthy();
        }
    }

    pub async fn target(&self, runtime: Runtime) -> usize {
        self.targets
            .lock()
            .await
            .get(&runtime)
            .copied()
            .unwrap_or(0)
    }

    pub async fn status(&self, runtime: Runtime) -> PoolStatus {
        let pool = self.runtime_pool(runtime);
        let members = pool.members.lock().await;
        let busy = members
            .iter()
            .filter(|h| h.state == WorkerState::Busy)
            .count();
        PoolStatus {
            runtime,
            total: members.len(),
            available: members.len() - busy,
            busy,
            container_ids: members.iter().map(|h| h.container_id.clone()).collect(),
        }
    }

    /// Container ids eligible for a health probe: not already busy,
    /// unhealthy, or mid-teardown.
    pub async fn probeable(&self, runtime: Runtime) -> Vec<String> {
        let pool = self.runtime_pool(runtime);
        let members = pool.members.lock().await;
        members
            .iter()
            .filter(|h| {
                matches!(
                    h.state,
                    WorkerState::Warm | WorkerState::Creating | WorkerState::Resetting
                )
            })
            .map(|h| h.container_id.clone())
            .collect()
    }

    /// Runtimes this pool currently has a target or tracked members for,
    /// used by the Health Monitor and Replenisher to know what to iterate.
    pub async fn known_runtimes(&self) -> Vec<Runtime> {
        self.targets.lock().await.keys().copied().collect()
    }

    /// Tears every container in every pool down. Called on shutdown.
    pub async fn cleanup_all(&self) {
        let runtimes: Vec<Runtime> = self.pools.iter().map(|e| *e.key()).collect();
        for runtime in runtimes {
            let pool = self.runtime_pool(runtime);
            let ids: Vec<String> = {
                let members = pool.members.lock().await;
                members.iter().map(|h| h.container_id.clone()).collect()
            };
            for id in ids {
                self.remove(runtime, &id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEngine {
        counter: AtomicUsize,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                counter: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn create_container(&self, _runtime: Runtime) -> SandboxResult<String> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("fake-{n}"))
        }

        async fn remove_container(&self, _container_id: &str) -> SandboxResult<()> {
            Ok(())
        }

        async fn health_check(&self, _container_id: &str) -> SandboxResult<bool> {
            Ok(true)
        }
    }

    fn manager() -> PoolManager {
        PoolManager::new(Arc::new(FakeEngine::new()))
    }

    #[tokio::test]
    async fn warm_up_creates_the_requested_count() {
        let pool = manager();
        let created = pool.warm_up(Runtime::Python311, 3).await;
        assert_eq!(created, 3);
        let status = pool.status(Runtime::Python311).await;
        assert_eq!(status.total, 3);
        assert_eq!(status.available, 3);
    }

    #[tokio::test]
    async fn warm_up_only_creates_the_deficit_on_a_second_call() {
        let pool = manager();
        pool.warm_up(Runtime::Python311, 2).await;
        let created = pool.warm_up(Runtime::Python311, 3).await;
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn add_joins_a_cold_created_container_to_the_pool_as_warm() {
        let pool = manager();
        let handle = WorkerHandle::new("cold-1", Runtime::Python311);
        pool.add(Runtime::Python311, handle).await;

        let status = pool.status(Runtime::Python311).await;
        assert_eq!(status.total, 1);
        assert_eq!(status.available, 1);

        let acquired = pool.acquire(Runtime::Python311).await.unwrap();
        assert_eq!(acquired.container_id, "cold-1");
    }

    #[tokio::test]
    async fn acquire_on_empty_pool_returns_none_immediately() {
        let pool = manager();
        let result = pool.acquire(Runtime::Node20).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn acquire_flips_a_warm_member_to_busy() {
        let pool = manager();
        pool.warm_up(Runtime::Python311, 1).await;
        let handle = pool.acquire(Runtime::Python311).await.unwrap();
        assert_eq!(handle.state, WorkerState::Busy);

        let status = pool.status(Runtime::Python311).await;
        assert_eq!(status.busy, 1);
        assert_eq!(status.available, 0);
    }

    #[tokio::test]
    async fn release_after_success_returns_container_to_warm() {
        let pool = manager();
        pool.warm_up(Runtime::Python311, 1).await;
        let handle = pool.acquire(Runtime::Python311).await.unwrap();
        pool.release(Runtime::Python311, &handle.container_id, true)
            .await;

        let status = pool.status(Runtime::Python311).await;
        assert_eq!(status.available, 1);
        assert_eq!(status.busy, 0);
    }

    #[tokio::test]
    async fn release_past_the_failure_threshold_removes_the_container() {
        let pool = manager();
        pool.warm_up(Runtime::Python311, 1).await;
        let handle = pool.acquire(Runtime::Python311).await.unwrap();
        let id = handle.container_id.clone();
        pool.release(Runtime::Python311, &id, true).await;

        for succeeded in [true, true, true, true, true, true, false, false, false] {
            pool.acquire(Runtime::Python311).await;
            pool.release(Runtime::Python311, &id, succeeded).await;
        }

        let status = pool.status(Runtime::Python311).await;
        assert_eq!(status.total, 0);
    }

    #[tokio::test]
    async fn concurrent_acquire_never_hands_out_the_same_container_twice() {
        let pool = Arc::new(manager());
        pool.warm_up(Runtime::Python311, 5).await;

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(
                async move { pool.acquire(Runtime::Python311).await },
            ));
        }
        let mut ids = std::collections::HashSet::new();
        for task in tasks {
            let handle = task.await.unwrap().expect("pool had enough members");
            assert!(ids.insert(handle.container_id));
        }
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn mark_unhealthy_is_visible_through_status_after_removal() {
        let pool = manager();
        pool.warm_up(Runtime::Go121, 1).await;
        let id = pool.status(Runtime::Go121).await.container_ids[0].clone();
        pool.mark_unhealthy(Runtime::Go121, &id).await;
        pool.remove(Runtime::Go121, &id).await;
        let status = pool.status(Runtime::Go121).await;
        assert_eq!(status.total, 0);
    }
}
