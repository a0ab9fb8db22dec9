//! Background loop that probes idle warm containers and evicts the ones
//! that stop responding.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::pool::{ContainerEngine, PoolManager};
use crate::types::Runtime;

pub struct HealthMonitorConfig {
    pub interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Periodically probes every runtime's warm, non-busy containers and marks
/// the ones that fail their probe unhealthy before removing them. A single
/// bad probe (transient Docker hiccup, container mid-reset) is logged and
/// skipped rather than torn down — only a probe that actually fails the
/// engine's health check removes the container.
pub struct HealthMonitor {
    pool: Arc<PoolManager>,
    engine: Arc<dyn ContainerEngine>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        pool: Arc<PoolManager>,
        engine: Arc<dyn ContainerEngine>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            pool,
            engine,
            config,
        }
    }

    /// Spawns the monitor loop as a background task. The loop never exits
    /// on an error inside one tick — it logs and continues, the same way
    /// the warm pool's health checker does, so a transient Docker API
    /// failure never silently stops future probing.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    error!(%err, "health monitor tick failed");
                }
            }
        })
    }

    /// Runs a single probe pass over every known runtime. Exposed so ops
    /// tooling and tests can drive one tick deterministically instead of
    /// waiting on the spawned loop's interval.
    pub async fn run_once(&self) -> Result<(), crate::error::SandboxError> {
        for runtime in self.pool.known_runtimes().await {
            self.check_runtime(runtime).await;
        }
        Ok(())
    }

    async fn check_runtime(&self, runtime: Runtime) {
        for container_id in self.pool.probeable(runtime).await {
            match self.engine.health_check(&container_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(container_id = %container_id, ?runtime, "container failed health probe");
                    self.pool.mark_unhealthy(runtime, &container_id).await;
                    self.pool.remove(runtime, &container_id).await;
                }
                Err(err) => {
                    warn!(container_id = %container_id, %err, "health probe errored, skipping this tick");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ContainerEngine;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyEngine {
        fail_after: AtomicUsize,
    }

    #[async_trait]
    impl ContainerEngine for FlakyEngine {
        async fn create_container(&self, _runtime: Runtime) -> crate::error::SandboxResult<String> {
            Ok("c1".to_string())
        }
        async fn remove_container(&self, _id: &str) -> crate::error::SandboxResult<()> {
            Ok(())
        }
        async fn health_check(&self, _id: &str) -> crate::error::SandboxResult<bool> {
            let n = self.fail_after.fetch_sub(1, Ordering::SeqCst);
            Ok(n > 1)
        }
    }

    #[tokio::test]
    async fn a_failed_probe_removes_the_container() {
        let engine: Arc<dyn ContainerEngine> = Arc::new(FlakyEngine {
            fail_after: AtomicUsize::new(1),
        });
        let pool = Arc::new(PoolManager::new(engine.clone()));
        pool.warm_up(Runtime::Python311, 1).await;

        let monitor = HealthMonitor::new(pool.clone(), engine, HealthMonitorConfig::default());
        monitor.run_once().await.unwrap();

        let status = pool.status(Runtime::Python311).await;
        assert_eq!(status.total, 0);
    }
}
