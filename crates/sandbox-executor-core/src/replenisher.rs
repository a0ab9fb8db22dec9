//! Background loop that tops every runtime's warm pool back up to its
//! configured target size after containers are consumed or evicted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::pool::PoolManager;

pub struct ReplenisherConfig {
    pub interval: Duration,
}

impl Default for ReplenisherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Each tick compares every known runtime's current member count against
/// its target and creates the difference. A runtime that fails to reach
/// target this tick is simply retried next tick — there is no per-tick
/// retry loop, matching the original replenisher's "continue on failure
/// without retrying within the same tick" behavior.
pub struct Replenisher {
    pool: Arc<PoolManager>,
    config: ReplenisherConfig,
}

impl Replenisher {
    pub fn new(pool: Arc<PoolManager>, config: ReplenisherConfig) -> Self {
        Self { pool, config }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    /// Runs a single replenish pass over every known runtime. Exposed so
    /// ops tooling and tests can drive one tick deterministically instead
    /// of waiting on the spawned loop's interval.
    pub async fn run_once(&self) {
        for runtime in self.pool.known_runtimes().await {
            let target = self.pool.target(runtime).await;
            if target == 0 {
                continue;
            }
            let created = self.pool.warm_up(runtime, target).await;
            if created > 0 {
                debug!(?runtime, created, target, "replenished pool");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ContainerEngine;
    use crate::types::Runtime;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        created: AtomicUsize,
    }

    #[async_trait]
    impl ContainerEngine for CountingEngine {
        async fn create_container(&self, _runtime: Runtime) -> crate::error::SandboxResult<String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("c{n}"))
        }
        async fn remove_container(&self, _id: &str) -> crate::error::SandboxResult<()> {
            Ok(())
        }
        async fn health_check(&self, _id: &str) -> crate::error::SandboxResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn replenish_tops_up_to_target_after_a_removal() {
        let engine = Arc::new(CountingEngine {
            created: AtomicUsize::new(0),
        });
        let pool = Arc::new(PoolManager::new(engine));
        pool.warm_up(Runtime::Python311, 3).await;
        let victim = pool.status(Runtime::Python311).await.container_ids[0].clone();
        pool.remove(Runtime::Python311, &victim).await;
        assert_eq!(pool.status(Runtime::Python311).await.total, 2);

        let replenisher = Replenisher::new(pool.clone(), ReplenisherConfig::default());
        replenisher.run_once().await;

        assert_eq!(pool.status(Runtime::Python311).await.total, 3);
    }

    #[tokio::test]
    async fn a_runtime_with_no_target_is_left_alone() {
        let engine = Arc::new(CountingEngine {
            created: AtomicUsize::new(0),
        });
        let pool = Arc::new(PoolManager::new(engine));
        let replenisher = Replenisher::new(pool.clone(), ReplenisherConfig::default());
        replenisher.run_once().await;
        assert_eq!(pool.status(Runtime::Python311).await.total, 0);
    }
}
