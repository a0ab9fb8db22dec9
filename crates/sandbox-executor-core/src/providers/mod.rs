//! The contract every execution provider satisfies, plus the concrete
//! providers themselves.

pub mod cloud_function;
pub mod cloud_job;
pub mod local;

use async_trait::async_trait;

use crate::error::SandboxResult;
use crate::types::{ExecutionRequest, ExecutionResult, ExecutorMetrics, HealthStatus, ProviderKind, Runtime};

/// Implemented by every execution backend: a warm Docker pool, a cloud
/// function invoker, or a one-shot cloud job runner. The registry and
/// client facade depend only on this trait, never on a concrete provider.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Runs async setup (e.g. pinging the Docker daemon, pre-warming a
    /// pool). Providers with nothing to do on startup can leave the
    /// default no-op implementation in place.
    async fn initialize(&self) -> SandboxResult<()> {
        Ok(())
    }

    async fn execute(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult>;

    /// Pre-warms `count` instances of `runtime`, returning the number
    /// actually prepared.
    async fn warm_up(&self, runtime: Runtime, count: usize) -> SandboxResult<usize>;

    async fn health_check(&self) -> SandboxResult<HealthStatus>;

    /// Releases every resource this provider holds. Called during service
    /// shutdown.
    async fn cleanup(&self) -> SandboxResult<()>;

    async fn metrics(&self) -> ExecutorMetrics;
}
