//! Client Facade: the single entry point callers use instead of talking to
//! the registry or a provider directly.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SandboxResult;
use crate::registry::ProviderRegistry;
use crate::types::{ExecutionRequest, ExecutionResult, HealthStatus, ProviderKind, Runtime};

/// Wraps a [`ProviderRegistry`] and either forwards to the dispatcher (with
/// fallback) or directly to one provider (without fallback), depending on
/// a construction-time flag.
pub struct Client {
    registry: Arc<ProviderRegistry>,
    default_provider: ProviderKind,
    enable_fallback: bool,
}

impl Client {
    pub fn new(registry: Arc<ProviderRegistry>, default_provider: ProviderKind, enable_fallback: bool) -> Self {
        Self {
            registry,
            default_provider,
            enable_fallback,
        }
    }

    pub async fn execute(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        if self.enable_fallback {
            self.registry.execute_with_fallback(request).await
        } else {
            let provider = self.registry.get(request.preferred_provider.unwrap_or(self.default_provider))?;
            provider.execute(request).await
        }
    }

    /// Convenience wrapper applying the language-specific default entry
    /// point, the same shortcut the original client's `execute_python`/
    /// `execute_node`/`execute_go` methods provide.
    pub async fn execute_python(&self, code: impl Into<String>) -> SandboxResult<ExecutionResult> {
        let request = ExecutionRequest::new(code, Runtime::Python311)?;
        self.execute(request).await
    }

    pub async fn execute_node(&self, code: impl Into<String>) -> SandboxResult<ExecutionResult> {
        let request = ExecutionRequest::new(code, Runtime::Node20)?;
        self.execute(request).await
    }

    pub async fn execute_go(&self, code: impl Into<String>) -> SandboxResult<ExecutionResult> {
        let request = ExecutionRequest::new(code, Runtime::Go121)?;
        self.execute(request).await
    }

    pub async fn health_check(&self, provider: ProviderKind) -> SandboxResult<HealthStatus> {
        self.registry.get(provider)?.health_check().await
    }

    pub async fn health_check_all(&self) -> HashMap<ProviderKind, SandboxResult<HealthStatus>> {
        let mut results = HashMap::new();
        for kind in self.registry.get_available_providers() {
            let provider = self.registry.get_or_none(kind);
            if let Some(provider) = provider {
                results.insert(kind, provider.health_check().await);
            }
        }
        results
    }

    pub async fn warm_up(&self, provider: ProviderKind, runtime: Runtime, count: usize) -> SandboxResult<usize> {
        self.registry.get(provider)?.warm_up(runtime, count).await
    }

    pub fn get_available_providers(&self) -> Vec<ProviderKind> {
        self.registry.get_available_providers()
    }

    pub fn is_provider_available(&self, provider: ProviderKind) -> bool {
        self.registry.is_registered(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::providers::Provider;
    use crate::types::ExecutorMetrics;
    use async_trait::async_trait;
    use chrono::Utc;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::LocalDocker
        }

        async fn execute(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
            Ok(ExecutionResult {
                execution_id: request.execution_id,
                success: true,
                stdout: request.entry_point,
                stderr: String::new(),
                exit_code: 0,
                execution_time_ms: 0.0,
                queue_time_ms: 0.0,
                cold_start: false,
                provider: ProviderKind::LocalDocker,
                container_id: None,
                memory_used_mb: None,
                cpu_time_ms: None,
                started_at: Utc::now(),
                completed_at: None,
            })
        }

        async fn warm_up(&self, _runtime: Runtime, _count: usize) -> SandboxResult<usize> {
            Ok(0)
        }

        async fn health_check(&self) -> SandboxResult<HealthStatus> {
            Ok(HealthStatus {
                healthy: true,
                provider: ProviderKind::LocalDocker,
                message: String::new(),
                pool_size: 0,
                available_containers: 0,
                busy_containers: 0,
                last_check: Utc::now(),
                checks: HashMap::new(),
            })
        }

        async fn cleanup(&self) -> SandboxResult<()> {
            Ok(())
        }

        async fn metrics(&self) -> ExecutorMetrics {
            ExecutorMetrics::new(ProviderKind::LocalDocker)
        }
    }

    #[tokio::test]
    async fn execute_python_applies_the_python_entry_point_default() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register(Arc::new(EchoProvider));
        registry.set_default(ProviderKind::LocalDocker).await;
        let client = Client::new(registry, ProviderKind::LocalDocker, true);

        let result = client.execute_python("print(1)").await.unwrap();
        assert_eq!(result.stdout, "main.py");
    }

    #[tokio::test]
    async fn no_fallback_client_errors_on_unregistered_provider() {
        let registry = Arc::new(ProviderRegistry::new());
        let client = Client::new(registry, ProviderKind::LocalDocker, false);
        let request = ExecutionRequest::new("1", Runtime::Python311).unwrap();
        let err = client.execute(request).await.unwrap_err();
        assert!(matches!(err, SandboxError::ProviderNotRegistered(_)));
    }
}
