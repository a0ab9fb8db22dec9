//! Provider Registry & Dispatcher: holds every registered provider and
//! tries a candidate list in order on `execute_with_fallback`, short-
//! circuiting on the first success and surfacing the last error only once
//! every candidate has been exhausted.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{SandboxError, SandboxResult};
use crate::providers::Provider;
use crate::types::{ExecutionRequest, ExecutionResult, ProviderKind};

pub struct ProviderRegistry {
    providers: DashMap<ProviderKind, Arc<dyn Provider>>,
    default_provider: Mutex<Option<ProviderKind>>,
    fallback_chain: Mutex<Vec<ProviderKind>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
            default_provider: Mutex::new(None),
            fallback_chain: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn unregister(&self, kind: ProviderKind) {
        self.providers.remove(&kind);
    }

    pub fn is_registered(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn get(&self, kind: ProviderKind) -> SandboxResult<Arc<dyn Provider>> {
        self.providers
            .get(&kind)
            .map(|e| e.value().clone())
            .ok_or(SandboxError::ProviderNotRegistered(kind))
    }

    pub fn get_or_none(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.get(&kind).map(|e| e.value().clone())
    }

    pub async fn set_default(&self, kind: ProviderKind) {
        *self.default_provider.lock().await = Some(kind);
    }

    pub async fn get_default(&self) -> Option<ProviderKind> {
        *self.default_provider.lock().await
    }

    pub async fn set_fallback_chain(&self, chain: Vec<ProviderKind>) {
        *self.fallback_chain.lock().await = chain;
    }

    pub async fn get_fallback_chain(&self) -> Vec<ProviderKind> {
        self.fallback_chain.lock().await.clone()
    }

    pub fn get_available_providers(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|e| *e.key()).collect()
    }

    /// Builds the candidate list `[preferred?, default, *fallback_chain]`,
    /// deduplicated and filtered to providers that are both registered and
    /// currently healthy, then tries each in order. Returns the first
    /// success; if every candidate is unavailable or raises, returns
    /// `ProviderNotAvailable` carrying the candidates tried and the last
    /// error seen.
    pub async fn execute_with_fallback(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        let candidates = self.candidate_list(request.preferred_provider).await;
        if candidates.is_empty() {
            return Err(SandboxError::ProviderNotAvailable {
                tried: vec![],
                last_error: "no providers registered".to_string(),
            });
        }

        let mut tried = Vec::new();
        let mut last_error = String::new();
        for kind in candidates {
            let Some(provider) = self.get_or_none(kind) else {
                continue;
            };
            match provider.health_check().await {
                Ok(status) if !status.healthy => {
                    warn!(?kind, "skipping unhealthy provider");
                    tried.push(kind);
                    last_error = status.message;
                    continue;
                }
                Err(err) => {
                    warn!(?kind, %err, "health check failed, skipping provider");
                    tried.push(kind);
                    last_error = err.to_string();
                    continue;
                }
                Ok(_) => {}
            }

            tried.push(kind);
            match provider.execute(request.clone()).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    warn!(?kind, %err, "provider execution failed, trying next candidate");
                    last_error = err.to_string();
                }
            }
        }

        Err(SandboxError::ProviderNotAvailable { tried, last_error })
    }

    async fn candidate_list(&self, preferred: Option<ProviderKind>) -> Vec<ProviderKind> {
        let mut candidates = Vec::new();
        if let Some(p) = preferred {
            candidates.push(p);
        }
        if let Some(d) = self.get_default().await {
            candidates.push(d);
        }
        candidates.extend(self.get_fallback_chain().await);

        let mut seen = std::collections::HashSet::new();
        candidates
            .into_iter()
            .filter(|k| self.is_registered(*k) && seen.insert(*k))
            .collect()
    }

    pub async fn initialize_all(&self) -> SandboxResult<()> {
        for entry in self.providers.iter() {
            entry.value().initialize().await?;
        }
        Ok(())
    }

    pub async fn cleanup_all(&self) {
        for entry in self.providers.iter() {
            if let Err(err) = entry.value().cleanup().await {
                warn!(kind = ?entry.key(), %err, "provider cleanup failed");
            }
        }
    }

    /// Clears every registration, the default, and the fallback chain.
    /// Used between test cases so state does not leak across them.
    pub async fn reset(&self) {
        self.providers.clear();
        *self.default_provider.lock().await = None;
        self.fallback_chain.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutorMetrics, HealthStatus, Runtime};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubProvider {
        kind: ProviderKind,
        healthy: AtomicBool,
        fail_execute: AtomicBool,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new(kind: ProviderKind) -> Self {
            Self {
                kind,
                healthy: AtomicBool::new(true),
                fail_execute: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn execute(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_execute.load(Ordering::SeqCst) {
                return Err(SandboxError::worker("stub failure"));
            }
            Ok(ExecutionResult {
                execution_id: request.execution_id,
                success: true,
                stdout: "ok".to_string(),
                stderr: String::new(),
                exit_code: 0,
                execution_time_ms: 1.0,
                queue_time_ms: 0.0,
                cold_start: false,
                provider: self.kind,
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
                healthy: self.healthy.load(Ordering::SeqCst),
                provider: self.kind,
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
            ExecutorMetrics::new(self.kind)
        }
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest::new("print(1)", Runtime::Python311).unwrap()
    }

    #[tokio::test]
    async fn dispatch_uses_the_default_provider_when_none_preferred() {
        let registry = ProviderRegistry::new();
        let stub = Arc::new(StubProvider::new(ProviderKind::LocalDocker));
        registry.register(stub);
        registry.set_default(ProviderKind::LocalDocker).await;

        let result = registry.execute_with_fallback(request()).await.unwrap();
        assert_eq!(result.provider, ProviderKind::LocalDocker);
    }

    #[tokio::test]
    async fn dispatch_falls_back_when_the_default_is_unhealthy() {
        let registry = ProviderRegistry::new();
        let primary = Arc::new(StubProvider::new(ProviderKind::LocalDocker));
        primary.healthy.store(false, Ordering::SeqCst);
        let fallback = Arc::new(StubProvider::new(ProviderKind::AwsLambda));

        registry.register(primary);
        registry.register(fallback);
        registry.set_default(ProviderKind::LocalDocker).await;
        registry.set_fallback_chain(vec![ProviderKind::AwsLambda]).await;

        let result = registry.execute_with_fallback(request()).await.unwrap();
        assert_eq!(result.provider, ProviderKind::AwsLambda);
    }

    #[tokio::test]
    async fn dispatch_falls_back_after_an_execution_error() {
        let registry = ProviderRegistry::new();
        let primary = Arc::new(StubProvider::new(ProviderKind::LocalDocker));
        primary.fail_execute.store(true, Ordering::SeqCst);
        let fallback = Arc::new(StubProvider::new(ProviderKind::AwsLambda));

        registry.register(primary);
        registry.register(fallback);
        registry.set_default(ProviderKind::LocalDocker).await;
        registry.set_fallback_chain(vec![ProviderKind::AwsLambda]).await;

        let result = registry.execute_with_fallback(request()).await.unwrap();
        assert_eq!(result.provider, ProviderKind::AwsLambda);
    }

    #[tokio::test]
    async fn dispatch_errors_when_every_candidate_is_exhausted() {
        let registry = ProviderRegistry::new();
        let primary = Arc::new(StubProvider::new(ProviderKind::LocalDocker));
        primary.fail_execute.store(true, Ordering::SeqCst);
        registry.register(primary);
        registry.set_default(ProviderKind::LocalDocker).await;

        let err = registry.execute_with_fallback(request()).await.unwrap_err();
        assert!(matches!(err, SandboxError::ProviderNotAvailable { .. }));
    }

    #[tokio::test]
    async fn preferred_provider_is_tried_before_the_default() {
        let registry = ProviderRegistry::new();
        let default = Arc::new(StubProvider::new(ProviderKind::LocalDocker));
        let preferred = Arc::new(StubProvider::new(ProviderKind::AwsLambda));
        registry.register(default);
        registry.register(preferred);
        registry.set_default(ProviderKind::LocalDocker).await;

        let mut req = request();
        req.preferred_provider = Some(ProviderKind::AwsLambda);
        let result = registry.execute_with_fallback(req).await.unwrap();
        assert_eq!(result.provider, ProviderKind::AwsLambda);
    }

    #[tokio::test]
    async fn reset_clears_registrations_default_and_fallback_chain() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider::new(ProviderKind::LocalDocker)));
        registry.set_default(ProviderKind::LocalDocker).await;
        registry.set_fallback_chain(vec![ProviderKind::AwsLambda]).await;

        registry.reset().await;

        assert!(registry.get_available_providers().is_empty());
        assert!(registry.get_default().await.is_none());
        assert!(registry.get_fallback_chain().await.is_empty());
    }
}
