//! Cloud Job Provider: submits a one-shot batch job (e.g. a Cloud Run Job
//! or Azure Container Instance run-to-completion task) per execution and
//! polls until it finishes. Unlike the Cloud Function Provider there is no
//! pre-provisioned warm instance to hit, so every execution is a cold
//! start by construction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};
use crate::metrics::MetricsCollector;
use crate::providers::Provider;
use crate::types::{
    ExecutionRequest, ExecutionResult, ExecutorMetrics, HealthStatus, ProviderKind, Runtime,
};

#[derive(Debug, Clone)]
pub struct CloudJobConfig {
    pub submit_url: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

#[derive(Serialize)]
struct JobSubmission<'a> {
    code: &'a str,
    entry_point: &'a str,
    runtime: &'a str,
    memory_mb: u32,
    cpu_cores: f64,
}

#[derive(Deserialize)]
struct JobHandle {
    job_execution_id: String,
}

#[derive(Deserialize)]
struct JobStatus {
    done: bool,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

pub struct CloudJobProvider {
    client: reqwest::Client,
    config: CloudJobConfig,
    metrics: MetricsCollector,
    provider_kind: ProviderKind,
}

impl CloudJobProvider {
    pub fn new(config: CloudJobConfig, provider_kind: ProviderKind, enabled: bool) -> SandboxResult<Self> {
        if !enabled {
            return Err(SandboxError::ProviderNotRegistered(provider_kind));
        }
        let client = reqwest::Client::builder()
            .timeout(config.poll_timeout)
            .build()
            .map_err(|e| SandboxError::internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            config,
            metrics: MetricsCollector::new(provider_kind),
            provider_kind,
        })
    }

    async fn poll_until_done(&self, job_execution_id: &str, deadline: Instant) -> SandboxResult<JobStatus> {
        loop {
            let url = format!("{}/{}", self.config.submit_url, job_execution_id);
            let status: JobStatus = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| SandboxError::worker(format!("job status poll failed: {e}")))?
                .json()
                .await
                .map_err(|e| SandboxError::worker(format!("invalid job status response: {e}")))?;

            if status.done {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(SandboxError::ExecutionTimeout {
                    limit_ms: self.config.poll_timeout.as_millis() as u64,
                    execution_id: job_execution_id.to_string(),
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl Provider for CloudJobProvider {
    fn kind(&self) -> ProviderKind {
        self.provider_kind
    }

    async fn execute(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        request.validate()?;
        let started_at = Utc::now();
        let start = Instant::now();

        let submission = JobSubmission {
            code: &request.code,
            entry_point: &request.entry_point,
            runtime: request.runtime.docker_image(),
            memory_mb: request.memory_mb,
            cpu_cores: request.cpu_cores,
        };
        let handle: JobHandle = self
            .client
            .post(&self.config.submit_url)
            .json(&submission)
            .send()
            .await
            .map_err(|e| SandboxError::worker(format!("job submit failed: {e}")))?
            .json()
            .await
            .map_err(|e| SandboxError::worker(format!("invalid job submit response: {e}")))?;

        let deadline = Instant::now() + Duration::from_millis(request.timeout_ms);
        let status = self.poll_until_done(&handle.job_execution_id, deadline).await?;
        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let exit_code = status.exit_code.unwrap_or(-1);
        let success = exit_code == 0;

        self.metrics.record(execution_time_ms, success, false, true, false, None, None);

        Ok(ExecutionResult {
            execution_id: request.execution_id,
            success,
            stdout: status.stdout,
            stderr: status.stderr,
            exit_code,
            execution_time_ms,
            queue_time_ms: 0.0,
            cold_start: true,
            provider: self.provider_kind,
            container_id: Some(handle.job_execution_id),
            memory_used_mb: None,
            cpu_time_ms: None,
            started_at,
            completed_at: Some(Utc::now()),
        })
    }

    async fn warm_up(&self, _runtime: Runtime, _count: usize) -> SandboxResult<usize> {
        // One-shot batch jobs have nothing to pre-warm.
        Ok(0)
    }

    async fn health_check(&self) -> SandboxResult<HealthStatus> {
        let healthy = self
            .client
            .get(&self.config.submit_url)
            .send()
            .await
            .map(|r| r.status().is_success() || r.status().as_u16() == 405)
            .unwrap_or(false);
        Ok(HealthStatus {
            healthy,
            provider: self.provider_kind,
            message: if healthy { "ok".to_string() } else { "unreachable".to_string() },
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
        self.metrics.snapshot()
    }
}
