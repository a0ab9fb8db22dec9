//! Data model shared by every provider: requests, results, health, and
//! metrics snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SandboxError;

/// Execution environment a request targets.
///
/// `language`/`version`/`docker_image` mirror the accessor split of the
/// provider-facing runtime enum this type is modeled on, where an unknown
/// runtime tag resolved to a `language:version` image rather than failing;
/// here the enum is closed, so every variant carries its own exhaustively
/// matched image tag instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    Python311,
    Python312,
    Node20,
    Node22,
    Go121,
    Go122,
    RustLatest,
    Java17,
    Java21,
}

impl Runtime {
    pub fn language(self) -> &'static str {
        match self {
            Runtime::Python311 | Runtime::Python312 => "python",
            Runtime::Node20 | Runtime::Node22 => "node",
            Runtime::Go121 | Runtime::Go122 => "go",
            Runtime::RustLatest => "rust",
            Runtime::Java17 | Runtime::Java21 => "java",
        }
    }

    pub fn version(self) -> &'static str {
        match self {
            Runtime::Python311 => "3.11",
            Runtime::Python312 => "3.12",
            Runtime::Node20 => "20",
            Runtime::Node22 => "22",
            Runtime::Go121 => "1.21",
            Runtime::Go122 => "1.22",
            Runtime::RustLatest => "latest",
            Runtime::Java17 => "17",
            Runtime::Java21 => "21",
        }
    }

    /// Docker image tag used to create a warm container for this runtime.
    pub fn docker_image(self) -> &'static str {
        match self {
            Runtime::Python311 => "python:3.11-slim",
            Runtime::Python312 => "python:3.12-slim",
            Runtime::Node20 => "node:20-slim",
            Runtime::Node22 => "node:22-slim",
            Runtime::Go121 => "golang:1.21-alpine",
            Runtime::Go122 => "golang:1.22-alpine",
            Runtime::RustLatest => "rust:latest",
            Runtime::Java17 => "openjdk:17-slim",
            Runtime::Java21 => "openjdk:21-slim",
        }
    }

    /// Default filename a provider writes submitted code to when the
    /// request does not specify one.
    pub fn default_entry_point(self) -> &'static str {
        match self.language() {
            "python" => "main.py",
            "node" => "main.js",
            "go" => "main.go",
            "rust" => "main.rs",
            "java" => "Main.java",
            _ => "main",
        }
    }
}

/// Execution provider backing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    LocalDocker,
    AwsLambda,
    GcpCloudRun,
    AzureContainer,
}

/// A request to execute a snippet of code in an isolated environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub execution_id: String,
    pub code: String,
    pub runtime: Runtime,

    pub entry_point: String,
    pub timeout_ms: u64,
    pub memory_mb: u32,
    pub cpu_cores: f64,

    pub stdin: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,

    pub workspace_id: Option<String>,
    pub user_id: Option<String>,

    pub preferred_provider: Option<ProviderKind>,
    pub allow_cold_start: bool,

    #[serde(default)]
    pub files: HashMap<String, String>,
}

impl ExecutionRequest {
    /// Builds a request with the same defaults as the service this crate
    /// models (30s timeout, 256MB, half a CPU core), validating it the same
    /// way the original does, then assigns a fresh `execution_id` that is
    /// threaded through every downstream result, metric, and log line for
    /// this request.
    pub fn new(code: impl Into<String>, runtime: Runtime) -> Result<Self, SandboxError> {
        let req = Self {
            execution_id: Uuid::new_v4().to_string(),
            code: code.into(),
            entry_point: runtime.default_entry_point().to_string(),
            runtime,
            timeout_ms: 30_000,
            memory_mb: 256,
            cpu_cores: 0.5,
            stdin: None,
            environment: HashMap::new(),
            workspace_id: None,
            user_id: None,
            preferred_provider: None,
            allow_cold_start: true,
            files: HashMap::new(),
        };
        req.validate()?;
        Ok(req)
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.code.is_empty() {
            return Err(SandboxError::Validation("code cannot be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(SandboxError::Validation(
                "timeout_ms must be positive".into(),
            ));
        }
        if self.memory_mb == 0 {
            return Err(SandboxError::Validation(
                "memory_mb must be positive".into(),
            ));
        }
        if self.cpu_cores <= 0.0 {
            return Err(SandboxError::Validation(
                "cpu_cores must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a single execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,

    pub execution_time_ms: f64,
    pub queue_time_ms: f64,
    pub cold_start: bool,

    pub provider: ProviderKind,
    pub container_id: Option<String>,

    pub memory_used_mb: Option<f64>,
    pub cpu_time_ms: Option<f64>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Total time including queue wait, the same derived field the original
    /// result type exposes.
    pub fn total_time_ms(&self) -> f64 {
        self.queue_time_ms + self.execution_time_ms
    }
}

/// Health snapshot for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub provider: ProviderKind,
    pub message: String,

    pub pool_size: usize,
    pub available_containers: usize,
    pub busy_containers: usize,

    pub last_check: DateTime<Utc>,
    pub checks: HashMap<String, bool>,
}

/// Warm-pool occupancy for one runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub runtime: Runtime,
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub container_ids: Vec<String>,
}

impl PoolStatus {
    /// Fraction of the pool currently busy, `0.0` for an empty pool.
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.busy as f64 / self.total as f64
        }
    }
}

/// Rolling execution metrics for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorMetrics {
    pub provider: ProviderKind,

    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub timeout_executions: u64,

    pub avg_execution_time_ms: f64,
    pub min_execution_time_ms: f64,
    pub max_execution_time_ms: f64,
    pub p50_execution_time_ms: f64,
    pub p95_execution_time_ms: f64,
    pub p99_execution_time_ms: f64,

    pub cold_start_count: u64,
    pub warm_start_count: u64,

    pub pool_hits: u64,
    pub pool_misses: u64,

    pub total_memory_used_mb: f64,
    pub total_cpu_time_ms: f64,

    pub first_execution_at: Option<DateTime<Utc>>,
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl ExecutorMetrics {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            timeout_executions: 0,
            avg_execution_time_ms: 0.0,
            min_execution_time_ms: 0.0,
            max_execution_time_ms: 0.0,
            p50_execution_time_ms: 0.0,
            p95_execution_time_ms: 0.0,
            p99_execution_time_ms: 0.0,
            cold_start_count: 0,
            warm_start_count: 0,
            pool_hits: 0,
            pool_misses: 0,
            total_memory_used_mb: 0.0,
            total_cpu_time_ms: 0.0,
            first_execution_at: None,
            last_execution_at: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.successful_executions as f64 / self.total_executions as f64
        }
    }

    pub fn cold_start_ratio(&self) -> f64 {
        let total = self.cold_start_count + self.warm_start_count;
        if total == 0 {
            0.0
        } else {
            self.cold_start_count as f64 / total as f64
        }
    }

    pub fn pool_hit_ratio(&self) -> f64 {
        let total = self.pool_hits + self.pool_misses;
        if total == 0 {
            0.0
        } else {
            self.pool_hits as f64 / total as f64
        }
    }
}
