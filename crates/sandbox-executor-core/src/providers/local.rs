//! Local Provider: executes requests in a warm pool of Docker containers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use bollard::container::{Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use chrono::Utc;
use futures::StreamExt;
use tracing::{info, instrument, warn};

use crate::config::Config as ServiceConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::metrics::MetricsCollector;
use crate::output::OutputBuffer;
use crate::pool::{ContainerEngine, PoolManager};
use crate::providers::Provider;
use crate::types::{
    ExecutionRequest, ExecutionResult, ExecutorMetrics, HealthStatus, ProviderKind, Runtime,
};
use crate::worker::WorkerHandle;

/// The idle-forever command every warm container is started with. Health
/// probes and process-kill-on-reset both treat this as the one process that
/// must never be targeted.
const SENTINEL_COMMAND: &str = "sleep infinity";

/// Engine implementation backing [`PoolManager`] with real Docker
/// containers via `bollard`.
pub struct BollardEngine {
    docker: Docker,
    config: ServiceConfig,
}

impl BollardEngine {
    pub fn connect(config: ServiceConfig) -> SandboxResult<Self> {
        let docker = if config.docker_host.is_empty() {
            Docker::connect_with_local_defaults()
        } else {
            Docker::connect_with_http(&config.docker_host, config.docker_connect_timeout_secs, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| SandboxError::worker(format!("docker connect failed: {e}")))?;
        Ok(Self { docker, config })
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn create_container(&self, runtime: Runtime) -> SandboxResult<String> {
        let image = self
            .config
            .runtime_images
            .get(runtime.docker_image())
            .cloned()
            .unwrap_or_else(|| runtime.docker_image().to_string());

        let host_config = bollard::models::HostConfig {
            network_mode: Some(self.config.docker_network.clone()),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([("/tmp".to_string(), "rw,size=64m".to_string())])),
            pids_limit: Some(50),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            nano_cpus: Some((self.config.default_cpu_cores * 1_000_000_000.0) as i64),
            memory: Some((self.config.default_memory_mb as i64) * 1024 * 1024),
            ..Default::default()
        };

        let labels = HashMap::from([
            ("sandbox.executor".to_string(), "true".to_string()),
            ("sandbox.runtime".to_string(), runtime.docker_image().to_string()),
        ]);

        let options = CreateContainerOptions::<String> {
            name: format!("sandbox-{}", uuid::Uuid::new_v4()),
            ..Default::default()
        };
        let config = ContainerConfig {
            image: Some(image),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), SENTINEL_COMMAND.to_string()]),
            host_config: Some(host_config),
            labels: Some(labels),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::worker(format!("create_container failed: {e}")))?;
        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| SandboxError::worker(format!("start_container failed: {e}")))?;
        Ok(created.id)
    }

    async fn remove_container(&self, container_id: &str) -> SandboxResult<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::worker(format!("remove_container failed: {e}")))?;
        Ok(())
    }

    async fn health_check(&self, container_id: &str) -> SandboxResult<bool> {
        match run_exec(&self.docker, container_id, "echo health", Duration::from_secs(5)).await {
            Ok((exit_code, _, _)) => Ok(exit_code == 0),
            Err(_) => Ok(false),
        }
    }
}

fn exec_command(runtime: Runtime, entry_point: &str) -> String {
    match runtime.language() {
        "python" => format!("python {entry_point}"),
        "node" => format!("node {entry_point}"),
        "go" => format!("go run {entry_point}"),
        "rust" => format!("rustc {entry_point} -o /tmp/code/a.out && /tmp/code/a.out"),
        "java" => "javac Main.java && java Main".to_string(),
        _ => format!("cat {entry_point}"),
    }
}

/// Writes `content` into the container at `/tmp/code/<name>` via a
/// base64-wrapped shell command, avoiding any dependency on a `tar`-based
/// copy API and keeping the write atomic from the shell's point of view.
async fn write_file(docker: &Docker, container_id: &str, name: &str, content: &str) -> SandboxResult<()> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(content);
    let cmd = format!("mkdir -p /tmp/code && echo '{encoded}' | base64 -d > /tmp/code/{name}");
    let (exit_code, _, stderr) = run_exec(docker, container_id, &cmd, Duration::from_secs(10)).await?;
    if exit_code != 0 {
        return Err(SandboxError::worker(format!(
            "writing {name} into container failed: {stderr}"
        )));
    }
    Ok(())
}

/// Runs `command` via `sh -c` inside the container and waits for it to
/// finish, demuxing stdout/stderr. Used for the health probe and file
/// writes, where the full output is small and a bounded `OutputBuffer`
/// isn't needed.
async fn run_exec(
    docker: &Docker,
    container_id: &str,
    command: &str,
    timeout: Duration,
) -> SandboxResult<(i64, String, String)> {
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| SandboxError::worker(format!("create_exec failed: {e}")))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let run = async {
        if let StartExecResults::Attached { mut output, .. } =
            docker.start_exec(&exec.id, None).await.map_err(|e| {
                SandboxError::worker(format!("start_exec failed: {e}"))
            })?
        {
            while let Some(Ok(msg)) = output.next().await {
                match msg {
                    bollard::container::LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                    bollard::container::LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    _ => {}
                }
            }
        }
        Ok::<(), SandboxError>(())
    };

    tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| SandboxError::ExecutionTimeout {
            limit_ms: timeout.as_millis() as u64,
            execution_id: container_id.to_string(),
        })??;

    let inspect = docker
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| SandboxError::worker(format!("inspect_exec failed: {e}")))?;
    let exit_code = inspect.exit_code.unwrap_or(-1);

    Ok((
        exit_code,
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

/// Demuxed, bounded exec used for the user's actual code run: output is
/// capped by [`OutputBuffer`] rather than collected into an unbounded
/// `Vec`.
async fn run_exec_bounded(
    docker: &Docker,
    container_id: &str,
    command: &str,
    timeout: Duration,
    output: OutputBuffer,
) -> SandboxResult<i64> {
    let exec = docker
        .create_exec(
            container_id,
            CreateExecOptions {
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| SandboxError::worker(format!("create_exec failed: {e}")))?;

    let drain = {
        let output = output.clone();
        let docker = docker.clone();
        let exec_id = exec.id.clone();
        async move {
            if let StartExecResults::Attached { mut output: stream, .. } =
                docker.start_exec(&exec_id, None).await.map_err(|e| {
                    SandboxError::worker(format!("start_exec failed: {e}"))
                })?
            {
                while let Some(Ok(msg)) = stream.next().await {
                    match msg {
                        bollard::container::LogOutput::StdOut { message } => {
                            output.write_stdout(&message)?;
                        }
                        bollard::container::LogOutput::StdErr { message } => {
                            output.write_stderr(&message)?;
                        }
                        _ => {}
                    }
                }
            }
            Ok::<(), SandboxError>(())
        }
    };

    // On a deadline, the drain task is abandoned rather than aborted
    // mid-write; `OutputBuffer::into_strings` at the call site falls back to
    // locking if this clone is still alive when the caller reads it.
    match tokio::time::timeout(timeout, drain).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            return Err(SandboxError::ExecutionTimeout {
                limit_ms: timeout.as_millis() as u64,
                execution_id: container_id.to_string(),
            })
        }
    }

    let inspect = docker
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| SandboxError::worker(format!("inspect_exec failed: {e}")))?;
    Ok(inspect.exit_code.unwrap_or(-1))
}

/// Kills every user process in the container other than the idle sentinel,
/// and clears the previous run's files, before the container is handed
/// back to the pool as warm.
async fn reset_container(docker: &Docker, container_id: &str) -> SandboxResult<()> {
    // BusyBox/dash `sh` has no PCRE negative lookahead, so the sentinel is
    // excluded by matching its command line rather than by a `pkill -v`.
    let cmd = format!(
        "rm -rf /tmp/code && for p in $(pgrep -f . 2>/dev/null); do c=$(tr '\\0' ' ' < /proc/$p/cmdline 2>/dev/null); case \"$c\" in *'{SENTINEL_COMMAND}'*) ;; *) kill -9 $p 2>/dev/null ;; esac; done; true"
    );
    let _ = run_exec(docker, container_id, &cmd, Duration::from_secs(5)).await;
    Ok(())
}

pub struct LocalProvider {
    pool: Arc<PoolManager>,
    engine: Arc<BollardEngine>,
    metrics: MetricsCollector,
    config: ServiceConfig,
}

impl LocalProvider {
    pub fn new(config: ServiceConfig) -> SandboxResult<Self> {
        let engine = Arc::new(BollardEngine::connect(config.clone())?);
        let pool = Arc::new(PoolManager::new(engine.clone() as Arc<dyn ContainerEngine>));
        Ok(Self {
            pool,
            engine,
            metrics: MetricsCollector::new(ProviderKind::LocalDocker),
            config,
        })
    }

    pub fn pool(&self) -> Arc<PoolManager> {
        self.pool.clone()
    }

    pub fn engine(&self) -> Arc<BollardEngine> {
        self.engine.clone()
    }

    async fn acquire_or_cold_create(
        &self,
        runtime: Runtime,
    ) -> SandboxResult<(WorkerHandle, bool)> {
        if let Some(handle) = self.pool.acquire(runtime).await {
            return Ok((handle, false));
        }
        let container_id = self.engine.create_container(runtime).await?;
        let mut handle = WorkerHandle::new(container_id, runtime);
        handle.mark_busy();
        Ok((handle, true))
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalDocker
    }

    async fn initialize(&self) -> SandboxResult<()> {
        self.pool.warm_up(Runtime::Python311, self.config.default_pool_size).await;
        self.pool.warm_up(Runtime::Node20, self.config.default_pool_size).await;
        info!("local provider initialized");
        Ok(())
    }

    #[instrument(skip(self, request), fields(execution_id = %request.execution_id))]
    async fn execute(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        request.validate()?;
        let started_at = Utc::now();
        let queue_start = Instant::now();

        let (handle, cold_start) = self.acquire_or_cold_create(request.runtime).await?;
        let queue_time_ms = queue_start.elapsed().as_secs_f64() * 1000.0;

        let run_result = self.run_in_container(&handle, &request).await;
        let exec_time_ms_start = Instant::now();

        let (success, exit_code, stdout, stderr, timed_out) = match &run_result {
            Ok((code, out, err)) => (*code == 0, *code, out.clone(), err.clone(), false),
            Err(SandboxError::ExecutionTimeout { .. }) => (false, 124, String::new(), String::new(), true),
            Err(_) => (false, -1, String::new(), String::new(), false),
        };

        // A worker that ran past its deadline is torn down outright, not
        // reset and handed back — a process still running inside it cannot
        // be trusted to leave the container reusable. Every other outcome
        // either joins the pool for the first time (cold start) or is
        // returned to it (pool hit).
        if timed_out {
            self.pool.remove(request.runtime, &handle.container_id).await;
        } else {
            reset_container(self.engine.docker(), &handle.container_id).await.ok();
            if cold_start {
                self.pool.add(request.runtime, handle.clone()).await;
            } else {
                self.pool.release(request.runtime, &handle.container_id, success).await;
            }
        }

        let execution_time_ms = exec_time_ms_start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record(
            execution_time_ms,
            success,
            timed_out,
            cold_start,
            !cold_start,
            None,
            None,
        );

        if let Err(err) = run_result {
            if !matches!(err, SandboxError::ExecutionTimeout { .. }) {
                return Err(err);
            }
        }

        Ok(ExecutionResult {
            execution_id: request.execution_id.clone(),
            success,
            stdout,
            stderr,
            exit_code,
            execution_time_ms,
            queue_time_ms,
            cold_start,
            provider: ProviderKind::LocalDocker,
            container_id: Some(handle.container_id),
            memory_used_mb: None,
            cpu_time_ms: None,
            started_at,
            completed_at: Some(Utc::now()),
        })
    }

    async fn warm_up(&self, runtime: Runtime, count: usize) -> SandboxResult<usize> {
        Ok(self.pool.warm_up(runtime, count).await)
    }

    async fn health_check(&self) -> SandboxResult<HealthStatus> {
        let status = self.pool.status(Runtime::Python311).await;
        Ok(HealthStatus {
            healthy: true,
            provider: ProviderKind::LocalDocker,
            message: "ok".to_string(),
            pool_size: status.total,
            available_containers: status.available,
            busy_containers: status.busy,
            last_check: Utc::now(),
            checks: HashMap::new(),
        })
    }

    async fn cleanup(&self) -> SandboxResult<()> {
        self.pool.cleanup_all().await;
        Ok(())
    }

    async fn metrics(&self) -> ExecutorMetrics {
        self.metrics.snapshot()
    }
}

impl LocalProvider {
    async fn run_in_container(
        &self,
        handle: &WorkerHandle,
        request: &ExecutionRequest,
    ) -> SandboxResult<(i64, String, String)> {
        let docker = self.engine.docker();
        write_file(docker, &handle.container_id, &request.entry_point, &request.code).await?;
        for (name, content) in &request.files {
            write_file(docker, &handle.container_id, name, content).await?;
        }

        let command = format!(
            "cd /tmp/code && {}",
            exec_command(request.runtime, &request.entry_point)
        );
        let output = OutputBuffer::new(self.config.max_output_bytes);
        let timeout = Duration::from_millis(request.timeout_ms);

        let exit_code = match run_exec_bounded(docker, &handle.container_id, &command, timeout, output.clone()).await {
            Ok(code) => code,
            // 137 (128 + SIGKILL) is the service's out-of-memory/resource-limit sentinel.
            Err(SandboxError::ResourceLimit { .. }) => 137,
            Err(err) => {
                warn!(container_id = %handle.container_id, %err, "exec failed");
                return Err(err);
            }
        };
        let (stdout, stderr) = output.into_strings();
        Ok((exit_code, stdout, stderr))
    }
}
