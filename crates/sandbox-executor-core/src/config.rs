//! Ambient service configuration, loaded from environment variables under a
//! single `SANDBOX_` prefix (with an optional local `.env` file layered
//! underneath via `dotenvy`), mirroring the original service's
//! `pydantic_settings`-based `Settings` object.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SandboxError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Docker engine socket/URI. Empty string means "use the platform
    /// default" (`unix:///var/run/docker.sock` on Linux).
    pub docker_host: String,
    pub docker_network: String,
    pub docker_connect_timeout_secs: u64,

    pub default_pool_size: usize,
    pub max_container_age_secs: u64,
    pub max_container_idle_secs: u64,
    pub health_check_interval_secs: u64,
    pub replenish_interval_secs: u64,

    pub default_timeout_ms: u64,
    pub default_memory_mb: u32,
    pub default_cpu_cores: f64,
    pub max_concurrent_executions: usize,
    pub max_output_bytes: usize,

    pub default_provider: String,
    pub fallback_chain: Vec<String>,
    pub enable_aws_lambda: bool,
    pub enable_gcp_cloud_run: bool,
    pub enable_azure_container: bool,

    pub aws_region: Option<String>,
    pub aws_function_prefix: Option<String>,
    pub gcp_project_id: Option<String>,
    pub gcp_region: Option<String>,
    pub azure_resource_group: Option<String>,

    pub runtime_images: HashMap<String, String>,

    pub enable_tracing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_host: String::new(),
            docker_network: "none".to_string(),
            docker_connect_timeout_secs: 5,
            default_pool_size: 2,
            max_container_age_secs: 3600,
            max_container_idle_secs: 900,
            health_check_interval_secs: 30,
            replenish_interval_secs: 10,
            default_timeout_ms: 30_000,
            default_memory_mb: 256,
            default_cpu_cores: 0.5,
            max_concurrent_executions: 50,
            max_output_bytes: 1_048_576,
            default_provider: "local_docker".to_string(),
            fallback_chain: Vec::new(),
            enable_aws_lambda: false,
            enable_gcp_cloud_run: false,
            enable_azure_container: false,
            aws_region: None,
            aws_function_prefix: None,
            gcp_project_id: None,
            gcp_region: None,
            azure_resource_group: None,
            runtime_images: HashMap::new(),
            enable_tracing: true,
        }
    }
}

impl Config {
    /// Loads configuration from `SANDBOX_*` environment variables, with a
    /// `.env` file (if present in the working directory) loaded first via
    /// `dotenvy` so local development does not require exporting every
    /// variable by hand. Unset variables fall back to [`Config::default`].
    pub fn load() -> Result<Self, SandboxError> {
        let _ = dotenvy::dotenv();

        let builder = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("SANDBOX")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()
            .map_err(|e| SandboxError::internal(format!("config load failed: {e}")))?;

        // `config::Config::try_deserialize` fails on a totally empty
        // environment in some backends; fall back to defaults explicitly
        // rather than surfacing that as a startup error.
        match builder.try_deserialize::<PartialConfig>() {
            Ok(partial) => Ok(partial.into_config()),
            Err(_) => Ok(Config::default()),
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn replenish_interval(&self) -> Duration {
        Duration::from_secs(self.replenish_interval_secs)
    }
}

/// Mirrors [`Config`] but with every field optional, so environment
/// variables the caller never set simply fall through to the default
/// rather than failing deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PartialConfig {
    docker_host: Option<String>,
    docker_network: Option<String>,
    docker_connect_timeout_secs: Option<u64>,
    default_pool_size: Option<usize>,
    max_container_age_secs: Option<u64>,
    max_container_idle_secs: Option<u64>,
    health_check_interval_secs: Option<u64>,
    replenish_interval_secs: Option<u64>,
    default_timeout_ms: Option<u64>,
    default_memory_mb: Option<u32>,
    default_cpu_cores: Option<f64>,
    max_concurrent_executions: Option<usize>,
    max_output_bytes: Option<usize>,
    default_provider: Option<String>,
    fallback_chain: Option<Vec<String>>,
    enable_aws_lambda: Option<bool>,
    enable_gcp_cloud_run: Option<bool>,
    enable_azure_container: Option<bool>,
    aws_region: Option<String>,
    aws_function_prefix: Option<String>,
    gcp_project_id: Option<String>,
    gcp_region: Option<String>,
    azure_resource_group: Option<String>,
    enable_tracing: Option<bool>,
}

impl PartialConfig {
    fn into_config(self) -> Config {
        let base = Config::default();
        Config {
            docker_host: self.docker_host.unwrap_or(base.docker_host),
            docker_network: self.docker_network.unwrap_or(base.docker_network),
            docker_connect_timeout_secs: self
                .docker_connect_timeout_secs
                .unwrap_or(base.docker_connect_timeout_secs),
            default_pool_size: self.default_pool_size.unwrap_or(base.default_pool_size),
            max_container_age_secs: self
                .max_container_age_secs
                .unwrap_or(base.max_container_age_secs),
            max_container_idle_secs: self
                .max_container_idle_secs
                .unwrap_or(base.max_container_idle_secs),
            health_check_interval_secs: self
                .health_check_interval_secs
                .unwrap_or(base.health_check_interval_secs),
            replenish_interval_secs: self
                .replenish_interval_secs
                .unwrap_or(base.replenish_interval_secs),
            default_timeout_ms: self.default_timeout_ms.unwrap_or(base.default_timeout_ms),
            default_memory_mb: self.default_memory_mb.unwrap_or(base.default_memory_mb),
            default_cpu_cores: self.default_cpu_cores.unwrap_or(base.default_cpu_cores),
            max_concurrent_executions: self
                .max_concurrent_executions
                .unwrap_or(base.max_concurrent_executions),
            max_output_bytes: self.max_output_bytes.unwrap_or(base.max_output_bytes),
            default_provider: self.default_provider.unwrap_or(base.default_provider),
            fallback_chain: self.fallback_chain.unwrap_or(base.fallback_chain),
            enable_aws_lambda: self.enable_aws_lambda.unwrap_or(base.enable_aws_lambda),
            enable_gcp_cloud_run: self
                .enable_gcp_cloud_run
                .unwrap_or(base.enable_gcp_cloud_run),
            enable_azure_container: self
                .enable_azure_container
                .unwrap_or(base.enable_azure_container),
            aws_region: self.aws_region.or(base.aws_region),
            aws_function_prefix: self.aws_function_prefix.or(base.aws_function_prefix),
            gcp_project_id: self.gcp_project_id.or(base.gcp_project_id),
            gcp_region: self.gcp_region.or(base.gcp_region),
            azure_resource_group: self.azure_resource_group.or(base.azure_resource_group),
            runtime_images: base.runtime_images,
            enable_tracing: self.enable_tracing.unwrap_or(base.enable_tracing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_documented_defaults() {
        let c = Config::default();
        assert_eq!(c.default_pool_size, 2);
        assert_eq!(c.default_timeout_ms, 30_000);
        assert_eq!(c.default_provider, "local_docker");
        assert!(!c.enable_aws_lambda);
    }

    #[test]
    fn health_check_interval_converts_seconds_to_duration() {
        let c = Config::default();
        assert_eq!(c.health_check_interval(), Duration::from_secs(30));
    }
}
