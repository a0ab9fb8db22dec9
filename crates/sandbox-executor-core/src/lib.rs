//! Warm-pool sandboxed code execution engine.
//!
//! A [`client::Client`] submits [`types::ExecutionRequest`]s through a
//! [`registry::ProviderRegistry`], which dispatches to a registered
//! [`providers::Provider`] — a [`providers::local::LocalProvider`] backed by a
//! warm pool of Docker containers ([`pool::PoolManager`], [`worker::WorkerHandle`]),
//! or a remote cloud function / cloud job provider.

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod output;
pub mod pool;
pub mod providers;
pub mod registry;
pub mod replenisher;
pub mod types;
pub mod worker;

pub use client::Client;
pub use config::Config;
pub use error::{SandboxError, SandboxResult};
pub use output::OutputBuffer;
pub use pool::PoolManager;
pub use providers::Provider;
pub use registry::ProviderRegistry;
pub use types::{
    ExecutionRequest, ExecutionResult, ExecutorMetrics, HealthStatus, PoolStatus, ProviderKind,
    Runtime,
};
pub use worker::WorkerHandle;
