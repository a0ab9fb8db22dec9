//! Error taxonomy for the sandbox execution engine.
//!
//! Mirrors the exception hierarchy of the service this crate reimplements:
//! validation and rate-limit errors short-circuit before any worker is
//! touched, dispatcher errors surface only once every candidate provider has
//! been tried, and background-loop failures never propagate into a request
//! path — they are logged and retried on the next tick instead.

use thiserror::Error;

use crate::types::ProviderKind;

pub type SandboxResult<T> = Result<T, SandboxError>;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("invalid execution request: {0}")]
    Validation(String),

    #[error("rate limit exceeded for caller")]
    RateLimited,

    #[error("provider {0:?} is not registered")]
    ProviderNotRegistered(ProviderKind),

    #[error("no registered provider could execute the request: {last_error}")]
    ProviderNotAvailable {
        tried: Vec<ProviderKind>,
        last_error: String,
    },

    #[error("execution exceeded its {limit_ms}ms timeout")]
    ExecutionTimeout { limit_ms: u64, execution_id: String },

    #[error("resource limit exceeded: {resource} (limit {limit}, requested {actual})")]
    ResourceLimit {
        resource: String,
        limit: f64,
        actual: f64,
    },

    #[error("worker/container error: {0}")]
    Worker(String),

    #[error("warm pool internal error: {0}")]
    Internal(String),
}

impl SandboxError {
    /// Worker/container-engine failures (Docker API errors, bad exec exit
    /// paths) are mapped through this constructor so every call site carries
    /// the same variant shape.
    pub fn worker(err: impl std::fmt::Display) -> Self {
        SandboxError::Worker(err.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        SandboxError::Internal(err.to_string())
    }
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        SandboxError::Worker(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_not_available_message_includes_last_error() {
        let err = SandboxError::ProviderNotAvailable {
            tried: vec![ProviderKind::LocalDocker],
            last_error: "container create failed".to_string(),
        };
        assert!(err.to_string().contains("container create failed"));
    }

    #[test]
    fn validation_error_carries_message() {
        let err = SandboxError::Validation("code cannot be empty".to_string());
        assert_eq!(
            err.to_string(),
            "invalid execution request: code cannot be empty"
        );
    }

    #[test]
    fn worker_constructor_stringifies_source() {
        let err = SandboxError::worker("exec create failed: no such container");
        match err {
            SandboxError::Worker(msg) => assert!(msg.contains("no such container")),
            other => panic!("expected Worker, got {other:?}"),
        }
    }
}
