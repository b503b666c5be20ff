use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

/// Failures surfaced to an individual request's caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
    /// No resolution arrived within the request's timeout window.
    #[error("request {method:?} timed out after {elapsed:?}")]
    Timeout { method: String, elapsed: Duration },

    /// The worker answered with a structured error.
    #[error("worker error {name} ({code}): {message}")]
    Rpc {
        code: i64,
        /// Human-readable name from the well-known code table.
        name: &'static str,
        message: String,
        data: Option<Value>,
    },

    /// The worker is stopped, crashed, or mid-restart; nothing is queued
    /// across an outage of unknown duration.
    #[error("worker is not running")]
    NotRunning,

    /// The outbound queue hit its configured ceiling.
    #[error("outbound queue is full ({depth} writes)")]
    QueueFull { depth: usize },

    /// The worker process died while the request was in flight.
    #[error("worker process crashed")]
    ProcessCrashed,
}

impl SendError {
    /// Build an [`SendError::Rpc`] from a wire error body, attaching the
    /// well-known-code name.
    pub fn from_rpc(error: genlink_protocol::RpcErrorBody) -> Self {
        SendError::Rpc {
            code: error.code,
            name: genlink_protocol::code_name(error.code),
            message: error.message,
            data: error.data,
        }
    }
}

/// Failures starting (or restarting) the worker process.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The OS refused to spawn the worker executable.
    #[error("failed to spawn worker {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// `start()` was called while the supervisor is not stopped.
    #[error("supervisor is already started")]
    AlreadyStarted,
}
