//! Error types for the link layer

use thiserror::Error;

/// Errors that can occur while talking to a reader
#[derive(Debug, Error)]
pub enum LinkError {
    /// No session is open, or the session has left `Connected`
    #[error("not connected to a reader")]
    NotConnected,

    /// Opening the port did not finish in time
    #[error("connection to {port} timed out after {timeout_ms}ms")]
    ConnectionTimeout { port: String, timeout_ms: u64 },

    /// Opening the port failed
    #[error("connection to {port} failed: {reason}")]
    ConnectionFailed { port: String, reason: String },

    /// The port is owned by the active session or a scan in progress
    #[error("port {0} is busy")]
    PortBusy(String),

    /// I/O error on an open session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The supervisor task is gone
    #[error("supervisor is not running")]
    ActorStopped,
}

/// Errors reported by an action dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Nothing exists at the given path
    #[error("executable not found: {0}")]
    NotFound(String),

    /// The record carried an empty path
    #[error("empty executable path")]
    EmptyPath,

    /// The OS refused to start the process
    #[error("failed to launch {path}: {reason}")]
    SpawnFailed { path: String, reason: String },
}
