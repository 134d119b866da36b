//! Error types for reader detection

use thiserror::Error;

/// Errors that can occur during detection
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// Failed to open serial port
    #[error("failed to open port {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    /// Port is claimed by a handshake, a connect or a session
    #[error("port {0} is busy or in use")]
    PortBusy(String),

    /// The port API is not usable on this host
    #[error("serial transport unavailable: {0}")]
    TransportUnavailable(String),
}
