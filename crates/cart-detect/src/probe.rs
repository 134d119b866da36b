//! Handshake validation for reader detection
//!
//! This module opens candidate ports, sends the identification command and
//! waits for one of the known firmware signatures. A port is only ever
//! promoted to a session after it has answered here.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::DetectError;
use crate::scanner::PortDescriptor;
use crate::transport::Transport;

/// Identification command sent to candidate ports
pub const DEFAULT_IDENTIFY_COMMAND: &str = "IDENTIFY";

/// Response substrings printed by the known firmware revisions
pub const DEFAULT_SIGNATURES: &[&str] = &[
    "RETRO-LAUNCHER-NFC-DEVICE",
    "RETRO_LAUNCHER",
    "Retro Launcher",
    "NFC Reader",
    "ESP32 NFC",
    "MFRC522",
    "Ready to read NFC cards",
];

/// Response bytes kept while waiting for a signature
const MAX_RESPONSE_LEN: usize = 1024;

/// Time allowed for flushing the port before it is dropped
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Configuration for handshake validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Command sent after opening (a newline is appended)
    pub command: String,
    /// Accepted response substrings
    pub signatures: Vec<String>,
    /// Budget for open + exchange, in milliseconds
    pub timeout_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_IDENTIFY_COMMAND.to_string(),
            signatures: DEFAULT_SIGNATURES.iter().map(|s| s.to_string()).collect(),
            timeout_ms: 2000,
        }
    }
}

impl HandshakeConfig {
    /// Validation timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Does the accumulated response contain an accepted signature?
    pub fn matches(&self, response: &str) -> bool {
        self.signatures
            .iter()
            .any(|sig| !sig.is_empty() && response.contains(sig.as_str()))
    }
}

/// Outcome of validating one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// The port that was probed
    pub port: PortDescriptor,
    /// Whether it answered with a known signature
    pub valid: bool,
}

/// Paths that are currently open for a handshake or a connect
type InFlight = Arc<Mutex<HashSet<String>>>;

/// Exclusive hold on a port path
///
/// Released when dropped. While a claim is alive, every other validation of
/// the same path is refused.
#[derive(Debug)]
pub struct PortClaim {
    set: InFlight,
    path: String,
}

impl PortClaim {
    fn acquire(set: &InFlight, path: &str) -> Option<Self> {
        let mut paths = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !paths.insert(path.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            path: path.to_string(),
        })
    }

    /// The claimed path
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        let mut paths = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        paths.remove(&self.path);
    }
}

/// Handshake validator
///
/// Cheap to clone; clones share the transport and the set of claimed paths,
/// so a path is never opened twice at the same time.
pub struct HandshakeValidator<T> {
    transport: Arc<T>,
    config: Arc<HandshakeConfig>,
    in_flight: InFlight,
}

impl<T> Clone for HandshakeValidator<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            config: Arc::clone(&self.config),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T: Transport> HandshakeValidator<T> {
    /// Create a validator over a transport
    pub fn new(transport: Arc<T>, config: HandshakeConfig) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The handshake configuration
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Hold a path so no validation opens it
    ///
    /// Returns `None` when the path is already claimed.
    pub fn claim(&self, path: &str) -> Option<PortClaim> {
        PortClaim::acquire(&self.in_flight, path)
    }

    /// Is this path claimed by a validation or a connect?
    pub fn is_busy(&self, path: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Validate a single path
    ///
    /// Resolves `false` on timeout, open or write failure, EOF, or when the
    /// path is claimed elsewhere. The port is closed before this returns in
    /// every case.
    pub async fn validate(&self, path: &str) -> bool {
        match self.try_validate(path).await {
            Ok(valid) => valid,
            Err(e) => {
                debug!("Skipping validation: {}", e);
                false
            }
        }
    }

    /// Validate a single path, refusing one that is claimed elsewhere
    pub async fn try_validate(&self, path: &str) -> Result<bool, DetectError> {
        let Some(_claim) = self.claim(path) else {
            return Err(DetectError::PortBusy(path.to_string()));
        };
        Ok(self.handshake(path).await)
    }

    async fn handshake(&self, path: &str) -> bool {
        let deadline = Instant::now() + self.config.timeout();
        debug!("Validating {}", path);

        let mut stream = match timeout_at(deadline, self.transport.open(path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("Validation of {} failed to open: {}", path, e);
                return false;
            }
            Err(_) => {
                debug!("Validation of {} timed out while opening", path);
                return false;
            }
        };

        // The exchange future owns the only borrow of the stream; when the
        // deadline fires it is dropped, so a late reply is never read.
        let valid = match timeout_at(deadline, self.exchange(path, &mut stream)).await {
            Ok(Ok(valid)) => valid,
            Ok(Err(e)) => {
                debug!("Validation I/O error on {}: {}", path, e);
                false
            }
            Err(_) => {
                debug!(
                    "Validation of {} timed out after {}ms",
                    path, self.config.timeout_ms
                );
                false
            }
        };

        close_stream(stream).await;

        if valid {
            info!("Port {} validated as cartridge reader", path);
        }
        valid
    }

    /// Validate a described port
    pub async fn validate_port(&self, port: PortDescriptor) -> ValidationResult {
        let valid = self.validate(&port.path).await;
        ValidationResult { port, valid }
    }

    /// Validate several ports concurrently
    ///
    /// Results come back in the order of `ports`. Duplicate paths are only
    /// probed once; later duplicates resolve `false`.
    pub async fn validate_all(&self, ports: Vec<PortDescriptor>) -> Vec<ValidationResult> {
        let mut set = JoinSet::new();
        for (index, port) in ports.iter().cloned().enumerate() {
            let validator = self.clone();
            set.spawn(async move { (index, validator.validate_port(port).await) });
        }

        let mut results: Vec<Option<ValidationResult>> = vec![None; ports.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!("Validation task failed: {}", e),
            }
        }

        results
            .into_iter()
            .zip(ports)
            .map(|(result, port)| result.unwrap_or(ValidationResult { port, valid: false }))
            .collect()
    }

    /// Send the identification command and wait for a signature
    async fn exchange<S>(&self, path: &str, stream: &mut S) -> std::io::Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut probe = self.config.command.clone().into_bytes();
        probe.push(b'\n');
        trace!("Sending {:?} to {}", self.config.command, path);
        stream.write_all(&probe).await?;
        stream.flush().await?;

        let mut response = Vec::with_capacity(128);
        let mut buf = [0u8; 256];
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                debug!("{} closed during handshake", path);
                return Ok(false);
            }

            response.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&response);
            trace!("Handshake response from {}: {:?}", path, text);
            if self.config.matches(&text) {
                return Ok(true);
            }

            if response.len() > MAX_RESPONSE_LEN {
                let excess = response.len() - MAX_RESPONSE_LEN;
                response.drain(..excess);
            }
        }
    }
}

/// Shut a stream down and drop it
pub(crate) async fn close_stream<S>(mut stream: S)
where
    S: AsyncWrite + Unpin,
{
    let _ = tokio::time::timeout(CLOSE_GRACE, stream.shutdown()).await;
    drop(stream);
}
