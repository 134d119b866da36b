//! Link configuration

use std::time::Duration;

use cart_detect::{ClassifierConfig, HandshakeConfig, ScannerConfig, SerialSettings};
use cart_protocol::DEFAULT_REMOVAL_TOKEN;
use serde::{Deserialize, Serialize};

/// Configuration for the supervisor and everything below it
///
/// Missing fields fall back to their defaults when deserialized, so a
/// settings file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Periodic scan interval while no reader is connected (milliseconds)
    pub scan_interval_ms: u64,
    /// Delay before a retry after a disconnect (milliseconds)
    pub reconnect_interval_ms: u64,
    /// Budget for opening a validated port (milliseconds)
    pub connect_timeout_ms: u64,
    /// Consecutive failed retries before `PersistentFailure` is reported
    pub max_reconnect_attempts: u32,
    /// Launch each decoded record's executable
    pub auto_launch: bool,
    /// Line the reader sends when a cartridge is removed
    pub removal_token: String,
    /// Treat the removal line as a disconnect of the session
    pub removal_closes_session: bool,
    /// Identification handshake
    pub handshake: HandshakeConfig,
    /// Candidate port tables
    pub classifier: ClassifierConfig,
    /// Serial line settings
    pub serial: SerialSettings,
    /// Port enumeration filters
    pub scanner: ScannerConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 2000,
            reconnect_interval_ms: 3000,
            connect_timeout_ms: 5000,
            max_reconnect_attempts: 3,
            auto_launch: true,
            removal_token: DEFAULT_REMOVAL_TOKEN.to_string(),
            removal_closes_session: true,
            handshake: HandshakeConfig::default(),
            classifier: ClassifierConfig::default(),
            serial: SerialSettings::default(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Periodic scan interval
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Retry delay after a disconnect
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
