//! Byte-stream transports
//!
//! Everything above this module talks to readers through the [`Transport`]
//! trait: list what is plugged in, open a path as an async byte stream. The
//! serial implementation is the production one; tests and demo mode plug in
//! a simulated transport instead.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, warn};

use crate::error::DetectError;
use crate::scanner::{PortDescriptor, PortScanner, ScannerConfig};

/// Reader firmware baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Whether the host can talk to serial ports at all
///
/// Computed once when the transport is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// Port enumeration works
    Available,
    /// Port enumeration failed at startup
    Unavailable(String),
}

impl Capability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// A source of reader connections
pub trait Transport: Send + Sync + 'static {
    /// Open connection type
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// What this transport can do on this host
    fn capability(&self) -> Capability {
        Capability::Available
    }

    /// List the ports currently visible
    ///
    /// May block briefly on OS calls; async callers should run it on the
    /// blocking pool.
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, DetectError>;

    /// Open a port as a byte stream
    fn open(&self, path: &str) -> impl Future<Output = Result<Self::Stream, DetectError>> + Send;
}

/// Serial line settings
///
/// Framing is always 8 data bits, no parity, 1 stop bit, no flow control.
/// Only the baud rate is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Transport over the host's serial ports
#[derive(Debug, Clone)]
pub struct SerialTransport {
    settings: SerialSettings,
    scanner: PortScanner,
    capability: Capability,
}

impl SerialTransport {
    /// Create a serial transport with default settings
    pub fn new() -> Self {
        Self::with_settings(SerialSettings::default(), PortScanner::new())
    }

    /// Create a serial transport with custom settings
    pub fn with_settings(settings: SerialSettings, scanner: PortScanner) -> Self {
        let capability = match serialport::available_ports() {
            Ok(_) => Capability::Available,
            Err(e) => {
                warn!("Serial port enumeration unavailable: {}", e);
                Capability::Unavailable(e.to_string())
            }
        };

        Self {
            settings,
            scanner,
            capability,
        }
    }

    /// Create from a scanner configuration
    pub fn from_config(settings: SerialSettings, scanner: ScannerConfig) -> Self {
        Self::with_settings(settings, PortScanner::with_config(scanner))
    }

    /// Line settings used for every open
    pub fn settings(&self) -> SerialSettings {
        self.settings
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SerialTransport {
    type Stream = SerialStream;

    fn capability(&self) -> Capability {
        self.capability.clone()
    }

    fn list_ports(&self) -> Result<Vec<PortDescriptor>, DetectError> {
        if let Capability::Unavailable(reason) = &self.capability {
            return Err(DetectError::TransportUnavailable(reason.clone()));
        }
        self.scanner.enumerate_ports()
    }

    fn open(&self, path: &str) -> impl Future<Output = Result<SerialStream, DetectError>> + Send {
        let builder = tokio_serial::new(path, self.settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None);
        let path = path.to_string();
        let baud_rate = self.settings.baud_rate;

        async move {
            debug!("Opening {} at {} baud", path, baud_rate);
            builder
                .open_native_async()
                .map_err(|e| DetectError::OpenFailed {
                    port: path,
                    reason: e.to_string(),
                })
        }
    }
}
