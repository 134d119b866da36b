//! Serial port scanner
//!
//! This module provides serial port enumeration.

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::error::DetectError;

/// Snapshot of a serial port taken at scan time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Port path (e.g., /dev/ttyUSB0, COM3)
    pub path: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl PortDescriptor {
    /// Descriptor for a port with no USB metadata
    pub fn bare(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Descriptor for a USB port
    pub fn usb(path: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            vid: Some(vid),
            pid: Some(pid),
            ..Self::bare(path)
        }
    }

    /// Set the manufacturer string
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                path: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            _ => Self::bare(name),
        }
    }

    /// Short human-readable label, e.g. `/dev/ttyUSB0 (CP2102 USB to UART)`
    pub fn label(&self) -> String {
        match (&self.product, &self.manufacturer) {
            (Some(product), _) => format!("{} ({})", self.path, product),
            (None, Some(manufacturer)) => format!("{} ({})", self.path, manufacturer),
            (None, None) => self.path.clone(),
        }
    }
}

/// Serial port scanner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Skip ports whose path contains any of these patterns
    pub skip_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                // Debug/logging ports
                "debug".to_string(),
            ],
        }
    }
}

/// Serial port scanner
#[derive(Debug, Clone)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self::with_config(ScannerConfig::default())
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<PortDescriptor>, DetectError> {
        debug!("Enumerating serial ports...");
        let ports =
            available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result = self.filter_ports(
            ports
                .into_iter()
                .map(|p| PortDescriptor::from_serialport(p.port_name, &p.port_type)),
        );

        if result.is_empty() {
            debug!("No serial ports found");
        } else {
            info!("Found {} serial port(s)", result.len());
            for port in &result {
                debug!("  {}", port.label());
            }
        }

        Ok(result)
    }

    /// Drop ports matching a skip pattern
    pub fn filter_ports(
        &self,
        ports: impl IntoIterator<Item = PortDescriptor>,
    ) -> Vec<PortDescriptor> {
        ports
            .into_iter()
            .filter(|p| !self.should_skip_port(p))
            .collect()
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &PortDescriptor) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.path.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}
