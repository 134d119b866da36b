//! USB Vendor/Product ID database and candidate classification
//!
//! Cartridge readers are hobbyist microcontroller boards, so they show up
//! behind one of a handful of USB-to-UART bridge chips. This module holds
//! the VID/PID pairs of those bridges and the manufacturer strings their
//! drivers report, and uses them to decide which ports are worth a
//! handshake.

use serde::{Deserialize, Serialize};

use crate::scanner::PortDescriptor;

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// FTDI (Future Technology Devices International)
pub mod ftdi {
    use super::UsbId;

    pub const VID: u16 = 0x0403;

    pub const FT232R: UsbId = UsbId::new(VID, 0x6001);
    pub const FT2232: UsbId = UsbId::new(VID, 0x6010);
}

/// Silicon Labs CP210x
pub mod cp210x {
    use super::UsbId;

    pub const VID: u16 = 0x10C4;

    /// CP2102/CP2104, the bridge on most ESP32 dev boards
    pub const CP2102: UsbId = UsbId::new(VID, 0xEA60);
}

/// WCH CH340/CH341
pub mod ch340 {
    use super::UsbId;

    pub const VID: u16 = 0x1A86;

    pub const CH340: UsbId = UsbId::new(VID, 0x7523);
}

/// Prolific PL2303
pub mod prolific {
    use super::UsbId;

    pub const VID: u16 = 0x067B;

    pub const PL2303: UsbId = UsbId::new(VID, 0x2303);
}

/// Espressif native USB (ESP32-S2/S3/C3)
pub mod espressif {
    pub const VID: u16 = 0x303A;
}

/// Bridge chips the reader firmware is known to ship behind
pub const KNOWN_BRIDGES: &[UsbId] = &[
    cp210x::CP2102,
    ch340::CH340,
    ftdi::FT232R,
    ftdi::FT2232,
    prolific::PL2303,
];

/// Manufacturer substrings reported by bridge drivers and board vendors
pub const KNOWN_MANUFACTURERS: &[&str] = &[
    "silicon labs",
    "silabser",
    "cp210x",
    "qinheng",
    "ch340",
    "ftdi",
    "espressif",
    "arduino",
    "microchip",
    "atmel",
    "nordic",
];

/// Get adapter type name from VID
pub fn adapter_name(vid: u16) -> Option<&'static str> {
    match vid {
        ftdi::VID => Some("FTDI"),
        cp210x::VID => Some("CP210x"),
        ch340::VID => Some("CH340"),
        prolific::VID => Some("PL2303"),
        espressif::VID => Some("Espressif USB"),
        _ => None,
    }
}

/// Classifier tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Exact VID/PID pairs that mark a candidate
    pub known_ids: Vec<UsbId>,
    /// Manufacturer substrings (matched case-insensitively)
    pub manufacturers: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            known_ids: KNOWN_BRIDGES.to_vec(),
            manufacturers: KNOWN_MANUFACTURERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Why a port was (or was not) considered a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortClassification {
    /// VID/PID matches a known bridge chip
    KnownBridge,
    /// Manufacturer string matches a known vendor
    ManufacturerMatch,
    /// Nothing matched - never probed
    NotCandidate,
}

impl PortClassification {
    /// Returns true if ports of this class should be handshake-validated
    pub fn is_candidate(&self) -> bool {
        !matches!(self, Self::NotCandidate)
    }
}

/// Pure candidate predicate over port descriptors
#[derive(Debug, Clone, Default)]
pub struct DeviceClassifier {
    known_ids: Vec<UsbId>,
    manufacturers: Vec<String>,
}

impl DeviceClassifier {
    /// Create a classifier with the built-in tables
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    /// Create a classifier with custom tables
    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            known_ids: config.known_ids,
            manufacturers: config
                .manufacturers
                .into_iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    /// Classify a port based on USB IDs and manufacturer
    pub fn classify(&self, port: &PortDescriptor) -> PortClassification {
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            if self.known_ids.contains(&UsbId::new(vid, pid)) {
                return PortClassification::KnownBridge;
            }
        }

        if let Some(manufacturer) = &port.manufacturer {
            let manufacturer = manufacturer.to_lowercase();
            if self
                .manufacturers
                .iter()
                .any(|m| manufacturer.contains(m.as_str()))
            {
                return PortClassification::ManufacturerMatch;
            }
        }

        PortClassification::NotCandidate
    }

    /// Does this port look like a cartridge reader?
    pub fn is_candidate(&self, port: &PortDescriptor) -> bool {
        self.classify(port).is_candidate()
    }

    /// Keep only candidate ports, preserving order
    pub fn candidates(&self, ports: Vec<PortDescriptor>) -> Vec<PortDescriptor> {
        ports.into_iter().filter(|p| self.is_candidate(p)).collect()
    }
}
