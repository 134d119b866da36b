//! Cartridge Reader Detection Library
//!
//! This crate finds NFC cartridge readers among the host's serial ports:
//!
//! - **Enumeration**: [`PortScanner`] lists ports with their USB metadata
//! - **Classification**: [`DeviceClassifier`] keeps ports behind known
//!   USB-to-UART bridges or from known manufacturers
//! - **Validation**: [`HandshakeValidator`] opens a candidate, sends
//!   `IDENTIFY` and waits for a known firmware signature
//!
//! Ports are opened through the [`Transport`] trait so that the same
//! detection code runs against real hardware and simulated readers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cart_detect::{DeviceClassifier, HandshakeConfig, HandshakeValidator, SerialTransport, Transport};
//!
//! # async fn run() -> Result<(), cart_detect::DetectError> {
//! let transport = Arc::new(SerialTransport::new());
//! let classifier = DeviceClassifier::new();
//! let validator = HandshakeValidator::new(Arc::clone(&transport), HandshakeConfig::default());
//!
//! let candidates = classifier.candidates(transport.list_ports()?);
//! for result in validator.validate_all(candidates).await {
//!     println!("{}: {}", result.port.label(), result.valid);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod probe;
pub mod scanner;
pub mod transport;
pub mod usb_ids;

pub use error::DetectError;
pub use probe::{HandshakeConfig, HandshakeValidator, PortClaim, ValidationResult};
pub use scanner::{PortDescriptor, PortScanner, ScannerConfig};
pub use transport::{Capability, SerialSettings, SerialTransport, Transport};
pub use usb_ids::{ClassifierConfig, DeviceClassifier, PortClassification, UsbId};
