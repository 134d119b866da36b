//! Cartridge Reader Simulation Library
//!
//! This crate provides simulated NFC cartridge readers for exercising the
//! link layer without hardware. It includes:
//!
//! - **SimTransport**: a [`Transport`](cart_detect::Transport) over
//!   in-memory duplex streams, with ports that can be plugged, unplugged or
//!   made to fail
//! - **VirtualReader**: a task on the far end of each connection that
//!   answers `IDENTIFY` and pushes cartridge records on demand
//!
//! # Example
//!
//! ```rust
//! use cart_detect::Transport;
//! use cart_protocol::CartridgeRecord;
//! use cart_sim::{SimTransport, VirtualReaderConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sim = SimTransport::new();
//! let reader = sim.plug(VirtualReaderConfig::cp2102("/dev/ttyUSB0").with_reply_delay(50));
//!
//! let _stream = sim.open("/dev/ttyUSB0").await.unwrap();
//! reader.present(CartridgeRecord::new("Zelda", None, "/games/zelda")).await;
//! assert_eq!(reader.open_count(), 1);
//! # }
//! ```

pub mod reader;
pub mod transport;

pub use reader::{ReaderCommand, VirtualReaderConfig, DEFAULT_IDENTITY};
pub use transport::{ReaderHandle, SimTransport};
