//! Cartridge Reader Protocol Library
//!
//! This crate provides framing and decoding for the line-oriented protocol
//! spoken by NFC cartridge readers:
//!
//! - **Framing**: newline-terminated lines reassembled from arbitrary read chunks
//! - **Records**: one JSON object per line, `{"name", "icon", "pathName"}`
//! - **Removal**: a reserved `TAG_REMOVED` line, recognized before JSON parsing
//!
//! Everything else the reader prints (boot banners, debug output) is
//! diagnostic text and never an error.
//!
//! # Architecture
//!
//! The protocol is split in two stages:
//! - [`LineCodec`] turns a byte stream into complete lines, preserving any
//!   unterminated remainder for the next chunk
//! - [`Decoder`] classifies each line as a record, a removal signal, or noise
//!
//! # Example
//!
//! ```rust
//! use cart_protocol::{Decoded, Decoder, FrameCodec, LineCodec};
//!
//! let mut codec = LineCodec::new();
//! let decoder = Decoder::new();
//!
//! codec.push_bytes(br#"{"name":"Zelda","icon":null,"pa"#);
//! assert!(codec.next_frame().is_none());
//!
//! codec.push_bytes(b"thName\":\"C:/g.exe\"}\n");
//! let line = codec.next_frame().unwrap();
//!
//! match decoder.decode(&line) {
//!     Some(Decoded::Record(record)) => assert_eq!(record.path_name, "C:/g.exe"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod codec;
pub mod decode;
pub mod error;
pub mod record;

pub use codec::LineCodec;
pub use decode::{Decoded, Decoder, DEFAULT_REMOVAL_TOKEN};
pub use error::ParseError;
pub use record::CartridgeRecord;

/// Trait for stream codecs that reassemble frames from raw chunks
pub trait FrameCodec {
    /// The frame type produced by this codec
    type Frame;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete frame from the buffer
    fn next_frame(&mut self) -> Option<Self::Frame>;

    /// Number of bytes buffered that do not yet form a complete frame
    fn pending(&self) -> usize;

    /// Clear the internal buffer
    fn clear(&mut self);
}
