//! Cartridge Reader Link
//!
//! This crate keeps a host connected to an NFC cartridge reader and turns
//! what the reader says into events.
//!
//! # Architecture
//!
//! - [`Session`] owns one open port, frames its byte stream into lines and
//!   writes outbound commands
//! - The supervisor actor ([`run_supervisor`], driven through a
//!   [`LinkHandle`]) is the single owner of the reader slot: it scans for
//!   readers, promotes the first validated one to a session, decodes records,
//!   and reconnects with a bounded retry budget when the session goes away
//! - A [`Dispatcher`] receives the executable path of every launchable
//!   record; [`ProcessLauncher`] is the default
//!
//! Everything observable is published as a [`LinkEvent`] on one channel,
//! and the [`ConnectionState`] is available through a `watch` channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cart_detect::SerialTransport;
//! use cart_link::{LinkConfig, LinkHandle, ProcessLauncher};
//!
//! # async fn run() -> Result<(), cart_link::LinkError> {
//! let (link, mut events, _task) = LinkHandle::spawn(
//!     Arc::new(SerialTransport::new()),
//!     Arc::new(ProcessLauncher::new()),
//!     LinkConfig::default(),
//! );
//!
//! if let Some(event) = events.recv().await {
//!     println!("{:?} ({})", event, link.connection_state());
//! }
//! link.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod session;
pub mod state;
pub mod supervisor;

pub use config::LinkConfig;
pub use dispatch::{Dispatcher, ProcessLauncher};
pub use error::{DispatchError, LinkError};
pub use events::LinkEvent;
pub use session::{CloseReason, Session, SessionEvent, SessionId, SessionState, SessionWriter};
pub use state::ConnectionState;
pub use supervisor::{run_supervisor, LinkHandle, SupervisorCommand};
