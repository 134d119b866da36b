//! Connection state of the managed reader slot

use serde::{Deserialize, Serialize};

/// Connection state published by the supervisor
///
/// The supervisor is the only writer; everyone else observes it through a
/// `watch` channel or [`LinkEvent::StateChanged`](crate::LinkEvent::StateChanged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not scanning and not connected
    #[default]
    Idle,
    /// Enumerating ports or waiting for the next periodic scan
    Scanning,
    /// Handshaking with candidate ports
    Validating,
    /// A session is open
    Connected,
    /// The session just closed
    Disconnected,
    /// Waiting for the next retry after a disconnect
    Reconnecting,
}

impl ConnectionState {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Scanning => "Scanning",
            Self::Validating => "Validating",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Reconnecting => "Reconnecting",
        }
    }

    /// Is a session open?
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Is the supervisor looking for a reader?
    pub fn is_searching(&self) -> bool {
        matches!(self, Self::Scanning | Self::Validating | Self::Reconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
