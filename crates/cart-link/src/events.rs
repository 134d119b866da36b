//! Event stream published by the supervisor
//!
//! Collaborators (a UI layer, the console monitor) receive everything the
//! link does through a single `mpsc` channel of [`LinkEvent`]s.

use cart_detect::PortDescriptor;
use cart_protocol::CartridgeRecord;

use crate::error::DispatchError;
use crate::state::ConnectionState;

/// Unified event enum for all link activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    // -------------------------------------------------------------------------
    // Session lifecycle events
    // -------------------------------------------------------------------------
    /// A validated reader was promoted to a session
    Connected {
        /// Port path of the session
        path: String,
    },

    /// The session closed
    Disconnected {
        /// Port path of the closed session
        path: String,
    },

    /// The connection state changed
    StateChanged {
        /// New state
        state: ConnectionState,
    },

    // -------------------------------------------------------------------------
    // Record events
    // -------------------------------------------------------------------------
    /// A cartridge record was decoded
    RecordDetected(CartridgeRecord),

    /// The reader reported the cartridge was removed
    RecordRemoved,

    // -------------------------------------------------------------------------
    // Dispatch events
    // -------------------------------------------------------------------------
    /// The dispatcher launched a record's executable
    DispatchSucceeded {
        /// Launched path
        path: String,
    },

    /// The dispatcher could not launch a record's executable
    DispatchFailed {
        /// Path that failed
        path: String,
        /// Why it failed
        error: DispatchError,
    },

    // -------------------------------------------------------------------------
    // Discovery events
    // -------------------------------------------------------------------------
    /// A scan or connect attempt failed
    ScanError {
        /// Error message
        message: String,
    },

    /// The retry budget ran out; periodic scanning continues
    PersistentFailure {
        /// Consecutive failed attempts
        attempts: u32,
    },

    /// The list of candidate ports seen by the last scan changed
    CandidatesUpdated(Vec<PortDescriptor>),
}

impl LinkEvent {
    /// Check if this is a session lifecycle event
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            LinkEvent::Connected { .. }
                | LinkEvent::Disconnected { .. }
                | LinkEvent::StateChanged { .. }
        )
    }

    /// Check if this event carries record activity
    pub fn is_record(&self) -> bool {
        matches!(self, LinkEvent::RecordDetected(_) | LinkEvent::RecordRemoved)
    }

    /// Check if this is an error or failure event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LinkEvent::ScanError { .. }
                | LinkEvent::PersistentFailure { .. }
                | LinkEvent::DispatchFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classification() {
        assert!(LinkEvent::Connected { path: "COM3".into() }.is_lifecycle());
        assert!(LinkEvent::RecordRemoved.is_record());
        assert!(LinkEvent::PersistentFailure { attempts: 3 }.is_error());
        assert!(!LinkEvent::CandidatesUpdated(Vec::new()).is_error());
        assert!(LinkEvent::DispatchFailed {
            path: "/bin/nope".into(),
            error: DispatchError::NotFound("/bin/nope".into()),
        }
        .is_error());
    }
}
