//! Connection status register.
//!
//! A single shared register read by the host and written only by the
//! connection manager.

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No device connected; no characteristic handle is valid.
    #[default]
    Disconnected,
    /// Connected and subscribed.
    Connected,
    /// Connected, and the host has started a streaming session.
    Streaming,
}

impl ConnectionState {
    /// Check if connected (streaming counts as connected).
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }

    /// Check if streaming.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
            Self::Streaming => write!(f, "Streaming"),
        }
    }
}

/// Observable holder of the current [`ConnectionState`].
pub struct StatusRegister {
    state: RwLock<ConnectionState>,
    change_tx: broadcast::Sender<ConnectionState>,
}

impl StatusRegister {
    /// Create a register in the `Disconnected` state.
    pub(crate) fn new() -> Self {
        let (change_tx, _) = broadcast::channel(16);

        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            change_tx,
        }
    }

    /// Get the current state.
    pub fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.change_tx.subscribe()
    }

    /// Update the state and publish the transition. Returns the previous state.
    pub(crate) fn set(&self, new_state: ConnectionState) -> ConnectionState {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Connection state changed: {} -> {}", old_state, new_state);
            let _ = self.change_tx.send(new_state);
        }

        old_state
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Streaming.is_connected());
        assert!(ConnectionState::Streaming.is_streaming());
        assert!(!ConnectionState::Connected.is_streaming());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Connected), "Connected");
        assert_eq!(format!("{}", ConnectionState::Disconnected), "Disconnected");
        assert_eq!(format!("{}", ConnectionState::Streaming), "Streaming");
    }

    #[test]
    fn test_register_publishes_transitions_only() {
        let register = StatusRegister::new();
        let mut rx = register.subscribe();

        assert_eq!(register.set(ConnectionState::Disconnected), ConnectionState::Disconnected);
        assert_eq!(register.set(ConnectionState::Connected), ConnectionState::Disconnected);
        assert_eq!(register.get(), ConnectionState::Connected);

        assert_eq!(rx.try_recv().ok(), Some(ConnectionState::Connected));
        assert!(rx.try_recv().is_err());
    }
}
