//! Connection state

use std::fmt;

/// Where the orchestrator is in its lifecycle.
///
/// Published on a `tokio::sync::watch` channel by
/// [`Middleware`](crate::middleware::Middleware).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the first credential
    Authenticating,
    /// An epoch is dialing or connected
    Connected,
    /// Waiting out the reconnect delay
    Reconnecting,
    /// Shutdown requested, waiting for the epoch to close
    ShuttingDown,
    /// Sessions closed, orchestrator returned
    Shutdown,
}

impl ConnectionState {
    /// Whether the orchestrator has stopped
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Shutdown
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::ShuttingDown => "shutting down",
            ConnectionState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_shutdown_is_terminal() {
        assert!(ConnectionState::Shutdown.is_terminal());
        assert!(!ConnectionState::ShuttingDown.is_terminal());
        assert!(!ConnectionState::Reconnecting.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::ShuttingDown.to_string(), "shutting down");
    }
}
