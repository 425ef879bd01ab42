//! Core error types for the Apollo agent

use apollo_protocol::SessionId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the credential provider
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token endpoint refused the agent's credentials
    #[error("Token request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Token endpoint answered with something that is not a token
    #[error("Malformed token response: {0}")]
    Malformed(String),

    /// Token endpoint could not be reached
    #[error("Token request failed: {0}")]
    Transport(String),

    /// Credential stream ended without producing a credential
    #[error("Credential stream closed")]
    StreamClosed,
}

/// Transient connection errors, reported once per epoch
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Dialing or the websocket handshake failed
    #[error("Failed to connect to {endpoint}: {reason}")]
    Dial { endpoint: String, reason: String },

    /// Dial did not complete in time
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// Reading from the socket failed
    #[error("Read error: {0}")]
    Read(String),

    /// Writing to the socket failed
    #[error("Write error: {0}")]
    Write(String),

    /// Remote side closed the connection
    #[error("Connection closed by remote")]
    ClosedByRemote,
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Configured shell cannot be used
    #[error("Invalid shell '{shell}': {reason}")]
    InvalidShell { shell: String, reason: String },

    /// PTY allocation or process spawn failed
    #[error("Failed to start shell '{shell}': {reason}")]
    Spawn { shell: String, reason: String },

    /// Session was closed and cannot take input
    #[error("session is closed, please create a new session")]
    Closed(SessionId),

    /// I/O error on the PTY
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from predefined actions
#[derive(Error, Debug)]
pub enum ActionError {
    /// No action registered under the command name
    #[error("Unknown command: {0}")]
    Unknown(String),

    /// Action needs a session and none exists for the id
    #[error("No session found for {0}, open a new connection first")]
    NoSession(SessionId),

    /// Action could not be started
    #[error("Action failed: {0}")]
    Failed(#[from] SessionError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_session_message() {
        let err = SessionError::Closed(SessionId::from("1"));
        assert_eq!(
            err.to_string(),
            "session is closed, please create a new session"
        );
    }

    #[test]
    fn test_rejected_message_carries_status_and_body() {
        let err = AuthError::Rejected {
            status: 401,
            body: "invalid client".to_string(),
        };
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid client"));
    }
}
